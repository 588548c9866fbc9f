//! In-memory log storage.

use super::{BoxFuture, LogStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory storage for tests and ephemeral servers.
#[derive(Debug, Default)]
pub struct MemoryLogStorage {
    logs: RwLock<HashMap<String, String>>,
}

impl MemoryLogStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Other(format!("Lock error: {e}"))
}

impl LogStorage for MemoryLogStorage {
    fn save(&self, canvas_id: &str, log: &str) -> BoxFuture<'_, StorageResult<()>> {
        let canvas_id = canvas_id.to_string();
        let log = log.to_string();
        Box::pin(async move {
            self.logs.write().map_err(lock_error)?.insert(canvas_id, log);
            Ok(())
        })
    }

    fn load(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<String>> {
        let canvas_id = canvas_id.to_string();
        Box::pin(async move {
            let logs = self.logs.read().map_err(lock_error)?;
            logs.get(&canvas_id)
                .cloned()
                .ok_or(StorageError::NotFound(canvas_id))
        })
    }

    fn delete(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let canvas_id = canvas_id.to_string();
        Box::pin(async move {
            self.logs.write().map_err(lock_error)?.remove(&canvas_id);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let logs = self.logs.read().map_err(lock_error)?;
            Ok(logs.keys().cloned().collect())
        })
    }

    fn exists(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let canvas_id = canvas_id.to_string();
        Box::pin(async move { Ok(self.logs.read().map_err(lock_error)?.contains_key(&canvas_id)) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_and_load() {
        let storage = MemoryLogStorage::new();
        storage.save("c1", "{\"type\":\"REDRAW\"}\n").await.unwrap();
        assert_eq!(storage.load("c1").await.unwrap(), "{\"type\":\"REDRAW\"}\n");
    }

    #[tokio::test]
    async fn test_not_found() {
        let storage = MemoryLogStorage::new();
        assert!(matches!(storage.load("missing").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_exists_and_delete() {
        let storage = MemoryLogStorage::new();
        assert!(!storage.exists("c1").await.unwrap());
        storage.save("c1", "").await.unwrap();
        assert!(storage.exists("c1").await.unwrap());
        storage.delete("c1").await.unwrap();
        assert!(!storage.exists("c1").await.unwrap());
        storage.delete("c1").await.unwrap();
    }

    #[tokio::test]
    async fn test_list() {
        let storage = MemoryLogStorage::new();
        storage.save("c1", "").await.unwrap();
        storage.save("c2", "").await.unwrap();
        let mut list = storage.list().await.unwrap();
        list.sort();
        assert_eq!(list, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[tokio::test]
    async fn test_default_append() {
        let storage = MemoryLogStorage::new();
        storage.append("c1", &["a".to_string()]).await.unwrap();
        storage.save("c2", "x").await.unwrap();
        storage.append("c1", &["b".to_string(), "c\n".to_string()]).await.unwrap();
        storage.append("c2", &["y".to_string()]).await.unwrap();
        assert_eq!(storage.load("c1").await.unwrap(), "a\nb\nc\n");
        assert_eq!(storage.load("c2").await.unwrap(), "x\ny\n");
    }
}
