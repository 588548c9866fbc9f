//! File-based log storage.

use super::{BoxFuture, LogStorage, StorageError, StorageResult, join_lines};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Extension of stored log files.
pub const LOG_EXTENSION: &str = "ndjson";

/// Stores each canvas log as `<canvas_id>.ndjson` in a directory.
#[derive(Debug, Clone)]
pub struct FileLogStorage {
    base_path: PathBuf,
}

impl FileLogStorage {
    /// Use `base_path`, creating it if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(|e| {
                StorageError::Io(format!("Failed to create storage directory: {e}"))
            })?;
        }
        Ok(Self { base_path })
    }

    /// Storage in `<data dir>/sketchboard/logs`.
    pub fn default_location() -> StorageResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;
        Self::new(base.join("sketchboard").join("logs"))
    }

    /// Path of the log for `canvas_id`.
    pub fn log_path(&self, canvas_id: &str) -> PathBuf {
        let safe_id: String = canvas_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_path.join(format!("{safe_id}.{LOG_EXTENSION}"))
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> StorageError {
    StorageError::Io(format!("Failed to {action} {}: {e}", path.display()))
}

impl LogStorage for FileLogStorage {
    fn save(&self, canvas_id: &str, log: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.log_path(canvas_id);
        let log = log.to_string();
        Box::pin(async move { fs::write(&path, log).map_err(|e| io_error("write", &path, e)) })
    }

    fn load(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<String>> {
        let path = self.log_path(canvas_id);
        let canvas_id = canvas_id.to_string();
        Box::pin(async move {
            if !path.exists() {
                return Err(StorageError::NotFound(canvas_id));
            }
            let bytes = fs::read(&path).map_err(|e| io_error("read", &path, e))?;
            String::from_utf8(bytes).map_err(|e| {
                StorageError::Serialization(format!("{} is not UTF-8: {e}", path.display()))
            })
        })
    }

    fn delete(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.log_path(canvas_id);
        Box::pin(async move {
            if path.exists() {
                fs::remove_file(&path).map_err(|e| io_error("delete", &path, e))?;
            }
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>> {
        let base = self.base_path.clone();
        Box::pin(async move {
            if !base.exists() {
                return Ok(vec![]);
            }
            let entries = fs::read_dir(&base)
                .map_err(|e| StorageError::Io(format!("Failed to read directory: {e}")))?;
            let ids = entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == LOG_EXTENSION))
                .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect();
            Ok(ids)
        })
    }

    fn exists(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<bool>> {
        let path = self.log_path(canvas_id);
        Box::pin(async move { Ok(path.exists()) })
    }

    fn append(&self, canvas_id: &str, lines: &[String]) -> BoxFuture<'_, StorageResult<()>> {
        let path = self.log_path(canvas_id);
        let tail = join_lines(lines);
        Box::pin(async move {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| io_error("open", &path, e))?;
            file.write_all(tail.as_bytes())
                .map_err(|e| io_error("append to", &path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_storage_save_load() {
        let dir = tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path()).unwrap();

        storage.save("canvas-1", "line\n").await.unwrap();
        assert_eq!(storage.load("canvas-1").await.unwrap(), "line\n");
        assert!(dir.path().join("canvas-1.ndjson").exists());
    }

    #[tokio::test]
    async fn test_file_storage_not_found() {
        let dir = tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path()).unwrap();
        assert!(matches!(storage.load("nonexistent").await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_file_storage_list_ignores_other_files() {
        let dir = tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path()).unwrap();
        storage.save("c1", "").await.unwrap();
        storage.save("c2", "").await.unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let mut list = storage.list().await.unwrap();
        list.sort();
        assert_eq!(list, vec!["c1".to_string(), "c2".to_string()]);
    }

    #[tokio::test]
    async fn test_file_storage_delete() {
        let dir = tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path()).unwrap();
        storage.save("c1", "").await.unwrap();
        assert!(storage.exists("c1").await.unwrap());
        storage.delete("c1").await.unwrap();
        assert!(!storage.exists("c1").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_storage_sanitizes_id() {
        let dir = tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path()).unwrap();
        storage.save("../room:1", "x\n").await.unwrap();

        assert_eq!(storage.log_path("../room:1"), dir.path().join("___room_1.ndjson"));
        assert_eq!(storage.load("../room:1").await.unwrap(), "x\n");
    }

    #[tokio::test]
    async fn test_file_storage_append() {
        let dir = tempdir().unwrap();
        let storage = FileLogStorage::new(dir.path().join("nested")).unwrap();
        storage.append("c1", &["a".to_string()]).await.unwrap();
        storage.append("c1", &["b".to_string(), "c".to_string()]).await.unwrap();
        assert_eq!(storage.load("c1").await.unwrap(), "a\nb\nc\n");
    }
}
