//! Periodic persistence of a session's event log.

use crate::replay::EventLog;
use crate::storage::{LogStorage, StorageResult};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default auto-save interval in seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;

/// Saves an [`EventLog`] when it changed and the interval elapsed.
pub struct LogAutoSave<S: LogStorage> {
    storage: Arc<S>,
    canvas_id: String,
    interval: Duration,
    last_save: Option<Instant>,
    /// Log revision written by the last save.
    saved_revision: Option<u64>,
}

impl<S: LogStorage> LogAutoSave<S> {
    pub fn new(storage: Arc<S>, canvas_id: impl Into<String>) -> Self {
        Self {
            storage,
            canvas_id: canvas_id.into(),
            interval: Duration::from_secs(DEFAULT_AUTOSAVE_INTERVAL_SECS),
            last_save: None,
            saved_revision: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }

    /// True if `log` changed since the last save.
    pub fn is_dirty(&self, log: &EventLog) -> bool {
        self.saved_revision != Some(log.revision())
    }

    pub fn should_save(&self, log: &EventLog) -> bool {
        if !self.is_dirty(log) {
            return false;
        }
        match self.last_save {
            Some(last) => last.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Save if dirty and the interval elapsed. Returns true if it saved.
    pub async fn maybe_save(&mut self, log: &EventLog) -> StorageResult<bool> {
        if !self.should_save(log) {
            return Ok(false);
        }
        self.save(log).await?;
        Ok(true)
    }

    /// Save immediately.
    pub async fn save(&mut self, log: &EventLog) -> StorageResult<()> {
        self.storage.save(&self.canvas_id, &log.text()).await?;
        self.last_save = Some(Instant::now());
        self.saved_revision = Some(log.revision());
        log::debug!("Saved {} log lines for canvas {}", log.len(), self.canvas_id);
        Ok(())
    }

    /// Load the stored log text, if any.
    pub async fn load(&self) -> StorageResult<Option<String>> {
        if !self.storage.exists(&self.canvas_id).await? {
            return Ok(None);
        }
        self.storage.load(&self.canvas_id).await.map(Some)
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DomainEvent;
    use crate::identity::ShapeId;
    use crate::storage::MemoryLogStorage;

    fn log_with_one_line() -> EventLog {
        let mut log = EventLog::new();
        log.append(&DomainEvent::remove_shape(ShapeId::from("a:0"))).unwrap();
        log
    }

    #[tokio::test]
    async fn test_first_save_then_clean() {
        let storage = Arc::new(MemoryLogStorage::new());
        let mut autosave = LogAutoSave::new(storage.clone(), "c1");
        let log = log_with_one_line();

        assert!(autosave.should_save(&log));
        assert!(autosave.maybe_save(&log).await.unwrap());
        assert!(!autosave.is_dirty(&log));
        assert!(!autosave.maybe_save(&log).await.unwrap());
        assert_eq!(storage.load("c1").await.unwrap(), log.text());
    }

    #[tokio::test]
    async fn test_interval_gates_saves() {
        let storage = Arc::new(MemoryLogStorage::new());
        let mut autosave = LogAutoSave::new(storage, "c1").with_interval(Duration::from_secs(3600));
        let mut log = log_with_one_line();
        autosave.save(&log).await.unwrap();

        log.append(&DomainEvent::clear_canvas()).unwrap();
        assert!(autosave.is_dirty(&log));
        assert!(!autosave.maybe_save(&log).await.unwrap());

        let mut eager = autosave.with_interval(Duration::ZERO);
        assert!(eager.maybe_save(&log).await.unwrap());
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let storage = Arc::new(MemoryLogStorage::new());
        let mut autosave = LogAutoSave::new(storage, "c1");
        assert_eq!(autosave.load().await.unwrap(), None);
        autosave.save(&log_with_one_line()).await.unwrap();
        assert!(autosave.load().await.unwrap().is_some());
    }
}
