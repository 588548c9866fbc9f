//! Persistence for canvas event logs.

mod autosave;
mod file;
mod memory;

pub use autosave::{DEFAULT_AUTOSAVE_INTERVAL_SECS, LogAutoSave};
pub use file::{FileLogStorage, LOG_EXTENSION};
pub use memory::MemoryLogStorage;

use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Log not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Boxed future returned by storage backends.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Backend holding one NDJSON event log per canvas id.
pub trait LogStorage: Send + Sync {
    /// Replace the log of `canvas_id`.
    fn save(&self, canvas_id: &str, log: &str) -> BoxFuture<'_, StorageResult<()>>;

    fn load(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<String>>;

    /// Delete a log. Deleting a missing log succeeds.
    fn delete(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<()>>;

    /// List all canvas ids with a stored log.
    fn list(&self) -> BoxFuture<'_, StorageResult<Vec<String>>>;

    fn exists(&self, canvas_id: &str) -> BoxFuture<'_, StorageResult<bool>>;

    /// Append lines to a log, creating it if needed.
    fn append(&self, canvas_id: &str, lines: &[String]) -> BoxFuture<'_, StorageResult<()>> {
        let canvas_id = canvas_id.to_string();
        let tail = join_lines(lines);
        Box::pin(async move {
            let mut log = match self.load(&canvas_id).await {
                Ok(log) => log,
                Err(StorageError::NotFound(_)) => String::new(),
                Err(e) => return Err(e),
            };
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&tail);
            self.save(&canvas_id, &log).await
        })
    }
}

/// Join lines into NDJSON with a trailing newline.
pub fn join_lines(lines: &[String]) -> String {
    let mut text = String::new();
    for line in lines {
        text.push_str(line.trim_end_matches(['\r', '\n']));
        text.push('\n');
    }
    text
}
