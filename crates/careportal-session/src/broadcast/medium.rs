//! Shared key-value medium implementations.
//!
//! The medium is overwrite-only and last-write-wins. `MemoryMedium` serves
//! single-process hosts and tests and can deliver every write in order;
//! `FileMedium` is passive (no notifications) and relies on the
//! broadcaster's polling watcher, mirroring platforms where change events
//! are not delivered reliably.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::APP_NAME;

/// File name for the published session record
const SESSION_RECORD_FILE: &str = "current_session";

/// Buffer size for in-process change notifications.
/// Publishes are rare (login, renewal rotation); 64 absorbs bursts in tests.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Shared storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shared storage record malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("No shared storage location available")]
    Unavailable,
}

/// A key-value slot shared by sibling client instances. Last write wins.
pub trait SharedMedium: Send + Sync {
    fn write(&self, value: &str) -> Result<(), StorageError>;

    fn read(&self) -> Result<Option<String>, StorageError>;

    fn clear(&self) -> Result<(), StorageError>;

    /// Ordered change notifications, when the medium can deliver them.
    /// Writers receive their own writes here; the broadcaster filters
    /// self-echoes by tab identity.
    fn notifications(&self) -> Option<broadcast::Receiver<String>> {
        None
    }
}

/// In-process shared slot with ordered notifications.
pub struct MemoryMedium {
    slot: Mutex<Option<String>>,
    tx: broadcast::Sender<String>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            slot: Mutex::new(None),
            tx,
        }
    }
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMedium for MemoryMedium {
    fn write(&self, value: &str) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
        let _ = self.tx.send(value.to_string());
        Ok(())
    }

    fn read(&self) -> Result<Option<String>, StorageError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn clear(&self) -> Result<(), StorageError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn notifications(&self) -> Option<broadcast::Receiver<String>> {
        Some(self.tx.subscribe())
    }
}

/// On-disk shared slot, readable by every process of the same user.
/// Writes go through a temp file and rename so readers never observe a
/// partial record.
pub struct FileMedium {
    path: PathBuf,
}

impl FileMedium {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The default record location under the user cache directory.
    pub fn default_location() -> Result<Self, StorageError> {
        let cache_dir = dirs::cache_dir().ok_or(StorageError::Unavailable)?;
        Ok(Self::new(cache_dir.join(APP_NAME).join(SESSION_RECORD_FILE)))
    }
}

impl SharedMedium for FileMedium {
    fn write(&self, value: &str) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read(&self) -> Result<Option<String>, StorageError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(contents))
    }

    fn clear(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_medium_last_write_wins() {
        let medium = MemoryMedium::new();
        assert_eq!(medium.read().unwrap(), None);

        medium.write("one").unwrap();
        medium.write("two").unwrap();
        assert_eq!(medium.read().unwrap().as_deref(), Some("two"));

        medium.clear().unwrap();
        assert_eq!(medium.read().unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_medium_notifies_in_write_order() {
        let medium = MemoryMedium::new();
        let mut rx = medium.notifications().unwrap();

        medium.write("a").unwrap();
        medium.write("b").unwrap();
        medium.write("c").unwrap();

        assert_eq!(rx.recv().await.unwrap(), "a");
        assert_eq!(rx.recv().await.unwrap(), "b");
        assert_eq!(rx.recv().await.unwrap(), "c");
    }

    #[test]
    fn test_file_medium_round_trip() {
        let dir = std::env::temp_dir().join(format!("careportal-test-{}", std::process::id()));
        let medium = FileMedium::new(dir.join("current_session"));

        assert_eq!(medium.read().unwrap(), None);
        medium.write(r#"{"sessionId":"S1","tabId":"t"}"#).unwrap();
        assert_eq!(
            medium.read().unwrap().as_deref(),
            Some(r#"{"sessionId":"S1","tabId":"t"}"#)
        );

        medium.clear().unwrap();
        assert_eq!(medium.read().unwrap(), None);
        // Clearing again is harmless.
        medium.clear().unwrap();

        let _ = std::fs::remove_dir_all(dir);
    }
}
