//! Session identifier broadcaster.
//!
//! Publishes the current session identifier to the shared medium stamped
//! with this instance's tab identity, and forwards changes made by *other*
//! instances to subscribers in publish order. Self-echoes are suppressed by
//! comparing tab identities, emulating storage-event semantics where the
//! writer does not receive its own notification.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::medium::{SharedMedium, StorageError};

/// Length of the per-instance tab identity.
/// 12 alphanumeric characters is comfortably collision-free for the handful
/// of instances a user profile runs at once.
const TAB_ID_LENGTH: usize = 12;

/// Buffer size for forwarded stamps.
const FORWARD_CHANNEL_CAPACITY: usize = 64;

/// The record published to the shared medium. Contains no secret material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStamp {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "tabId")]
    pub tab_id: String,
}

/// Generate a tab identity. Random, never persisted, regenerated for every
/// instance lifetime.
fn generate_tab_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TAB_ID_LENGTH)
        .map(char::from)
        .collect()
}

pub struct Broadcaster {
    medium: Arc<dyn SharedMedium>,
    tab_id: String,
    tx: broadcast::Sender<SessionStamp>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Broadcaster {
    /// Must be called from within a tokio runtime; spawns the watcher task
    /// that forwards other instances' writes.
    pub fn new(medium: Arc<dyn SharedMedium>, watch_interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(FORWARD_CHANNEL_CAPACITY);
        let broadcaster = Self {
            medium,
            tab_id: generate_tab_id(),
            tx,
            watcher: Mutex::new(None),
        };
        broadcaster.spawn_watcher(watch_interval);
        broadcaster
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    /// Publish the session identifier. Sibling instances observe it; this
    /// instance does not notify itself.
    pub fn publish(&self, session_id: &str) -> Result<(), StorageError> {
        let stamp = SessionStamp {
            session_id: session_id.to_string(),
            tab_id: self.tab_id.clone(),
        };
        let raw = serde_json::to_string(&stamp)?;
        self.medium.write(&raw)
    }

    /// The most recent published record, regardless of which instance wrote
    /// it. This is the monitor's polling fallback.
    pub fn read_current(&self) -> Result<Option<SessionStamp>, StorageError> {
        match self.medium.read()? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Remove the published record so late-joining instances see no session.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.medium.clear()
    }

    /// Stamps published by other instances, in publish order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionStamp> {
        self.tx.subscribe()
    }

    fn spawn_watcher(&self, watch_interval: Duration) {
        let medium = self.medium.clone();
        let tx = self.tx.clone();
        let tab_id = self.tab_id.clone();

        // Subscribe (or capture the poll baseline) before spawning, so a
        // publish that lands while the task is still starting is not lost.
        let notifications = medium.notifications();
        let baseline = match &notifications {
            Some(_) => None,
            None => Some(medium.read().unwrap_or_default()),
        };

        let handle = tokio::spawn(async move {
            match notifications {
                Some(mut rx) => loop {
                    match rx.recv().await {
                        Ok(raw) => forward(&tx, &tab_id, &raw),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            debug!(missed, "medium notifications lagged; continuing");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                },
                None => {
                    // Passive medium: watch for changes by polling. Values
                    // already present at startup are not replayed.
                    let mut last = baseline.unwrap_or_default();
                    let mut tick = tokio::time::interval(watch_interval);
                    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        tick.tick().await;
                        match medium.read() {
                            Ok(current) => {
                                if current != last {
                                    if let Some(raw) = &current {
                                        forward(&tx, &tab_id, raw);
                                    }
                                    last = current;
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "shared medium read failed; will retry");
                            }
                        }
                    }
                }
            }
        });
        *self.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }
}

fn forward(tx: &broadcast::Sender<SessionStamp>, own_tab: &str, raw: &str) {
    match serde_json::from_str::<SessionStamp>(raw) {
        Ok(stamp) if stamp.tab_id == own_tab => {} // self-echo
        Ok(stamp) => {
            let _ = tx.send(stamp);
        }
        Err(e) => {
            warn!(error = %e, "ignoring malformed session record");
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        if let Some(handle) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}
