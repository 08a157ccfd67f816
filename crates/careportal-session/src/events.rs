//! Session events and the invalidation latch.
//!
//! The monitor's poll, the broadcast notification handler, the expiry
//! warner, and the network interceptor can all observe the same
//! invalidation. `SessionEvents` deduplicates them: the first detector wins,
//! clears the credential store, and emits exactly one `Invalidated` event
//! per episode; later detections are no-ops until the latch is reset by the
//! next login or an explicit logout.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::info;

use crate::auth::CredentialStore;

/// Buffer size for the event channel.
/// Invalidation emits one event per episode and warnings are rare; 32 leaves
/// headroom for slow subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Why the current session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The expiry timestamp passed without an extension.
    Expired,
    /// Another login for the same account started elsewhere.
    Superseded,
    /// The server rejected the credential on a request.
    Rejected,
}

impl LogoutReason {
    /// Human-readable, one-per-episode notice for toast/notification UI.
    pub fn message(&self) -> &'static str {
        match self {
            LogoutReason::Expired => {
                "Your session ended because you were inactive. Please sign in again."
            }
            LogoutReason::Superseded => {
                "You were signed out because your account signed in somewhere else."
            }
            LogoutReason::Rejected => "Your session is no longer valid. Please sign in again.",
        }
    }
}

impl fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session entered the warning window; the UI should show the
    /// countdown with extend / logout-now actions.
    WarningStarted { seconds_remaining: i64 },
    /// The warning resolved without logout (the expiry moved out again).
    WarningCleared,
    /// The session ended. Subscribers should navigate to re-authentication;
    /// this fires exactly once per invalidation episode.
    Invalidated { reason: LogoutReason },
}

pub struct SessionEvents {
    store: Arc<CredentialStore>,
    tx: broadcast::Sender<SessionEvent>,
    latch: Mutex<Option<LogoutReason>>,
}

impl SessionEvents {
    pub fn new(store: Arc<CredentialStore>) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            tx,
            latch: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn warning_started(&self, seconds_remaining: i64) {
        let _ = self.tx.send(SessionEvent::WarningStarted { seconds_remaining });
    }

    pub fn warning_cleared(&self) {
        let _ = self.tx.send(SessionEvent::WarningCleared);
    }

    /// End the current session episode. The first caller clears the
    /// credential store and emits the `Invalidated` event; returns whether
    /// this call won the latch.
    pub fn invalidate(&self, reason: LogoutReason) -> bool {
        let mut latch = self.latch.lock().unwrap_or_else(PoisonError::into_inner);
        if latch.is_some() {
            return false;
        }
        *latch = Some(reason);
        self.store.clear_all();
        info!(%reason, "session invalidated");
        let _ = self.tx.send(SessionEvent::Invalidated { reason });
        true
    }

    /// The reason the latch fired, if it has.
    pub fn invalidated(&self) -> Option<LogoutReason> {
        *self.latch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-arm for a fresh session episode (called on login and on logout).
    pub fn reset(&self) {
        *self.latch.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
