//! Cross-tab session supersession monitor.
//!
//! Per-instance state machine: Unarmed (not authenticated) -> Armed
//! (watching) -> Invalidated (forced logout) -> Unarmed after logout.
//!
//! While armed, the monitor reacts to broadcast notifications carrying a
//! session identifier different from this instance's own, and redundantly
//! polls the shared medium on a fixed interval — change notifications are
//! not delivered reliably in every host context (the originating instance,
//! or one that was asleep), so polling is the fallback correctness
//! mechanism. When the medium is unreadable the monitor degrades to
//! notification-only and never blocks login.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::broadcast::Broadcaster;
use crate::events::{LogoutReason, SessionEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Unarmed,
    Armed,
    Invalidated,
}

pub struct SessionMonitor {
    store: Arc<CredentialStore>,
    broadcaster: Arc<Broadcaster>,
    events: Arc<SessionEvents>,
    poll_interval: Duration,
    state: Arc<Mutex<MonitorState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionMonitor {
    pub fn new(
        store: Arc<CredentialStore>,
        broadcaster: Arc<Broadcaster>,
        events: Arc<SessionEvents>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            events,
            poll_interval,
            state: Arc::new(Mutex::new(MonitorState::Unarmed)),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> MonitorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start watching for supersession of the session identifier currently
    /// in the credential store. Re-arming replaces any previous watch.
    pub fn arm(&self) {
        self.disarm();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = MonitorState::Armed;

        // Subscribe before the task starts so no publish is missed between
        // arming and the first poll.
        let mut rx = self.broadcaster.subscribe();
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();
        let events = self.events.clone();
        let state = self.state.clone();
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                // Logout clears the store; another detector may have latched.
                let Some(expected) = store.session_id() else {
                    *state.lock().unwrap_or_else(PoisonError::into_inner) =
                        MonitorState::Unarmed;
                    break;
                };
                if events.invalidated().is_some() {
                    *state.lock().unwrap_or_else(PoisonError::into_inner) =
                        MonitorState::Invalidated;
                    break;
                }

                tokio::select! {
                    _ = poll.tick() => {
                        match broadcaster.read_current() {
                            Ok(Some(stamp)) if stamp.session_id != expected => {
                                invalidate(&state, &events);
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(
                                    error = %e,
                                    "shared medium unavailable; relying on notifications only"
                                );
                            }
                        }
                    }
                    msg = rx.recv() => {
                        use tokio::sync::broadcast::error::RecvError;
                        match msg {
                            Ok(stamp) if stamp.session_id != expected => {
                                invalidate(&state, &events);
                                break;
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(missed)) => {
                                debug!(missed, "monitor lagged behind notifications");
                            }
                            // The broadcaster outlives this task, so the
                            // channel reopens with a fresh receiver.
                            Err(RecvError::Closed) => {
                                rx = broadcaster.subscribe();
                            }
                        }
                    }
                }
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Stop watching and return to Unarmed. Cancels the poll timer rather
    /// than letting it fire into a logged-out state.
    pub fn disarm(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = MonitorState::Unarmed;
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

fn invalidate(state: &Arc<Mutex<MonitorState>>, events: &Arc<SessionEvents>) {
    // The latch deduplicates against the poll/notification race and against
    // the warner and interceptor; losing it here is a no-op.
    if events.invalidate(LogoutReason::Superseded) {
        debug!("session superseded by another login");
    }
    *state.lock().unwrap_or_else(PoisonError::into_inner) = MonitorState::Invalidated;
}
