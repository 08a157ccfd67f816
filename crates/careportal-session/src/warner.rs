//! Inactivity expiry warner.
//!
//! State machine: Inactive -> Watching (expiry known) -> Warning (remaining
//! time within the warning window) and back, with expiry forcing
//! invalidation. A single tick drives both the countdown and the expiry
//! check; seconds remaining are always recomputed from the absolute expiry
//! timestamp and the injected clock, never from a decrementing counter, so
//! a throttled or backgrounded instance cannot drift.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::auth::CredentialStore;
use crate::clock::Clock;
use crate::events::{LogoutReason, SessionEvents};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnerState {
    Inactive,
    Watching,
    Warning,
}

/// Whole seconds until `expiry`, never negative. Rounds up so the countdown
/// shows 120 at exactly two minutes out and reaches 0 only at the expiry
/// instant.
pub fn seconds_remaining(now: DateTime<Utc>, expiry: DateTime<Utc>) -> i64 {
    let millis = (expiry - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        (millis + 999) / 1000
    }
}

pub struct ExpiryWarner {
    store: Arc<CredentialStore>,
    clock: Arc<dyn Clock>,
    events: Arc<SessionEvents>,
    warning_window: Duration,
    tick: StdDuration,
    state: Arc<Mutex<WarnerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ExpiryWarner {
    pub fn new(
        store: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
        events: Arc<SessionEvents>,
        warning_window: Duration,
        tick: StdDuration,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            warning_window,
            tick,
            state: Arc::new(Mutex::new(WarnerState::Inactive)),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WarnerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_warning_visible(&self) -> bool {
        self.state() == WarnerState::Warning
    }

    /// Seconds until the stored expiry, recomputed from the clock on every
    /// call; 0 when unauthenticated or already expired.
    pub fn seconds_remaining(&self) -> i64 {
        match self.store.expires_at() {
            Some(expiry) => seconds_remaining(self.clock.now(), expiry),
            None => 0,
        }
    }

    /// Start watching the expiry timestamp currently in the store.
    /// Re-arming replaces any previous watch.
    pub fn arm(&self) {
        self.disarm();
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WarnerState::Watching;

        let store = self.store.clone();
        let clock = self.clock.clone();
        let events = self.events.clone();
        let state = self.state.clone();
        let warning_window = self.warning_window;
        let tick = self.tick;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if events.invalidated().is_some() {
                    *state.lock().unwrap_or_else(PoisonError::into_inner) =
                        WarnerState::Inactive;
                    break;
                }
                let Some(expiry) = store.expires_at() else {
                    // Logged out under us.
                    *state.lock().unwrap_or_else(PoisonError::into_inner) =
                        WarnerState::Inactive;
                    break;
                };

                let now = clock.now();
                if now >= expiry {
                    // Unconditional: fires whether or not the user ever
                    // interacted with the warning.
                    events.invalidate(LogoutReason::Expired);
                    *state.lock().unwrap_or_else(PoisonError::into_inner) =
                        WarnerState::Inactive;
                    break;
                }

                let in_window = expiry - now <= warning_window;
                let previous = {
                    let mut st = state.lock().unwrap_or_else(PoisonError::into_inner);
                    let previous = *st;
                    *st = if in_window {
                        WarnerState::Warning
                    } else {
                        WarnerState::Watching
                    };
                    previous
                };
                match (previous, in_window) {
                    (WarnerState::Watching, true) => {
                        debug!("session entering warning window");
                        events.warning_started(seconds_remaining(now, expiry));
                    }
                    (WarnerState::Warning, false) => {
                        events.warning_cleared();
                    }
                    _ => {}
                }
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Apply a refreshed expiry (successful extend or renewal). Exits the
    /// warning immediately rather than waiting for the next tick.
    pub fn refresh(&self, new_expiry: DateTime<Utc>) {
        self.store.set_expires_at(new_expiry);
        let now = self.clock.now();
        let still_in_window = new_expiry - now <= self.warning_window;
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *st == WarnerState::Warning && !still_in_window {
            *st = WarnerState::Watching;
            drop(st);
            self.events.warning_cleared();
        }
    }

    /// Stop watching. Cancels the tick rather than letting it fire into a
    /// logged-out state.
    pub fn disarm(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WarnerState::Inactive;
    }
}

impl Drop for ExpiryWarner {
    fn drop(&mut self) {
        self.disarm();
    }
}
