//! Session and credential lifecycle core for the CarePortal client.
//!
//! This crate holds the short-lived access credential for one client
//! instance, silently renews it, detects logout/invalidation across sibling
//! instances of the same user profile, enforces a single active session per
//! account, and warns before forcing logout on inactivity.
//!
//! The rest of the application — screens, forms, endpoint wrappers, route
//! guards — consumes this crate through three narrow surfaces:
//!
//! - [`SessionManager`] for login/logout/extend and the warning countdown
//! - [`ApiClient`] for authenticated requests with automatic credential
//!   attachment and rejection handling
//! - the [`SessionEvent`] subscription for redirect and toast UI
//!
//! Secrets never leave the per-instance [`CredentialStore`]; only the
//! non-secret session identifier crosses the shared medium.

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod monitor;
pub mod warner;

pub use api::{ApiClient, LoginGrant};
pub use auth::{CredentialStore, KeyringVault, MemoryVault, RenewalVault};
pub use broadcast::{Broadcaster, FileMedium, MemoryMedium, SessionStamp, SharedMedium, StorageError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SessionConfig;
pub use error::SessionError;
pub use events::{LogoutReason, SessionEvent, SessionEvents};
pub use manager::SessionManager;
pub use monitor::{MonitorState, SessionMonitor};
pub use warner::{seconds_remaining, ExpiryWarner, WarnerState};
