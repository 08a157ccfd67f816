//! Cross-tab session broadcasting.
//!
//! This module provides:
//! - `SharedMedium`: a publish/overwrite key-value medium shared by every
//!   client instance of the same user profile, with optional ordered change
//!   notifications
//! - `MemoryMedium` / `FileMedium`: in-process and on-disk implementations
//! - `Broadcaster`: stamps published session identifiers with a per-instance
//!   tab identity and forwards other instances' changes in publish order
//!
//! Only the non-secret session identifier ever reaches the shared medium;
//! the credential bundle stays in the per-instance store.

pub mod broadcaster;
pub mod medium;

pub use broadcaster::{Broadcaster, SessionStamp};
pub use medium::{FileMedium, MemoryMedium, SharedMedium, StorageError};
