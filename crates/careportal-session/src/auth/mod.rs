//! Credential storage for the current client instance.
//!
//! This module provides:
//! - `CredentialStore`: synchronous, non-throwing storage for the credential
//!   bundle, session identifier, and expiry timestamp
//! - `RenewalVault`: optional out-of-process storage for the renewal token,
//!   with an OS keychain implementation via keyring
//!
//! The store is scoped to one client instance; cross-tab visibility is the
//! broadcaster's job, and the store never touches the shared medium.

pub mod store;
pub mod vault;

pub use store::CredentialStore;
pub use vault::{KeyringVault, MemoryVault, RenewalVault};
