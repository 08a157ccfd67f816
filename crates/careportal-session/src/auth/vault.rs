//! Out-of-process renewal token storage.
//!
//! The renewal credential outlives the access token and ideally lives where
//! application code cannot casually read it. `KeyringVault` keeps it in the
//! OS keychain; `MemoryVault` is the in-process fallback. Vault failures are
//! degraded to "absent" by the credential store, never surfaced as panics.

use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "careportal";

pub trait RenewalVault: Send + Sync {
    fn store(&self, token: &str) -> Result<()>;
    fn get(&self) -> Result<Option<String>>;
    fn delete(&self) -> Result<()>;
}

/// Keeps the renewal token in process memory. Used when no keychain is
/// available or configured.
#[derive(Debug, Default)]
pub struct MemoryVault {
    token: Mutex<Option<String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenewalVault for MemoryVault {
    fn store(&self, token: &str) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        Ok(())
    }

    fn get(&self) -> Result<Option<String>> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn delete(&self) -> Result<()> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Keeps the renewal token in the OS keychain, keyed by account username.
pub struct KeyringVault {
    username: String,
}

impl KeyringVault {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &self.username).context("Failed to create keyring entry")
    }
}

impl RenewalVault for KeyringVault {
    fn store(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store renewal token in keychain")?;
        Ok(())
    }

    fn get(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read renewal token from keychain"),
        }
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete renewal token from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_vault_round_trip() {
        let vault = MemoryVault::new();
        assert_eq!(vault.get().unwrap(), None);

        vault.store("renewal-1").unwrap();
        assert_eq!(vault.get().unwrap().as_deref(), Some("renewal-1"));

        vault.delete().unwrap();
        assert_eq!(vault.get().unwrap(), None);
        // Deleting again is harmless.
        vault.delete().unwrap();
    }
}
