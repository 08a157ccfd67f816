//! Per-instance credential store.
//!
//! Holds the credential bundle (access token, renewal token, anti-forgery
//! token) together with the session identifier and expiry timestamp, which
//! share its lifecycle and are destroyed with it in one `clear_all`.
//!
//! All operations are synchronous and non-throwing; absence is `None`,
//! never an error. When a `RenewalVault` is attached the renewal token is
//! kept out of process memory; vault failures degrade to the in-memory slot
//! with a warning.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::vault::RenewalVault;

#[derive(Debug, Default)]
struct Bundle {
    access: Option<String>,
    renewal: Option<String>,
    anti_forgery: Option<String>,
    session_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct CredentialStore {
    inner: Mutex<Bundle>,
    vault: Option<Box<dyn RenewalVault>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vault(vault: Box<dyn RenewalVault>) -> Self {
        Self {
            inner: Mutex::new(Bundle::default()),
            vault: Some(vault),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bundle> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_access(&self, token: impl Into<String>) {
        self.lock().access = Some(token.into());
    }

    pub fn access(&self) -> Option<String> {
        self.lock().access.clone()
    }

    pub fn set_renewal(&self, token: impl Into<String>) {
        let token = token.into();
        if let Some(vault) = &self.vault {
            match vault.store(&token) {
                Ok(()) => return,
                Err(e) => {
                    warn!(error = %e, "renewal vault write failed; keeping token in memory");
                }
            }
        }
        self.lock().renewal = Some(token);
    }

    pub fn renewal(&self) -> Option<String> {
        if let Some(token) = self.lock().renewal.clone() {
            return Some(token);
        }
        if let Some(vault) = &self.vault {
            match vault.get() {
                Ok(token) => return token,
                Err(e) => {
                    warn!(error = %e, "renewal vault read failed; treating token as absent");
                }
            }
        }
        None
    }

    pub fn set_anti_forgery(&self, token: impl Into<String>) {
        self.lock().anti_forgery = Some(token.into());
    }

    pub fn anti_forgery(&self) -> Option<String> {
        self.lock().anti_forgery.clone()
    }

    pub fn set_session_id(&self, id: impl Into<String>) {
        self.lock().session_id = Some(id.into());
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    pub fn set_expires_at(&self, at: DateTime<Utc>) {
        self.lock().expires_at = Some(at);
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.lock().expires_at
    }

    /// Write the fields a login or renewal grant establishes, in one lock.
    pub fn install(
        &self,
        access: impl Into<String>,
        renewal: Option<String>,
        session_id: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        {
            let mut bundle = self.lock();
            bundle.access = Some(access.into());
            bundle.session_id = Some(session_id.into());
            bundle.expires_at = Some(expires_at);
        }
        if let Some(renewal) = renewal {
            self.set_renewal(renewal);
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().access.is_some()
    }

    /// Remove every credential field. Idempotent; safe to call when empty.
    pub fn clear_all(&self) {
        *self.lock() = Bundle::default();
        if let Some(vault) = &self.vault {
            if let Err(e) = vault.delete() {
                warn!(error = %e, "renewal vault delete failed");
            }
        }
    }
}
