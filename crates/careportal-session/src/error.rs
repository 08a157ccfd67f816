//! Session error taxonomy.
//!
//! Every variant here resolves locally to "clear credentials and signal
//! re-authentication" — none of them should reach UI code as an unhandled
//! failure. Non-authentication error classes (access denied, rate limited,
//! server errors) are surfaced to callers unmodified; retry policy belongs
//! to callers.

use thiserror::Error;

use crate::broadcast::StorageError;
use crate::events::LogoutReason;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session expired - local clock passed the expiry timestamp")]
    CredentialExpired,

    #[error("Unauthorized - credential rejected by the server")]
    CredentialRejected,

    #[error("Session superseded by a newer login")]
    SessionSuperseded,

    #[error("Session renewal failed: {0}")]
    RenewalFailed(String),

    #[error("Shared session storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// An ended session surfaces as the matching error when a caller keeps
/// using it after the invalidation event.
impl From<LogoutReason> for SessionError {
    fn from(reason: LogoutReason) -> Self {
        match reason {
            LogoutReason::Expired => SessionError::CredentialExpired,
            LogoutReason::Superseded => SessionError::SessionSuperseded,
            LogoutReason::Rejected => SessionError::CredentialRejected,
        }
    }
}

impl SessionError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => SessionError::CredentialRejected,
            403 => SessionError::AccessDenied(truncated),
            429 => SessionError::RateLimited,
            500..=599 => SessionError::ServerError(truncated),
            _ => SessionError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}
