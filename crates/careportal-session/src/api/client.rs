//! Authenticated HTTP client for the portal API.
//!
//! Wraps every outbound request with the credential bundle and handles the
//! authentication-rejection path: on a 401 for an authenticated request the
//! store is cleared and the invalidation latch fires exactly once, so three
//! concurrent rejections (or a rejection triggered by the redirect itself)
//! produce a single notice and a single redirect signal. Authorization
//! failures, rate limits, and server errors pass through unmodified —
//! retry policy belongs to callers.

use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::CredentialStore;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{LogoutReason, SessionEvents};

/// Header carrying the anti-forgery token in both directions.
const CSRF_HEADER: &str = "x-csrf-token";

/// A successful login or renewal response.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginGrant {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(rename = "renewalToken")]
    pub renewal_token: Option<String>,
    #[serde(rename = "expiresInSeconds")]
    pub expires_in_seconds: i64,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct RenewRequest<'a> {
    #[serde(rename = "renewalToken", skip_serializing_if = "Option::is_none")]
    renewal_token: Option<&'a str>,
}

/// Portal API client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    login_path: String,
    renew_path: String,
    store: Arc<CredentialStore>,
    events: Arc<SessionEvents>,
}

impl ApiClient {
    pub fn new(
        config: &SessionConfig,
        store: Arc<CredentialStore>,
        events: Arc<SessionEvents>,
    ) -> Result<Self, SessionError> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            login_path: config.login_path.clone(),
            renew_path: config.renew_path.clone(),
            store,
            events,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Authenticate with the portal. A rejected login is a plain error to
    /// the caller; it does not trip the invalidation latch because no
    /// session existed yet.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginGrant, SessionError> {
        let response = self
            .client
            .post(self.url(&self.login_path))
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        self.capture_rotated_anti_forgery(&response);
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::from_status(status, &body));
        }
        Ok(response.json().await?)
    }

    /// Renew the session, trading the renewal token (or an out-of-band
    /// renewal cookie) for a fresh grant. Every failure mode maps to
    /// `RenewalFailed`; the caller treats it as expiry.
    pub async fn renew(&self) -> Result<LoginGrant, SessionError> {
        let renewal = self.store.renewal();
        let mut request = self.client.post(self.url(&self.renew_path)).json(&RenewRequest {
            renewal_token: renewal.as_deref(),
        });
        request = self.apply_credentials(request, &Method::POST);

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::RenewalFailed(e.to_string()))?;

        self.capture_rotated_anti_forgery(&response);
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::RenewalFailed(format!("status {}", status)));
        }
        response
            .json()
            .await
            .map_err(|e| SessionError::RenewalFailed(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SessionError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SessionError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        self.request(Method::DELETE, path, None::<&()>).await
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, SessionError> {
        // A session that already ended fails locally; no request goes out
        // carrying a dead credential.
        if let Some(reason) = self.events.invalidated() {
            return Err(reason.into());
        }

        // Whether a credential was attached decides if a 401 means "session
        // invalidated" or just "not signed in".
        let had_token = self.store.access().is_some();

        let mut request = self.client.request(method.clone(), self.url(path));
        request = self.apply_credentials(request, &method);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.capture_rotated_anti_forgery(&response);

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED && had_token {
            self.handle_rejection();
            return Err(SessionError::CredentialRejected);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::from_status(status, &body));
        }
        Ok(response.json().await?)
    }

    /// Attach the bearer token, and the anti-forgery token for mutating
    /// methods, when present.
    fn apply_credentials(&self, mut request: RequestBuilder, method: &Method) -> RequestBuilder {
        if let Some(token) = self.store.access() {
            request = request.bearer_auth(token);
        }
        if Self::is_mutating(method) {
            if let Some(anti_forgery) = self.store.anti_forgery() {
                request = request.header(CSRF_HEADER, anti_forgery);
            }
        }
        request
    }

    fn is_mutating(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }

    /// Rotation-on-use: a refreshed anti-forgery token on any response
    /// replaces the stored one for subsequent mutating requests.
    fn capture_rotated_anti_forgery(&self, response: &reqwest::Response) {
        if let Some(value) = response.headers().get(CSRF_HEADER) {
            match value.to_str() {
                Ok(token) => {
                    debug!("anti-forgery token rotated");
                    self.store.set_anti_forgery(token);
                }
                Err(_) => {
                    warn!("ignoring non-ASCII anti-forgery header");
                }
            }
        }
    }

    fn handle_rejection(&self) {
        if self.events.invalidate(LogoutReason::Rejected) {
            warn!("request rejected by the server; credentials cleared");
        }
    }
}
