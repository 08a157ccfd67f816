//! Session lifecycle coordination.
//!
//! `SessionManager` wires the credential store, broadcaster, monitor,
//! warner, and API client together and exposes the surface the rest of the
//! application consumes: login/logout, extend, the warning accessors for
//! countdown UI, and the event subscription route guards and toast UI hang
//! off of. It is an explicitly constructed object with a defined lifecycle,
//! passed to callers rather than reached for as ambient state.

use std::sync::Arc;

use chrono::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, LoginGrant};
use crate::auth::CredentialStore;
use crate::broadcast::{Broadcaster, FileMedium, SharedMedium};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{LogoutReason, SessionEvent, SessionEvents};
use crate::monitor::SessionMonitor;
use crate::warner::ExpiryWarner;

pub struct SessionManager {
    store: Arc<CredentialStore>,
    clock: Arc<dyn Clock>,
    events: Arc<SessionEvents>,
    client: ApiClient,
    broadcaster: Arc<Broadcaster>,
    monitor: SessionMonitor,
    warner: ExpiryWarner,
}

impl SessionManager {
    /// Construct with the system clock and a fresh store. Must be called
    /// from within a tokio runtime; the broadcaster starts its watcher task
    /// immediately.
    pub fn new(
        config: SessionConfig,
        medium: Arc<dyn SharedMedium>,
    ) -> Result<Self, SessionError> {
        Self::with_parts(
            config,
            medium,
            Arc::new(CredentialStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Construct over the on-disk shared medium at its default location,
    /// for hosts with no better channel between sibling instances.
    pub fn with_default_medium(config: SessionConfig) -> Result<Self, SessionError> {
        let medium: Arc<dyn SharedMedium> = Arc::new(FileMedium::default_location()?);
        Self::new(config, medium)
    }

    /// Construct with an injected store and clock, for hosts that attach a
    /// renewal vault or tests that drive time manually.
    pub fn with_parts(
        config: SessionConfig,
        medium: Arc<dyn SharedMedium>,
        store: Arc<CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionError> {
        let events = Arc::new(SessionEvents::new(store.clone()));
        let client = ApiClient::new(&config, store.clone(), events.clone())?;
        let broadcaster = Arc::new(Broadcaster::new(medium, config.medium_watch_interval()));
        let monitor = SessionMonitor::new(
            store.clone(),
            broadcaster.clone(),
            events.clone(),
            config.monitor_poll_interval(),
        );
        let warner = ExpiryWarner::new(
            store.clone(),
            clock.clone(),
            events.clone(),
            config.warning_window(),
            config.warner_tick(),
        );
        Ok(Self {
            store,
            clock,
            events,
            client,
            broadcaster,
            monitor,
            warner,
        })
    }

    /// Authenticate and arm the lifecycle watchers.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let grant = self.client.login(username, password).await?;
        self.install(grant);
        Ok(())
    }

    fn install(&self, grant: LoginGrant) {
        self.events.reset();
        let expires_at = self.clock.now() + Duration::seconds(grant.expires_in_seconds);
        self.store.install(
            grant.access_token,
            grant.renewal_token,
            grant.session_id.clone(),
            expires_at,
        );
        if let Err(e) = self.broadcaster.publish(&grant.session_id) {
            // Degrade to single-tab behavior rather than failing login.
            warn!(error = %e, "session publish failed; cross-tab detection disabled");
        }
        self.monitor.arm();
        self.warner.arm();
        info!(session_id = %grant.session_id, "session established");
    }

    /// Extend the session via a renewal round-trip. On success the warning
    /// (if showing) clears and the countdown jumps to the new expiry; on
    /// failure the session is treated as expired.
    pub async fn extend_session(&self) -> Result<(), SessionError> {
        // An already-ended session cannot be extended; report how it ended
        // instead of a renewal round-trip.
        if let Some(reason) = self.events.invalidated() {
            return Err(reason.into());
        }
        match self.client.renew().await {
            Ok(grant) => {
                let expires_at = self.clock.now() + Duration::seconds(grant.expires_in_seconds);
                let rotated = self.store.session_id().as_deref() != Some(&grant.session_id);
                self.store.install(
                    grant.access_token,
                    grant.renewal_token,
                    grant.session_id.clone(),
                    expires_at,
                );
                if rotated {
                    // The backend minted a new session identifier; publish
                    // it so stale sibling instances get superseded.
                    if let Err(e) = self.broadcaster.publish(&grant.session_id) {
                        warn!(error = %e, "session publish failed after renewal");
                    }
                }
                self.warner.refresh(expires_at);
                debug!(session_id = %grant.session_id, "session extended");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "session renewal failed; treating as expired");
                self.events.invalidate(LogoutReason::Expired);
                self.monitor.disarm();
                self.warner.disarm();
                Err(e)
            }
        }
    }

    /// Self-initiated logout. Teardown happens within one synchronous turn:
    /// both timers are cancelled, the store is cleared, and the one-time
    /// notice latch is reset so a subsequent login re-arms cleanly.
    pub fn logout(&self) {
        self.monitor.disarm();
        self.warner.disarm();
        self.store.clear_all();
        self.events.reset();
        if let Err(e) = self.broadcaster.clear() {
            debug!(error = %e, "failed to clear published session");
        }
        info!("logged out");
    }

    /// The warning dialog's "log out now" action. Ends the episode with the
    /// inactivity notice, then tears down like a normal logout.
    pub fn force_logout(&self) {
        // Nothing to end; invalidating here would notify for a session that
        // does not exist.
        if !self.store.is_authenticated() {
            return;
        }
        self.events.invalidate(LogoutReason::Expired);
        self.monitor.disarm();
        self.warner.disarm();
        if let Err(e) = self.broadcaster.clear() {
            debug!(error = %e, "failed to clear published session");
        }
    }

    /// Read-only auth state for route guards and header UI.
    pub fn current_access_token(&self) -> Option<String> {
        self.store.access()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    pub fn is_session_warning_visible(&self) -> bool {
        self.warner.is_warning_visible()
    }

    pub fn seconds_remaining(&self) -> i64 {
        self.warner.seconds_remaining()
    }

    /// Session lifecycle events: warning started/cleared, invalidated (with
    /// a human-readable reason, exactly once per episode).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The authenticated client endpoint wrappers route through.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::MemoryMedium;
    use crate::clock::ManualClock;
    use crate::monitor::MonitorState;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> SessionConfig {
        SessionConfig {
            base_url: base_url.to_string(),
            monitor_poll_interval_secs: 1,
            warner_tick_millis: 10,
            medium_watch_interval_millis: 10,
            ..SessionConfig::default()
        }
    }

    fn grant_body(session_id: &str, expires_in_seconds: i64) -> serde_json::Value {
        json!({
            "accessToken": format!("access-{session_id}"),
            "renewalToken": format!("renewal-{session_id}"),
            "expiresInSeconds": expires_in_seconds,
            "sessionId": session_id,
        })
    }

    async fn mount_login(server: &MockServer, session_id: &str) {
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body(session_id, 1800)))
            .mount(server)
            .await;
    }

    fn manager(
        server_uri: &str,
        medium: Arc<dyn SharedMedium>,
    ) -> (Arc<ManualClock>, SessionManager) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = SessionManager::with_parts(
            test_config(server_uri),
            medium,
            Arc::new(CredentialStore::new()),
            clock.clone(),
        )
        .unwrap();
        (clock, manager)
    }

    async fn expect_invalidated(
        rx: &mut broadcast::Receiver<SessionEvent>,
    ) -> LogoutReason {
        loop {
            let event = tokio::time::timeout(StdDuration::from_secs(3), rx.recv())
                .await
                .expect("timed out waiting for invalidation")
                .expect("event channel closed");
            if let SessionEvent::Invalidated { reason } = event {
                return reason;
            }
        }
    }

    #[tokio::test]
    async fn test_login_establishes_and_publishes_session() {
        let server = MockServer::start().await;
        mount_login(&server, "S1").await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock, manager) = manager(&server.uri(), medium.clone());

        manager.login("nurse", "pw").await.unwrap();

        assert!(manager.is_authenticated());
        assert_eq!(
            manager.current_access_token().as_deref(),
            Some("access-S1")
        );
        assert_eq!(manager.seconds_remaining(), 1800);
        assert!(!manager.is_session_warning_visible());
        assert_eq!(
            manager.broadcaster.read_current().unwrap().unwrap().session_id,
            "S1"
        );
        assert_eq!(manager.monitor.state(), MonitorState::Armed);
    }

    #[tokio::test]
    async fn test_second_login_elsewhere_forces_this_tab_out() {
        let server_a = MockServer::start().await;
        let server_b = MockServer::start().await;
        mount_login(&server_a, "S1").await;
        mount_login(&server_b, "S2").await;

        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock_a, first) = manager(&server_a.uri(), medium.clone());
        let (_clock_b, second) = manager(&server_b.uri(), medium);

        first.login("pat", "pw").await.unwrap();
        let mut rx = first.subscribe();

        second.login("pat", "pw").await.unwrap();

        assert_eq!(expect_invalidated(&mut rx).await, LogoutReason::Superseded);
        assert!(!first.is_authenticated());
        assert!(second.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_tears_down_everything() {
        let server = MockServer::start().await;
        mount_login(&server, "S1").await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock, manager) = manager(&server.uri(), medium);

        manager.login("doc", "pw").await.unwrap();
        manager.logout();

        assert!(!manager.is_authenticated());
        assert!(manager.current_access_token().is_none());
        assert_eq!(manager.monitor.state(), MonitorState::Unarmed);
        assert!(!manager.is_session_warning_visible());
        assert_eq!(manager.seconds_remaining(), 0);
        assert!(manager.broadcaster.read_current().unwrap().is_none());
        // Latch reset: a later login can invalidate again.
        assert_eq!(manager.events.invalidated(), None);
    }

    #[tokio::test]
    async fn test_expiry_invalidates_with_inactivity_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("S1", 60)))
            .mount(&server)
            .await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (clock, manager) = manager(&server.uri(), medium);

        manager.login("pat", "pw").await.unwrap();
        let mut rx = manager.subscribe();

        clock.advance(Duration::seconds(61));
        assert_eq!(expect_invalidated(&mut rx).await, LogoutReason::Expired);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_extend_after_expiry_reports_credential_expired() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("S1", 60)))
            .mount(&server)
            .await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (clock, manager) = manager(&server.uri(), medium);

        manager.login("pat", "pw").await.unwrap();
        let mut rx = manager.subscribe();
        clock.advance(Duration::seconds(61));
        assert_eq!(expect_invalidated(&mut rx).await, LogoutReason::Expired);

        let err = manager.extend_session().await.unwrap_err();
        assert!(matches!(err, SessionError::CredentialExpired));
    }

    #[tokio::test]
    async fn test_extend_session_refreshes_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("S1", 150)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/renew"))
            .respond_with(ResponseTemplate::new(200).set_body_json(grant_body("S1", 1800)))
            .mount(&server)
            .await;

        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (clock, manager) = manager(&server.uri(), medium);

        manager.login("pat", "pw").await.unwrap();

        // Walk into the warning window (150s grant, 120s window).
        clock.advance(Duration::seconds(40));
        for _ in 0..200 {
            if manager.is_session_warning_visible() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        assert!(manager.is_session_warning_visible());
        assert!(manager.seconds_remaining() <= 120);

        manager.extend_session().await.unwrap();
        assert!(!manager.is_session_warning_visible());
        assert_eq!(manager.seconds_remaining(), 1800);
        assert!(manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_extension_ends_the_session() {
        let server = MockServer::start().await;
        mount_login(&server, "S1").await;
        Mock::given(method("POST"))
            .and(path("/auth/renew"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock, manager) = manager(&server.uri(), medium);

        manager.login("pat", "pw").await.unwrap();
        let mut rx = manager.subscribe();

        let err = manager.extend_session().await.unwrap_err();
        assert!(matches!(err, SessionError::RenewalFailed(_)));
        assert_eq!(expect_invalidated(&mut rx).await, LogoutReason::Expired);
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_force_logout_notifies_once() {
        let server = MockServer::start().await;
        mount_login(&server, "S1").await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock, manager) = manager(&server.uri(), medium);

        manager.login("pat", "pw").await.unwrap();
        let mut rx = manager.subscribe();

        manager.force_logout();
        manager.force_logout();

        assert_eq!(expect_invalidated(&mut rx).await, LogoutReason::Expired);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_force_logout_when_signed_out_stays_quiet() {
        let server = MockServer::start().await;
        mount_login(&server, "S1").await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock, manager) = manager(&server.uri(), medium);

        let mut rx = manager.subscribe();
        manager.force_logout();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(manager.events.invalidated(), None);

        // A stray call after a clean logout must not notify either.
        manager.login("pat", "pw").await.unwrap();
        manager.logout();
        let mut rx = manager.subscribe();
        manager.force_logout();
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(manager.events.invalidated(), None);
    }

    #[tokio::test]
    async fn test_relogin_after_invalidation_rearms() {
        let server = MockServer::start().await;
        mount_login(&server, "S3").await;
        let medium: Arc<dyn SharedMedium> = Arc::new(MemoryMedium::new());
        let (_clock, manager) = manager(&server.uri(), medium);

        manager.login("pat", "pw").await.unwrap();
        manager.force_logout();
        manager.logout();

        manager.login("pat", "pw").await.unwrap();
        assert!(manager.is_authenticated());
        assert_eq!(manager.monitor.state(), MonitorState::Armed);
        assert_eq!(manager.events.invalidated(), None);
    }
}
