//! Session configuration.
//!
//! Timing knobs and endpoint paths for the session lifecycle components.
//! Configuration is stored at `~/.config/careportal/config.json`; defaults
//! match the portal backend's session policy.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config and shared-session directory paths
pub(crate) const APP_NAME: &str = "careportal";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Warn this long before the session expires.
/// 2 minutes gives the user time to notice the countdown and extend.
const DEFAULT_WARNING_WINDOW_SECS: u64 = 120;

/// Redundant session-identifier poll interval.
/// Change notifications are not delivered reliably in every host context,
/// so a 5 second poll is the fallback correctness mechanism.
const DEFAULT_MONITOR_POLL_SECS: u64 = 5;

/// Countdown tick. One timer drives both the countdown re-render and the
/// expiry check; seconds remaining are always recomputed from the absolute
/// expiry timestamp, so a throttled tick cannot cause drift.
const DEFAULT_WARNER_TICK_MILLIS: u64 = 1000;

/// How often the broadcaster watches a passive shared medium for changes.
const DEFAULT_MEDIUM_WATCH_MILLIS: u64 = 1000;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL of the portal API, without a trailing slash.
    pub base_url: String,
    pub login_path: String,
    pub renew_path: String,
    pub warning_window_secs: u64,
    pub monitor_poll_interval_secs: u64,
    pub warner_tick_millis: u64,
    pub medium_watch_interval_millis: u64,
    pub request_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.careportal.example".to_string(),
            login_path: "/auth/login".to_string(),
            renew_path: "/auth/renew".to_string(),
            warning_window_secs: DEFAULT_WARNING_WINDOW_SECS,
            monitor_poll_interval_secs: DEFAULT_MONITOR_POLL_SECS,
            warner_tick_millis: DEFAULT_WARNER_TICK_MILLIS,
            medium_watch_interval_millis: DEFAULT_MEDIUM_WATCH_MILLIS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl SessionConfig {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn warning_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.warning_window_secs as i64)
    }

    pub fn monitor_poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_interval_secs)
    }

    pub fn warner_tick(&self) -> Duration {
        Duration::from_millis(self.warner_tick_millis)
    }

    pub fn medium_watch_interval(&self) -> Duration {
        Duration::from_millis(self.medium_watch_interval_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_session_policy() {
        let config = SessionConfig::default();
        assert_eq!(config.warning_window(), chrono::Duration::seconds(120));
        assert_eq!(config.monitor_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.warner_tick(), Duration::from_millis(1000));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = SessionConfig {
            base_url: "https://portal.test".to_string(),
            ..SessionConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.base_url, "https://portal.test");
        assert_eq!(parsed.monitor_poll_interval_secs, 5);
    }
}
