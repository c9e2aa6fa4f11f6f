//! ============================================================================
//! Service Configuration
//! ============================================================================
//! Defaults mirror the mini-app's reference behaviour (5 min result cache,
//! 1 h processed-event markers, 30 min sweeps, 50 ms completion delay,
//! 5 s message auto-hide). Every field can be overridden from the
//! environment with `ServiceConfig::from_env`.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Default backend base URL
pub const DEFAULT_API_URL: &str = "https://winixbot.com";

/// Partner domains accepted for partner task links
pub const DEFAULT_PARTNER_DOMAINS: &[&str] = &[
    "winixbot.com",
    "winix.io",
    "t.me",
    "telegram.me",
    "ton.org",
    "tonkeeper.com",
];

/// Domains never opened or submitted, for any task type
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "bit.ly",
    "tinyurl.com",
    "goo.gl",
    "grabify.link",
    "iplogger.org",
    "iplogger.com",
];

/// Verification service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Backend base URL (no trailing slash)
    pub api_base_url: String,
    /// Telegram user id the verification calls are scoped to
    pub user_id: Option<String>,
    /// How long a successful verification result is served from cache
    pub result_cache_ttl_secs: u64,
    /// How long a processed-event marker suppresses duplicates
    pub processed_event_ttl_secs: u64,
    /// Interval of the cache and processed-event sweeps
    pub cleanup_interval_secs: u64,
    /// Delay between the progress write and the `task-completed` event
    pub completion_delay_ms: u64,
    /// Result messages on task cards hide after this long
    pub message_auto_hide_ms: u64,
    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
    /// Retries for transient backend failures
    pub max_retries: u32,
    pub partner_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            user_id: None,
            result_cache_ttl_secs: 300,
            processed_event_ttl_secs: 3600,
            cleanup_interval_secs: 1800,
            completion_delay_ms: 50,
            message_auto_hide_ms: 5000,
            request_timeout_secs: 15,
            max_retries: 2,
            partner_domains: DEFAULT_PARTNER_DOMAINS.iter().map(|d| d.to_string()).collect(),
            blocked_domains: DEFAULT_BLOCKED_DOMAINS.iter().map(|d| d.to_string()).collect(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `WINIX_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("WINIX_API_URL") {
            config.api_base_url = url.trim_end_matches('/').to_string();
        }
        config.user_id = std::env::var("WINIX_USER_ID").ok().filter(|s| !s.is_empty());

        if let Some(v) = env_parse("WINIX_CACHE_TTL_SECS") {
            config.result_cache_ttl_secs = v;
        }
        if let Some(v) = env_parse("WINIX_EVENT_TTL_SECS") {
            config.processed_event_ttl_secs = v;
        }
        if let Some(v) = env_parse("WINIX_CLEANUP_INTERVAL_SECS") {
            config.cleanup_interval_secs = v;
        }
        if let Some(v) = env_parse("WINIX_COMPLETION_DELAY_MS") {
            config.completion_delay_ms = v;
        }
        if let Some(v) = env_parse("WINIX_MESSAGE_AUTO_HIDE_MS") {
            config.message_auto_hide_ms = v;
        }
        if let Some(v) = env_parse("WINIX_REQUEST_TIMEOUT_SECS") {
            config.request_timeout_secs = v;
        }
        if let Some(v) = env_parse("WINIX_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Ok(domains) = std::env::var("WINIX_PARTNER_DOMAINS") {
            config.partner_domains = split_domains(&domains);
        }
        if let Ok(domains) = std::env::var("WINIX_BLOCKED_DOMAINS") {
            config.blocked_domains = split_domains(&domains);
        }

        config
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }

    pub fn processed_event_ttl(&self) -> Duration {
        Duration::from_secs(self.processed_event_ttl_secs)
    }

    /// Sweep interval, never zero
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn completion_delay(&self) -> Duration {
        Duration::from_millis(self.completion_delay_ms)
    }

    pub fn message_auto_hide(&self) -> Duration {
        Duration::from_millis(self.message_auto_hide_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

fn split_domains(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.completion_delay(), Duration::from_millis(50));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1800));
        assert_eq!(config.processed_event_ttl(), Duration::from_secs(3600));
        assert_eq!(config.message_auto_hide(), Duration::from_secs(5));
        assert!(config.partner_domains.iter().any(|d| d == "winixbot.com"));
    }

    #[test]
    fn test_split_domains() {
        assert_eq!(
            split_domains(" Example.com, ,partner.io "),
            vec!["example.com".to_string(), "partner.io".to_string()]
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"completion_delay_ms": 0, "user_id": "42"}"#).unwrap();
        assert_eq!(config.completion_delay_ms, 0);
        assert_eq!(config.user_id.as_deref(), Some("42"));
        assert_eq!(config.result_cache_ttl_secs, 300);
    }

    #[test]
    fn test_cleanup_interval_never_zero() {
        let config = ServiceConfig {
            cleanup_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1));
    }
}
