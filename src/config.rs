//! Runtime configuration for the tracker and its demo host.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, TrackerError};
use crate::tracking::{ExclusionSet, TrackingSettings, DEFAULT_REPORTING_PATH};

/// Tracker configuration.
///
/// # Example
///
/// ```ignore
/// // Load from environment variables
/// let config = TrackerConfig::from_env()?;
///
/// // Or start from defaults
/// let config = TrackerConfig {
///     cache_ttl: Duration::ZERO,
///     ..TrackerConfig::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Listen address for the HTTP server
    pub bind: SocketAddr,

    /// Redis URL for page-hit export; `None` keeps hits in memory only
    pub redis_url: Option<String>,

    /// Redis list receiving page hits
    pub redis_key: String,

    /// Maximum length of the Redis list
    pub redis_max_len: usize,

    /// Page hits waiting for Redis; further hits are dropped
    pub redis_queue_capacity: usize,

    /// Extensions whose requests are never recorded
    pub exclusions: ExclusionSet,

    /// Client-side reporting endpoint, never recorded
    pub reporting_path: String,

    /// Request headers carrying identity data
    pub user_header: String,
    pub session_header: String,
    pub agent_session_header: String,

    /// Directory served as the static fallback
    pub static_dir: String,

    /// Output cache lifetime; zero disables the cache
    pub cache_ttl: Duration,

    /// Idle pipeline instances kept for reuse
    pub max_idle_pipelines: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            redis_url: None,
            redis_key: "page_hits".to_string(),
            redis_max_len: 10_000,
            redis_queue_capacity: 4_096,
            exclusions: ExclusionSet::default(),
            reporting_path: DEFAULT_REPORTING_PATH.to_string(),
            user_header: "x-user-name".to_string(),
            session_header: "x-session-id".to_string(),
            agent_session_header: "x-agent-session-id".to_string(),
            static_dir: "static".to_string(),
            cache_ttl: Duration::from_secs(30),
            max_idle_pipelines: 64,
        }
    }
}

impl TrackerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TRACKER_BIND`: listen address (default: "0.0.0.0:3000")
    /// - `TRACKER_REDIS_URL`: enables Redis export when set
    /// - `TRACKER_REDIS_KEY`: list key (default: "page_hits")
    /// - `TRACKER_REDIS_MAX_LEN`: list cap, at least 1 (default: 10000)
    /// - `TRACKER_REDIS_QUEUE_CAPACITY`: export backlog, at least 1 (default: 4096)
    /// - `TRACKER_EXCLUDED_EXTENSIONS`: comma-separated, added to the defaults
    /// - `TRACKER_REPORTING_PATH`: (default: "loupe/log")
    /// - `TRACKER_USER_HEADER`, `TRACKER_SESSION_HEADER`, `TRACKER_AGENT_SESSION_HEADER`
    /// - `TRACKER_STATIC_DIR`: (default: "static")
    /// - `TRACKER_CACHE_TTL_SECS`: (default: 30, 0 disables)
    /// - `TRACKER_MAX_IDLE_PIPELINES`: (default: 64)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(bind) = get("TRACKER_BIND") {
            config.bind = bind
                .parse()
                .map_err(|e| TrackerError::Config(format!("TRACKER_BIND '{bind}': {e}")))?;
        }
        config.redis_url = get("TRACKER_REDIS_URL");
        if let Some(key) = get("TRACKER_REDIS_KEY") {
            config.redis_key = key;
        }
        if let Some(len) = get("TRACKER_REDIS_MAX_LEN") {
            config.redis_max_len = parse_positive("TRACKER_REDIS_MAX_LEN", &len)?;
        }
        if let Some(cap) = get("TRACKER_REDIS_QUEUE_CAPACITY") {
            config.redis_queue_capacity = parse_positive("TRACKER_REDIS_QUEUE_CAPACITY", &cap)?;
        }
        if let Some(list) = get("TRACKER_EXCLUDED_EXTENSIONS") {
            for ext in list.split(',') {
                config.exclusions.insert(ext);
            }
        }
        if let Some(path) = get("TRACKER_REPORTING_PATH") {
            config.reporting_path = path;
        }
        if let Some(header) = get("TRACKER_USER_HEADER") {
            config.user_header = header.to_ascii_lowercase();
        }
        if let Some(header) = get("TRACKER_SESSION_HEADER") {
            config.session_header = header.to_ascii_lowercase();
        }
        if let Some(header) = get("TRACKER_AGENT_SESSION_HEADER") {
            config.agent_session_header = header.to_ascii_lowercase();
        }
        if let Some(dir) = get("TRACKER_STATIC_DIR") {
            config.static_dir = dir;
        }
        if let Some(secs) = get("TRACKER_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(parse_number("TRACKER_CACHE_TTL_SECS", &secs)?);
        }
        if let Some(n) = get("TRACKER_MAX_IDLE_PIPELINES") {
            config.max_idle_pipelines = parse_number("TRACKER_MAX_IDLE_PIPELINES", &n)?;
        }

        Ok(config)
    }

    /// Classification settings shared by every pipeline instance.
    pub fn tracking_settings(&self) -> TrackingSettings {
        TrackingSettings::new(self.exclusions.clone(), self.reporting_path.clone())
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| TrackerError::Config(format!("{key} '{value}': {e}")))
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match parse_number(key, value)? {
        0 => Err(TrackerError::Config(format!("{key} must be at least 1"))),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<TrackerConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TrackerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind.port(), 3000);
        assert!(config.redis_url.is_none());
        assert_eq!(config.reporting_path, "loupe/log");
        assert_eq!(config.cache_ttl, Duration::from_secs(30));
        assert!(config.exclusions.is_excluded("png"));
    }

    #[test]
    fn extra_extensions_extend_defaults() {
        let config = load(&[("TRACKER_EXCLUDED_EXTENSIONS", "woff2, .MAP ,aspx,")]).unwrap();
        assert!(config.exclusions.is_excluded("woff2"));
        assert!(config.exclusions.is_excluded("map"));
        assert!(config.exclusions.is_excluded("css"));
        assert!(!config.exclusions.is_excluded("aspx"));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("TRACKER_BIND", "127.0.0.1:8080"),
            ("TRACKER_REDIS_URL", "redis://127.0.0.1:6379/"),
            ("TRACKER_CACHE_TTL_SECS", "0"),
            ("TRACKER_USER_HEADER", "X-Remote-User"),
            ("TRACKER_MAX_IDLE_PIPELINES", "8"),
        ])
        .unwrap();
        assert_eq!(config.bind.to_string(), "127.0.0.1:8080");
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379/"));
        assert_eq!(config.cache_ttl, Duration::ZERO);
        assert_eq!(config.user_header, "x-remote-user");
        assert_eq!(config.max_idle_pipelines, 8);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = load(&[("TRACKER_REDIS_URL", "  "), ("TRACKER_STATIC_DIR", "")]).unwrap();
        assert!(config.redis_url.is_none());
        assert_eq!(config.static_dir, "static");
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let err = load(&[("TRACKER_REDIS_MAX_LEN", "lots")]).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
        assert!(load(&[("TRACKER_BIND", "nowhere")]).is_err());
    }

    #[test]
    fn zero_redis_sizes_are_rejected() {
        let err = load(&[("TRACKER_REDIS_MAX_LEN", "0")]).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));
        let err = load(&[("TRACKER_REDIS_QUEUE_CAPACITY", "0")]).unwrap_err();
        assert!(matches!(err, TrackerError::Config(_)));

        let config = load(&[("TRACKER_REDIS_MAX_LEN", "1"), ("TRACKER_REDIS_QUEUE_CAPACITY", "16")]).unwrap();
        assert_eq!(config.redis_max_len, 1);
        assert_eq!(config.redis_queue_capacity, 16);
    }
}
