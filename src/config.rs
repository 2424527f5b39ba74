use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

pub use crate::error::ConfigError;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory the documents are loaded from and autosaved to
    #[serde(default = "default_content_root")]
    pub content_root: String,

    // Timing inputs, in milliseconds
    pub autosave_interval_ms: Option<u64>,
    pub ping_interval_ms: Option<u64>,
    pub stale_threshold_ms: Option<u64>,
    pub cursor_throttle_ms: Option<u64>,
    pub content_debounce_ms: Option<u64>,
    pub render_interval_ms: Option<u64>,
    pub sse_keepalive_ms: Option<u64>,
    pub sse_reconnect_ms: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// The raw timing numbers as supplied by the environment
    pub fn raw_timings(&self) -> RawTimings {
        RawTimings {
            autosave_interval: self.autosave_interval_ms,
            ping_interval: self.ping_interval_ms,
            stale_threshold: self.stale_threshold_ms,
            cursor_throttle: self.cursor_throttle_ms,
            content_debounce: self.content_debounce_ms,
            render_interval: self.render_interval_ms,
            sse_keepalive: self.sse_keepalive_ms,
            sse_reconnect: self.sse_reconnect_ms,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            content_root: default_content_root(),
            autosave_interval_ms: None,
            ping_interval_ms: None,
            stale_threshold_ms: None,
            cursor_throttle_ms: None,
            content_debounce_ms: None,
            render_interval_ms: None,
            sse_keepalive_ms: None,
            sse_reconnect_ms: None,
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_content_root() -> String {
    "docs".to_string()
}

/// Timing settings as plain milliseconds, already parsed by an outer loader
/// (environment, YAML site config, ...). `None` means "use the default".
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawTimings {
    pub autosave_interval: Option<u64>,
    pub ping_interval: Option<u64>,
    pub stale_threshold: Option<u64>,
    pub cursor_throttle: Option<u64>,
    pub content_debounce: Option<u64>,
    pub render_interval: Option<u64>,
    pub sse_keepalive: Option<u64>,
    pub sse_reconnect: Option<u64>,
}

/// Validated intervals shared by every component of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub autosave_interval: Duration,
    pub ping_interval: Duration,
    pub stale_threshold: Duration,
    pub cursor_throttle: Duration,
    pub content_debounce: Duration,
    pub render_interval: Duration,
    pub sse_keepalive: Duration,
    pub sse_reconnect: Duration,
}

impl Timings {
    /// Period of the stale presence sweep
    pub fn sweep_interval(&self) -> Duration {
        self.stale_threshold / 2
    }

    /// Resolve raw millisecond values into typed intervals.
    pub fn resolve(raw: &RawTimings) -> Result<Self, ConfigError> {
        let autosave = raw
            .autosave_interval
            .ok_or(ConfigError::Missing("autosaveInterval"))?;

        Ok(Self {
            autosave_interval: at_least("autosaveInterval", autosave, 1000)?,
            ping_interval: setting("pingInterval", raw.ping_interval, 5000, 1000)?,
            stale_threshold: setting("staleThreshold", raw.stale_threshold, 30_000, 5000)?,
            cursor_throttle: setting("cursorThrottle", raw.cursor_throttle, 100, 16)?,
            content_debounce: setting("contentDebounce", raw.content_debounce, 150, 50)?,
            render_interval: setting("renderInterval", raw.render_interval, 5000, 1000)?,
            sse_keepalive: setting("sseKeepalive", raw.sse_keepalive, 15_000, 5000)?,
            sse_reconnect: setting("sseReconnect", raw.sse_reconnect, 2000, 500)?,
        })
    }
}

fn setting(name: &'static str, value: Option<u64>, default: u64, min: u64) -> Result<Duration, ConfigError> {
    at_least(name, value.unwrap_or(default), min)
}

fn at_least(name: &'static str, value: u64, min: u64) -> Result<Duration, ConfigError> {
    if value < min {
        return Err(ConfigError::BelowMinimum { name, value, min });
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_autosave(ms: u64) -> RawTimings {
        RawTimings {
            autosave_interval: Some(ms),
            ..RawTimings::default()
        }
    }

    #[test]
    fn defaults_apply_when_only_autosave_is_given() {
        let timings = Timings::resolve(&raw_with_autosave(10_000)).unwrap();
        assert_eq!(timings.autosave_interval, Duration::from_secs(10));
        assert_eq!(timings.ping_interval, Duration::from_millis(5000));
        assert_eq!(timings.stale_threshold, Duration::from_millis(30_000));
        assert_eq!(timings.cursor_throttle, Duration::from_millis(100));
        assert_eq!(timings.content_debounce, Duration::from_millis(150));
        assert_eq!(timings.render_interval, Duration::from_millis(5000));
        assert_eq!(timings.sse_keepalive, Duration::from_millis(15_000));
        assert_eq!(timings.sse_reconnect, Duration::from_millis(2000));
        assert_eq!(timings.sweep_interval(), Duration::from_millis(15_000));
    }

    #[test]
    fn autosave_interval_is_required() {
        let err = Timings::resolve(&RawTimings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("autosaveInterval")));
    }

    #[test]
    fn values_below_minimum_are_rejected() {
        let raw = RawTimings {
            cursor_throttle: Some(10),
            ..raw_with_autosave(1000)
        };
        match Timings::resolve(&raw) {
            Err(ConfigError::BelowMinimum { name, value, min }) => {
                assert_eq!(name, "cursorThrottle");
                assert_eq!(value, 10);
                assert_eq!(min, 16);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert!(Timings::resolve(&raw_with_autosave(999)).is_err());
    }

    #[test]
    fn minimum_values_are_accepted() {
        let raw = RawTimings {
            autosave_interval: Some(1000),
            ping_interval: Some(1000),
            stale_threshold: Some(5000),
            cursor_throttle: Some(16),
            content_debounce: Some(50),
            render_interval: Some(1000),
            sse_keepalive: Some(5000),
            sse_reconnect: Some(500),
        };
        let timings = Timings::resolve(&raw).unwrap();
        assert_eq!(timings.sse_reconnect, Duration::from_millis(500));
    }

    #[test]
    fn raw_timings_deserialize_from_camel_case() {
        let raw: RawTimings =
            serde_json::from_str(r#"{"autosaveInterval": 2000, "staleThreshold": 8000}"#).unwrap();
        assert_eq!(raw.autosave_interval, Some(2000));
        assert_eq!(raw.stale_threshold, Some(8000));
        assert_eq!(raw.ping_interval, None);
    }
}
