use jarvis_core::{
    backoff::{MAX_RECONNECT_ATTEMPTS, ReconnectPolicy},
    session::{DEFAULT_SETTLE_DELAY, SessionOptions},
};
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which reconnection schedule to use for failed connection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackoffMode {
    /// Dropped connections and failed attempts share one schedule.
    Unified,
    /// Failed attempts retry on the faster, lower-capped schedule.
    Legacy,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub url: String,
    pub settle_delay: Duration,
    pub max_reconnects: u32,
    pub backoff: BackoffMode,
    pub mic_enabled: bool,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let url = std::env::var("JARVIS_URL").unwrap_or_else(|_| "ws://localhost:8765".to_string());
        validate_url(&url)?;

        let settle_delay = match std::env::var("JARVIS_SETTLE_MS") {
            Ok(raw) => Duration::from_millis(parse_var("JARVIS_SETTLE_MS", &raw)?),
            Err(_) => DEFAULT_SETTLE_DELAY,
        };

        let max_reconnects = match std::env::var("JARVIS_MAX_RECONNECTS") {
            Ok(raw) => parse_var("JARVIS_MAX_RECONNECTS", &raw)?,
            Err(_) => MAX_RECONNECT_ATTEMPTS,
        };

        let backoff_str = std::env::var("JARVIS_BACKOFF").unwrap_or_else(|_| "unified".to_string());
        let backoff = match backoff_str.to_lowercase().as_str() {
            "unified" => BackoffMode::Unified,
            "legacy" => BackoffMode::Legacy,
            other => {
                return Err(ConfigError::InvalidValue(
                    "JARVIS_BACKOFF".to_string(),
                    format!("'{}' is not one of 'unified', 'legacy'", other),
                ));
            }
        };

        let mic_enabled = match std::env::var("JARVIS_MIC") {
            Ok(raw) => parse_bool("JARVIS_MIC", &raw)?,
            Err(_) => false,
        };

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            url,
            settle_delay,
            max_reconnects,
            backoff,
            mic_enabled,
            log_level,
        })
    }

    /// The session settings this configuration describes.
    pub fn session_options(&self) -> SessionOptions {
        let policy = match self.backoff {
            BackoffMode::Unified => ReconnectPolicy::default(),
            BackoffMode::Legacy => ReconnectPolicy::legacy(),
        }
        .with_max_attempts(self.max_reconnects);

        SessionOptions {
            policy,
            settle_delay: self.settle_delay,
            mic_enabled: self.mic_enabled,
        }
    }
}

/// Rejects endpoints that are not WebSocket URLs.
pub fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(
            "JARVIS_URL".to_string(),
            format!("'{}' is not a ws:// or wss:// URL", url),
        ))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

fn parse_bool(name: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a boolean", other),
        )),
    }
}
