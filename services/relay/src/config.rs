use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Spacing of `audio_level` broadcasts while speaking.
    pub audio_tick: Duration,
    /// How long the relay stays in `thinking` before it starts answering.
    pub thinking_delay: Duration,
    /// How long after the final answer the relay returns to `idle`.
    pub idle_delay: Duration,
    /// Pause between streamed chunks of the echo responder.
    pub chunk_delay: Duration,
    pub log_level: Level,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8765)),
            audio_tick: Duration::from_millis(100),
            thinking_delay: Duration::from_millis(500),
            idle_delay: Duration::from_millis(1000),
            chunk_delay: Duration::from_millis(40),
            log_level: Level::INFO,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        let bind_address = match std::env::var("RELAY_BIND_ADDRESS") {
            Ok(raw) => raw.parse::<SocketAddr>().map_err(|e| {
                ConfigError::InvalidValue("RELAY_BIND_ADDRESS".to_string(), e.to_string())
            })?,
            Err(_) => defaults.bind_address,
        };

        let audio_tick = millis_var("RELAY_AUDIO_TICK_MS", defaults.audio_tick)?;
        if audio_tick.is_zero() {
            return Err(ConfigError::InvalidValue(
                "RELAY_AUDIO_TICK_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        let thinking_delay = millis_var("RELAY_THINKING_MS", defaults.thinking_delay)?;
        let idle_delay = millis_var("RELAY_IDLE_MS", defaults.idle_delay)?;
        let chunk_delay = millis_var("RELAY_CHUNK_MS", defaults.chunk_delay)?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            audio_tick,
            thinking_delay,
            idle_delay,
            chunk_delay,
            log_level,
        })
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
