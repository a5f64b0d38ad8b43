//! Connection Configuration
//!
//! Retry, timeout and keepalive settings for a connection manager, plus
//! loading from a TOML file at `~/.config/logstream/logstream.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the caller)
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! max_retries = 5
//! retry_delay_ms = 3000
//! backoff_multiplier = 1.0
//! read_timeout_ms = 0
//!
//! [server]
//! base_url = "ws://localhost:8000"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Retry, timeout and keepalive settings for one connection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Automatic reconnect attempts after an abnormal close (0 = never)
    pub max_retries: u32,

    /// Delay before the first reconnect attempt in milliseconds
    pub retry_delay_ms: u64,

    /// Multiplier applied to the delay for each further attempt
    ///
    /// 1.0 keeps the interval fixed.
    pub backoff_multiplier: f64,

    /// Upper bound for the computed delay in milliseconds
    pub max_retry_delay_ms: u64,

    /// Add up to 25% random jitter to each retry delay
    pub use_jitter: bool,

    /// How long an open may take in milliseconds (0 = no timeout)
    pub connect_timeout_ms: u64,

    /// Idle read timeout while connected in milliseconds (0 = no timeout)
    ///
    /// When no frame arrives within this window the connection is treated
    /// as abnormally closed and becomes eligible for a retry.
    pub read_timeout_ms: u64,

    /// Interval for `ping` control frames while connected (0 = disabled)
    pub ping_interval_ms: u64,

    /// How long an intentional close may wait for the close handshake
    pub close_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay_ms: 3000,
            backoff_multiplier: 1.0,
            max_retry_delay_ms: 30_000,
            use_jitter: false,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 0,
            ping_interval_ms: 0,
            close_timeout_ms: 1000,
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = duration_ms(delay);
        self
    }

    /// Set the backoff multiplier
    #[must_use]
    pub fn with_backoff(mut self, multiplier: f64, max_delay: Duration) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_retry_delay_ms = duration_ms(max_delay);
        self
    }

    /// Enable or disable retry jitter
    #[must_use]
    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Set the open timeout (`Duration::ZERO` disables it)
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the idle read timeout (`Duration::ZERO` disables it)
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the keepalive ping interval (`Duration::ZERO` disables it)
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_ms = duration_ms(interval);
        self
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_delay_ms as f64;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = base * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = scaled.min(self.max_retry_delay_ms.max(self.retry_delay_ms) as f64);

        let delay_ms = if self.use_jitter {
            // Up to 25% on top of the capped delay
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(delay_ms as u64)
    }

    /// Open timeout, if any
    #[must_use]
    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero(self.connect_timeout_ms)
    }

    /// Idle read timeout, if any
    #[must_use]
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero(self.read_timeout_ms)
    }

    /// Keepalive interval, if any
    #[must_use]
    pub fn ping_interval(&self) -> Option<Duration> {
        non_zero(self.ping_interval_ms)
    }

    /// Bound on the intentional close handshake
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Check that the values are usable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a backoff multiplier
    /// below 1.0 or a zero retry delay with retries enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_retries > 0 && self.retry_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "retry_delay_ms must be > 0 when retries are enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from environment variables on top of defaults
    ///
    /// Environment variables:
    /// - `LOGSTREAM_MAX_RETRIES`: Reconnect attempts
    /// - `LOGSTREAM_RETRY_DELAY_MS`: Delay before the first retry
    /// - `LOGSTREAM_BACKOFF`: Backoff multiplier
    /// - `LOGSTREAM_MAX_RETRY_DELAY_MS`: Cap for the retry delay
    /// - `LOGSTREAM_RETRY_JITTER`: `true`/`1` to randomize retry delays
    /// - `LOGSTREAM_CONNECT_TIMEOUT_MS`: Open timeout
    /// - `LOGSTREAM_READ_TIMEOUT_MS`: Idle read timeout
    /// - `LOGSTREAM_PING_INTERVAL_MS`: Keepalive interval
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from a variable lookup (unparseable values are ignored)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = lookup("LOGSTREAM_MAX_RETRIES").and_then(|v| v.trim().parse().ok()) {
            self.max_retries = v;
        }
        if let Some(v) = parse_u64("LOGSTREAM_RETRY_DELAY_MS") {
            self.retry_delay_ms = v;
        }
        if let Some(v) = lookup("LOGSTREAM_BACKOFF").and_then(|v| v.trim().parse().ok()) {
            self.backoff_multiplier = v;
        }
        if let Some(v) = parse_u64("LOGSTREAM_MAX_RETRY_DELAY_MS") {
            self.max_retry_delay_ms = v;
        }
        if let Some(v) = lookup("LOGSTREAM_RETRY_JITTER") {
            self.use_jitter = matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = parse_u64("LOGSTREAM_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = parse_u64("LOGSTREAM_READ_TIMEOUT_MS") {
            self.read_timeout_ms = v;
        }
        if let Some(v) = parse_u64("LOGSTREAM_PING_INTERVAL_MS") {
            self.ping_interval_ms = v;
        }
    }
}

fn non_zero(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// TOML file
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Base URL of the log server (`ws://`, `wss://`, `http://` or `https://`)
    pub base_url: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogstreamToml {
    /// Connection section
    pub connection: ConnectionConfig,

    /// Server section
    pub server: ServerToml,
}

impl LogstreamToml {
    /// Parse a TOML document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let parsed: Self = toml::from_str(content)?;
        parsed.connection.validate()?;
        Ok(parsed)
    }
}

/// Fully resolved configuration
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadedConfig {
    /// Connection settings
    pub connection: ConnectionConfig,

    /// Base URL of the log server, if configured
    pub base_url: Option<String>,

    /// Path of the file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/logstream/logstream.toml` or
/// `~/.config/logstream/logstream.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("logstream").join("logstream.toml"))
}

/// Load configuration from the default path and the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
pub fn load_config() -> Result<LoadedConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the environment
///
/// A missing file is not an error; defaults are used.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the merged
/// values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<LoadedConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// See [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<LoadedConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut loaded = LoadedConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let file = LogstreamToml::from_toml_str(&content)?;
            loaded.connection = file.connection;
            loaded.base_url = file.server.base_url;
            loaded.config_file_path = Some(config_path.clone());

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    loaded.connection.apply_env(&lookup);
    if let Some(base_url) = lookup("LOGSTREAM_BASE_URL") {
        loaded.base_url = Some(base_url);
    }
    loaded.connection.validate()?;

    Ok(loaded)
}
