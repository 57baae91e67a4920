//! Configuration with environment variable support.
//!
//! [`Config`] is read from `SSEBROKER_*` environment variables (after an
//! optional `.env` file) and split into the typed configs each component takes.
//!
//! # Example
//!
//! ```rust,ignore
//! use ssebroker::config::{load_dotenv, Config};
//!
//! load_dotenv();
//! let config = Config::from_env()?;
//! let (broker, _) = Broker::spawn(config.broker(), cancel.clone());
//! ```
//!
//! | Variable | Default |
//! |----------|---------|
//! | `SSEBROKER_ADDR` | `127.0.0.1:5000` |
//! | `SSEBROKER_STREAM_PATH` | `/sse-stream` |
//! | `SSEBROKER_QUEUE_CAPACITY` | `16` |
//! | `SSEBROKER_KEEP_ALIVE_SECS` | unset (disabled) |
//! | `SSEBROKER_RETRY_MS` | unset |
//! | `SSEBROKER_LEGACY_USER_AGENTS` | `Edge` |
//! | `SSEBROKER_COMPRESSION` | `true` |
//! | `SSEBROKER_LOG_FORMAT` | `compact` |
//! | `SSEBROKER_LOG_LEVEL` | `info` |

use crate::error::ConfigError;
use crate::logging::LogFormat;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

/// Prefix shared by every environment variable.
pub const ENV_PREFIX: &str = "SSEBROKER_";

/// Load a `.env` file from the working directory, if present.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env file");
    }
}

/// Flat, environment-backed configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Listen address
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Path of the subscription route
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
    /// Capacity of each subscriber's delivery queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Interval between keep-alive comments
    #[serde(default)]
    pub keep_alive_secs: Option<u64>,
    /// Reconnection hint sent when a stream opens
    #[serde(default)]
    pub retry_ms: Option<u64>,
    /// User-Agent fragments identifying clients limited to one event per connection
    #[serde(default = "default_legacy_user_agents")]
    pub legacy_user_agents: Vec<String>,
    /// Negotiate gzip/deflate for streams
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
    /// Default log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_stream_path() -> String {
    "/sse-stream".to_string()
}

fn default_queue_capacity() -> usize {
    16
}

fn default_legacy_user_agents() -> Vec<String> {
    vec!["Edge".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            stream_path: default_stream_path(),
            queue_capacity: default_queue_capacity(),
            keep_alive_secs: None,
            retry_ms: None,
            legacy_user_agents: default_legacy_user_agents(),
            compression: true,
            log_format: LogFormat::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Read configuration from `SSEBROKER_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Read configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: Self = envy::prefixed(ENV_PREFIX).from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid {
                key: "ADDR",
                reason: format!("{:?} is not a socket address", self.addr),
            });
        }
        if !self.stream_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "STREAM_PATH",
                reason: "must start with '/'".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "QUEUE_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Coordinator settings
    pub fn broker(&self) -> BrokerConfig {
        BrokerConfig::new().queue_capacity(self.queue_capacity)
    }

    /// Per-connection settings
    pub fn session(&self) -> SessionConfig {
        let mut session = SessionConfig::new()
            .legacy_user_agents(self.legacy_user_agents.clone())
            .compression(self.compression);
        if let Some(secs) = self.keep_alive_secs.filter(|s| *s > 0) {
            session = session.keep_alive(Duration::from_secs(secs));
        }
        if let Some(ms) = self.retry_ms {
            session = session.retry(Duration::from_millis(ms));
        }
        session
    }

    /// Listener and routing settings
    pub fn server(&self) -> ServerConfig {
        ServerConfig::new()
            .addr(self.addr.clone())
            .stream_path(self.stream_path.clone())
    }
}

/// Configuration for the coordinator
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Capacity of each subscriber's delivery queue (minimum 1)
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BrokerConfig {
    /// Create a new broker config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delivery queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

/// Configuration for each subscriber session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// User-Agent fragments of clients limited to one event per connection
    pub legacy_user_agents: Vec<String>,
    /// Interval between keep-alive comments
    pub keep_alive: Option<Duration>,
    /// Reconnection hint sent when a stream opens
    pub retry: Option<Duration>,
    /// Negotiate a compressing transform from `Accept-Encoding`
    pub compression: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            legacy_user_agents: default_legacy_user_agents(),
            keep_alive: None,
            retry: None,
            compression: true,
        }
    }
}

impl SessionConfig {
    /// Create a new session config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the legacy User-Agent patterns
    pub fn legacy_user_agents<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy_user_agents = patterns
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.is_empty())
            .collect();
        self
    }

    /// Send a keep-alive comment at this interval
    pub fn keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = Some(interval);
        self
    }

    /// Send a reconnection hint when a stream opens
    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Enable or disable compression
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Check a User-Agent against the legacy patterns
    pub fn is_legacy_client(&self, user_agent: &str) -> bool {
        self.legacy_user_agents
            .iter()
            .any(|pattern| user_agent.contains(pattern.as_str()))
    }
}

/// Configuration for the HTTP server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Path of the subscription route
    pub stream_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            stream_path: default_stream_path(),
        }
    }
}

impl ServerConfig {
    /// Create a new server config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Set the subscription route path
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }
}
