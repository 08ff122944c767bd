//! Exporter configuration.
//!
//! Configuration is read from TOML into [`Config`], a plain mirror of the file, and then
//! checked by [`Config::validate`] into [`Settings`], the typed form everything else consumes.
//! Every problem is reported at startup as a [`ConfigError`]; nothing is re-validated per
//! message.
//!
//! # Example
//! ```rust
//! use pushwire::config::Config;
//!
//! let config = Config::from_toml(r#"
//!     server = "tcp://127.0.0.1:5555"
//!     format = "structured"
//!
//!     [pool]
//!     max = 4
//! "#).unwrap();
//!
//! let settings = config.validate().unwrap();
//! assert_eq!(settings.pool.max, 4);
//! ```
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    encoder::EncodingMode,
    pool::{PoolConfig, PoolError},
    transport::{Endpoint, EndpointError},
};

/// Matches the fixed render buffer hosts have historically used for payloads.
pub const DEFAULT_MAX_PAYLOAD: usize = 8192;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required option 'server'")]
    MissingServer,

    #[error("invalid server '{server}': {source}")]
    Endpoint {
        server: String,
        source: EndpointError,
    },

    #[error("invalid output format '{0}', only 'raw' or 'structured' is acceptable")]
    Format(String),

    #[error("invalid '{option}': {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },

    #[error("failed to establish initial connection: {0}")]
    InitialConnect(#[source] PoolError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Sink endpoint, e.g. `tcp://127.0.0.1:5555`.
    pub server: String,
    /// `raw` or `structured`.
    pub format: String,
    /// Connect on first message rather than at startup.
    pub lazy_connect: bool,
    /// Largest rendered payload accepted, in bytes.
    pub max_payload: usize,
    pub pool: PoolSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: String::new(),
            format: EncodingMode::Raw.to_string(),
            lazy_connect: true,
            max_payload: DEFAULT_MAX_PAYLOAD,
            pool: PoolSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSection {
    pub max: usize,
    pub start: usize,
    pub connect_timeout_ms: u64,
    pub send_timeout_ms: u64,
    pub idle_timeout_ms: Option<u64>,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max: 1,
            start: 1,
            connect_timeout_ms: 1000,
            send_timeout_ms: 1000,
            idle_timeout_ms: None,
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub mode: EncodingMode,
    pub lazy_connect: bool,
    pub max_payload: usize,
    pub pool: PoolConfig,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

impl Config {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn validate(&self) -> Result<Settings, ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::MissingServer);
        }
        let endpoint = self
            .server
            .parse::<Endpoint>()
            .map_err(|source| ConfigError::Endpoint {
                server: self.server.clone(),
                source,
            })?;

        let mode = self
            .format
            .parse::<EncodingMode>()
            .map_err(|e| ConfigError::Format(e.0))?;

        if self.max_payload == 0 {
            return Err(invalid("max_payload", "must be at least 1 byte"));
        }

        let pool = &self.pool;
        if pool.max == 0 {
            return Err(invalid("pool.max", "must be at least 1"));
        }
        if pool.start > pool.max {
            return Err(invalid(
                "pool.start",
                format!("{} exceeds pool.max ({})", pool.start, pool.max),
            ));
        }
        let connect_timeout = positive_millis("pool.connect_timeout_ms", pool.connect_timeout_ms)?;
        let send_timeout = positive_millis("pool.send_timeout_ms", pool.send_timeout_ms)?;
        let idle_timeout = pool
            .idle_timeout_ms
            .map(|ms| positive_millis("pool.idle_timeout_ms", ms))
            .transpose()?;

        Ok(Settings {
            endpoint,
            mode,
            lazy_connect: self.lazy_connect,
            max_payload: self.max_payload,
            pool: PoolConfig {
                max: pool.max,
                start: pool.start,
                idle_timeout,
            },
            connect_timeout,
            send_timeout,
        })
    }
}

fn invalid(option: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        option,
        reason: reason.into(),
    }
}

fn positive_millis(option: &'static str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(invalid(option, "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}
