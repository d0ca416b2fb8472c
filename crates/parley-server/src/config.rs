//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! - `PARLEY_BIND_ADDR`: Listen address. Default: `0.0.0.0:8000`
//! - `PARLEY_CORS_ORIGINS`: Comma-separated allowed origins. Default: any origin
//! - `PARLEY_LOG_FORMAT`: `pretty` or `json`. Default: `pretty`
//! - `PARLEY_OUTBOUND_CAPACITY`: Per-connection outbound queue length. Default: `256`
//! - `PARLEY_DUPLICATE_POLICY`: `orphan` or `evict`. Default: `orphan`
//! - `PARLEY_MALFORMED_POLICY`: `close` or `report`. Default: `close`
//!
//! # Examples
//!
//! ```bash
//! PARLEY_BIND_ADDR=127.0.0.1:9000 PARLEY_DUPLICATE_POLICY=evict cargo run
//! ```

use std::fmt;
use std::net::SocketAddr;

use parley_relay::{DuplicatePolicy, MalformedPolicy, SessionConfig};
use thiserror::Error;
use tracing::info;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be used
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: SocketAddr,
    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
    /// Log output format
    pub log_format: LogFormat,
    /// Settings handed to every relay session
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            cors_origins: Vec::new(),
            log_format: LogFormat::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load server configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load server configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("PARLEY_BIND_ADDR") {
            config.bind_addr = value
                .trim()
                .parse()
                .map_err(|e: std::net::AddrParseError| {
                    ConfigError::invalid("PARLEY_BIND_ADDR", &value, e.to_string())
                })?;
        }

        if let Some(value) = lookup("PARLEY_CORS_ORIGINS") {
            config.cors_origins = value
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = lookup("PARLEY_LOG_FORMAT") {
            config.log_format = match value.trim().to_lowercase().as_str() {
                "pretty" | "text" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::invalid(
                        "PARLEY_LOG_FORMAT",
                        &value,
                        "expected `pretty` or `json`",
                    ))
                }
            };
        }

        if let Some(value) = lookup("PARLEY_OUTBOUND_CAPACITY") {
            let capacity: usize = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::invalid("PARLEY_OUTBOUND_CAPACITY", &value, e.to_string())
            })?;
            if capacity == 0 {
                return Err(ConfigError::invalid(
                    "PARLEY_OUTBOUND_CAPACITY",
                    &value,
                    "must be at least 1",
                ));
            }
            config.session.outbound_capacity = capacity;
        }

        if let Some(value) = lookup("PARLEY_DUPLICATE_POLICY") {
            config.session.duplicate_policy = match value.trim().to_lowercase().as_str() {
                "orphan" => DuplicatePolicy::Orphan,
                "evict" => DuplicatePolicy::Evict,
                _ => {
                    return Err(ConfigError::invalid(
                        "PARLEY_DUPLICATE_POLICY",
                        &value,
                        "expected `orphan` or `evict`",
                    ))
                }
            };
        }

        if let Some(value) = lookup("PARLEY_MALFORMED_POLICY") {
            config.session.malformed_policy = match value.trim().to_lowercase().as_str() {
                "close" => MalformedPolicy::Close,
                "report" => MalformedPolicy::Report,
                _ => {
                    return Err(ConfigError::invalid(
                        "PARLEY_MALFORMED_POLICY",
                        &value,
                        "expected `close` or `report`",
                    ))
                }
            };
        }

        Ok(config)
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Bind address: {}", self.bind_addr);
        if self.cors_origins.is_empty() {
            info!("CORS: any origin");
        } else {
            info!("CORS: {}", self.cors_origins.join(", "));
        }
        info!("Outbound capacity: {}", self.session.outbound_capacity);
        info!("Duplicate identity policy: {:?}", self.session.duplicate_policy);
        info!("Malformed message policy: {:?}", self.session.malformed_policy);
    }
}
