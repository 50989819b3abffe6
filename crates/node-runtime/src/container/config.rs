//! Gateway configuration.
//!
//! The environment is read exactly once, here, into a frozen record.
//! Components receive only the subset they need.

use gateway_telemetry::LogFormat;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from configuration parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A variable was set to a value that does not parse.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// The environment variable.
        key: &'static str,
        /// The offending value.
        value: String,
    },
}

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// First height to import.
    pub start_height: u64,
    /// Exclusive import upper bound.
    pub stop_height: Option<u64>,
    /// Base URL of the trusted upstream node.
    pub trusted_node_url: String,
    /// Bypass the header caches on reads.
    pub skip_cache: bool,
    /// HTTP listen port.
    pub port: u16,
    /// Failure-injection probability for outbound requests.
    pub simulated_request_failure_rate: f64,
    /// Root directory for the database and header caches.
    pub data_dir: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            stop_height: None,
            trusted_node_url: "https://arweave.net".to_string(),
            skip_cache: false,
            port: 4000,
            simulated_request_failure_rate: 0.0,
            data_dir: PathBuf::from("data"),
            log_format: LogFormat::Plain,
        }
    }
}

impl GatewayConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through an arbitrary lookup (testable).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            start_height: parse_or(&lookup, "START_HEIGHT", defaults.start_height)?,
            stop_height: parse_optional(&lookup, "STOP_HEIGHT")?,
            trusted_node_url: lookup("TRUSTED_NODE_URL").unwrap_or(defaults.trusted_node_url),
            skip_cache: parse_bool(&lookup, "SKIP_CACHE", defaults.skip_cache)?,
            port: parse_or(&lookup, "PORT", defaults.port)?,
            simulated_request_failure_rate: parse_or(
                &lookup,
                "SIMULATED_REQUEST_FAILURE_RATE",
                defaults.simulated_request_failure_rate,
            )?,
            data_dir: lookup("DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            log_format: lookup("LOG_FORMAT")
                .map_or(defaults.log_format, |v| LogFormat::from_name(&v)),
        })
    }

    /// Path of the SQLite database file.
    #[must_use]
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("sqlite").join("core.db")
    }

    /// Root of the cached block headers.
    #[must_use]
    pub fn block_store_dir(&self) -> PathBuf {
        self.data_dir.join("headers").join("partial-blocks")
    }

    /// Root of the cached tx headers.
    #[must_use]
    pub fn tx_store_dir(&self) -> PathBuf {
        self.data_dir.join("headers").join("partial-txs")
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_optional<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        },
    }
}
