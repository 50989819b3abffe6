//! # Gateway Telemetry
//!
//! Process-wide observability for Permagate: a Prometheus registry with the
//! gateway's counters and gauges, plus tracing-subscriber initialization.
//!
//! Components never build their own collectors; they import the handles
//! exported here and the construction site registers everything once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, BLOCKS_IMPORTED, CHAIN_MAX_HEIGHT,
    CHUNK_BYTES_STREAMED, ERRORS_TOTAL, FORK_REPAIRS, MISSING_TXS_DISCOVERED, PEER_REFRESHES,
    TXS_IMPORTED, UNCAUGHT_EXCEPTIONS,
};

use thiserror::Error;

/// Telemetry initialization errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Metric registration or encoding failed.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// The tracing subscriber could not be installed.
    #[error("logging error: {0}")]
    Logging(String),
}
