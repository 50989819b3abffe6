//! Prometheus metrics for the gateway.
//!
//! Naming convention: `gateway_<component>_<metric>_<unit>`.

use crate::TelemetryError;
use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PROCESS-WIDE
    // =========================================================================

    /// Errors by component and kind.
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("gateway_errors_total", "Errors by component and kind"),
        &["component", "kind"]
    ).expect("metric creation failed");

    /// Panics caught at task boundaries.
    pub static ref UNCAUGHT_EXCEPTIONS: Counter = Counter::new(
        "gateway_uncaught_exceptions_total",
        "Worker panics caught without crashing the process"
    ).expect("metric creation failed");

    // =========================================================================
    // BLOCK IMPORTER
    // =========================================================================

    /// Blocks committed to the chain database.
    pub static ref BLOCKS_IMPORTED: Counter = Counter::new(
        "gateway_importer_blocks_imported_total",
        "Total blocks committed to the chain database"
    ).expect("metric creation failed");

    /// Fork repairs performed.
    pub static ref FORK_REPAIRS: Counter = Counter::new(
        "gateway_importer_fork_repairs_total",
        "Times the importer rewound to a common ancestor"
    ).expect("metric creation failed");

    /// Largest committed height.
    pub static ref CHAIN_MAX_HEIGHT: Gauge = Gauge::new(
        "gateway_importer_max_height",
        "Largest block height committed to the chain database"
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Transactions committed (synchronous and asynchronous paths).
    pub static ref TXS_IMPORTED: Counter = Counter::new(
        "gateway_txs_imported_total",
        "Total transactions committed to the chain database"
    ).expect("metric creation failed");

    /// Tx ids recorded in the missing-tx journal.
    pub static ref MISSING_TXS_DISCOVERED: Counter = Counter::new(
        "gateway_txs_missing_total",
        "Tx ids that failed their synchronous fetch and entered the journal"
    ).expect("metric creation failed");

    // =========================================================================
    // CHAIN CLIENT
    // =========================================================================

    /// Peer list refreshes.
    pub static ref PEER_REFRESHES: Counter = Counter::new(
        "gateway_client_peer_refreshes_total",
        "Times the ranked peer list was rebuilt"
    ).expect("metric creation failed");

    /// Payload bytes streamed to data consumers.
    pub static ref CHUNK_BYTES_STREAMED: Counter = Counter::new(
        "gateway_data_chunk_bytes_streamed_total",
        "Payload bytes streamed from the chunk data source"
    ).expect("metric creation failed");
}

/// Handle proving the registry was populated.
pub struct MetricsHandle {
    _registry: Arc<Registry>,
}

/// Register every gateway metric with the global registry. Call once at
/// startup; a second call reports the duplicate registration as an error.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ERRORS_TOTAL.clone()),
        Box::new(UNCAUGHT_EXCEPTIONS.clone()),
        Box::new(BLOCKS_IMPORTED.clone()),
        Box::new(FORK_REPAIRS.clone()),
        Box::new(CHAIN_MAX_HEIGHT.clone()),
        Box::new(TXS_IMPORTED.clone()),
        Box::new(MISSING_TXS_DISCOVERED.clone()),
        Box::new(PEER_REFRESHES.clone()),
        Box::new(CHUNK_BYTES_STREAMED.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: Arc::new(REGISTRY.clone()),
    })
}

/// Encode the registry as Prometheus text exposition format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}
