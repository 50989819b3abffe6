//! # Tx Ingest Workers
//!
//! The asynchronous half of transaction ingestion:
//!
//! - [`fetcher`]: a bounded FIFO of tx ids fed by `block-tx-fetch-failed`
//!   events and the repair worker; fetched txs are published as
//!   `tx-fetched`.
//! - [`importer`]: consumes `tx-fetched` and writes transactions to the
//!   chain database, which clears their journal entries.
//! - [`repair`]: periodically re-queues journal entries that are still
//!   missing, with a per-id cooldown.
//!
//! No error in any of these workers ever reaches the block importer.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod fetcher;
pub mod importer;
pub mod ports;
pub mod repair;

pub use fetcher::{new_tx_fetcher, QueueError, TxFetchWorker, TxFetcher};
pub use importer::TxImporter;
pub use ports::{MemoryTxSink, MockTxSource, SinkError, TxSink, TxSource};
pub use repair::{RepairConfig, RepairWorker};
