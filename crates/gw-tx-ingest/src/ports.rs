//! Outbound ports of the ingest workers, with in-memory implementations
//! for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{ChainError, Transaction, TxId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error from the transaction store, stringly typed so workers stay
/// independent of the concrete database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tx sink error: {0}")]
pub struct SinkError(pub String);

/// The fetch worker's view of the upstream chain.
#[async_trait]
pub trait TxSource: Send + Sync {
    /// Fetch a transaction by id.
    async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError>;
}

/// The workers' view of the chain database.
#[async_trait]
pub trait TxSink: Send + Sync {
    /// Insert a transaction; its journal entry is cleared atomically.
    async fn save_tx(&self, tx: &Transaction) -> Result<(), SinkError>;

    /// Journal entries, least recently attempted first.
    async fn get_missing_tx_ids(&self, limit: usize) -> Result<Vec<TxId>, SinkError>;

    /// Bump a journal entry's attempt counter.
    async fn mark_missing_tx_attempt(&self, id: &TxId) -> Result<(), SinkError>;
}

// =============================================================================
// In-memory implementations for tests
// =============================================================================

/// A scripted tx source.
#[derive(Default)]
pub struct MockTxSource {
    txs: Mutex<HashMap<TxId, Transaction>>,
    unavailable: Mutex<HashSet<TxId>>,
}

impl MockTxSource {
    /// An empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `tx` on request.
    pub fn add_tx(&self, tx: Transaction) {
        self.txs.lock().insert(tx.id.clone(), tx);
    }

    /// Make `id` fail with `Unavailable` even if a tx is registered.
    pub fn set_unavailable(&self, id: TxId) {
        self.unavailable.lock().insert(id);
    }
}

#[async_trait]
impl TxSource for MockTxSource {
    async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError> {
        if self.unavailable.lock().contains(id) {
            return Err(ChainError::Unavailable("scripted outage".into()));
        }
        self.txs
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("tx/{id}")))
    }
}

#[derive(Default)]
struct MemorySinkState {
    saved: Vec<Transaction>,
    missing: Vec<TxId>,
    attempts: HashMap<TxId, u32>,
}

/// An in-memory sink mirroring the database contract.
#[derive(Default)]
pub struct MemoryTxSink {
    state: Mutex<MemorySinkState>,
}

impl MemoryTxSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the journal with missing ids.
    pub fn set_missing(&self, ids: Vec<TxId>) {
        self.state.lock().missing = ids;
    }

    /// Transactions saved so far.
    #[must_use]
    pub fn saved(&self) -> Vec<Transaction> {
        self.state.lock().saved.clone()
    }

    /// Attempt count for a journal entry.
    #[must_use]
    pub fn attempts(&self, id: &TxId) -> u32 {
        self.state.lock().attempts.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TxSink for MemoryTxSink {
    async fn save_tx(&self, tx: &Transaction) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        state.missing.retain(|id| id != &tx.id);
        state.saved.push(tx.clone());
        Ok(())
    }

    async fn get_missing_tx_ids(&self, limit: usize) -> Result<Vec<TxId>, SinkError> {
        let state = self.state.lock();
        Ok(state.missing.iter().take(limit).cloned().collect())
    }

    async fn mark_missing_tx_attempt(&self, id: &TxId) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        *state.attempts.entry(id.clone()).or_insert(0) += 1;
        Ok(())
    }
}
