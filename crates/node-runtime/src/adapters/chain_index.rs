//! The chain database as seen through each consumer's port.

use async_trait::async_trait;
use gw_block_importer::IndexError;
use gw_chain_db::ChainDb;
use gw_tx_ingest::SinkError;
use shared_types::{Block, BlockId, Transaction, TxId};
use std::sync::Arc;

/// Adapter exposing [`ChainDb`] through the importer and ingest ports.
pub struct ChainDbAdapter {
    db: Arc<ChainDb>,
}

impl ChainDbAdapter {
    /// Wrap a database handle.
    pub fn new(db: Arc<ChainDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl gw_block_importer::ChainIndex for ChainDbAdapter {
    async fn save_block_and_txs(
        &self,
        block: &Block,
        txs: &[Transaction],
        missing_tx_ids: &[TxId],
    ) -> Result<(), IndexError> {
        self.db
            .save_block_and_txs(block, txs, missing_tx_ids)
            .map_err(|e| IndexError(e.to_string()))
    }

    async fn get_max_height(&self) -> Result<i64, IndexError> {
        self.db.get_max_height().map_err(|e| IndexError(e.to_string()))
    }

    async fn get_new_block_hash_by_height(
        &self,
        height: u64,
    ) -> Result<Option<BlockId>, IndexError> {
        self.db
            .get_new_block_hash_by_height(height)
            .map_err(|e| IndexError(e.to_string()))
    }

    async fn reset_to_height(&self, height: u64) -> Result<(), IndexError> {
        self.db
            .reset_to_height(height)
            .map_err(|e| IndexError(e.to_string()))
    }
}

#[async_trait]
impl gw_tx_ingest::TxSink for ChainDbAdapter {
    async fn save_tx(&self, tx: &Transaction) -> Result<(), SinkError> {
        self.db.save_tx(tx).map_err(|e| SinkError(e.to_string()))
    }

    async fn get_missing_tx_ids(&self, limit: usize) -> Result<Vec<TxId>, SinkError> {
        self.db
            .get_missing_tx_ids(limit)
            .map_err(|e| SinkError(e.to_string()))
    }

    async fn mark_missing_tx_attempt(&self, id: &TxId) -> Result<(), SinkError> {
        self.db
            .mark_missing_tx_attempt(id)
            .map_err(|e| SinkError(e.to_string()))
    }
}
