//! The chain client as seen through each consumer's port.

use async_trait::async_trait;
use gw_chain_client::ArweaveClient;
use shared_types::{Block, BlockWithTxs, ChainError, Transaction, TxId, TxOffset};

/// Adapter exposing [`ArweaveClient`] through the importer, ingest, and
/// data-source ports.
pub struct ChainClientAdapter {
    client: ArweaveClient,
}

impl ChainClientAdapter {
    /// Wrap a client.
    pub fn new(client: ArweaveClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl gw_block_importer::ChainSource for ChainClientAdapter {
    async fn get_height(&self) -> Result<u64, ChainError> {
        self.client.get_height().await
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Block, ChainError> {
        self.client.get_block_by_height(height).await
    }

    async fn get_block_and_txs_by_height(
        &self,
        height: u64,
    ) -> Result<BlockWithTxs, ChainError> {
        self.client.get_block_and_txs_by_height(height).await
    }
}

#[async_trait]
impl gw_tx_ingest::TxSource for ChainClientAdapter {
    async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError> {
        self.client.get_tx(id).await
    }
}

#[async_trait]
impl gw_data_source::ChunkSource for ChainClientAdapter {
    async fn get_tx(&self, id: &TxId) -> Result<Transaction, ChainError> {
        self.client.get_tx(id).await
    }

    async fn get_tx_offset(&self, id: &TxId) -> Result<TxOffset, ChainError> {
        self.client.get_tx_offset(id).await
    }

    async fn get_chunk(&self, offset: u64) -> Result<Vec<u8>, ChainError> {
        self.client.get_chunk(offset).await
    }
}
