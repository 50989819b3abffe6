//! Outbound ports of the importer, with in-memory implementations for
//! tests.

use crate::error::IndexError;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_types::{Block, BlockId, BlockWithTxs, ChainError, Transaction, TxId};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// The importer's view of the upstream chain.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current tip height.
    async fn get_height(&self) -> Result<u64, ChainError>;

    /// Block at `height`, without transactions (fork walk).
    async fn get_block_by_height(&self, height: u64) -> Result<Block, ChainError>;

    /// Block at `height` plus its synchronously fetched transactions.
    async fn get_block_and_txs_by_height(&self, height: u64)
        -> Result<BlockWithTxs, ChainError>;
}

/// The importer's view of the chain database.
#[async_trait]
pub trait ChainIndex: Send + Sync {
    /// Commit a block, its transactions, and journal entries atomically.
    async fn save_block_and_txs(
        &self,
        block: &Block,
        txs: &[Transaction],
        missing_tx_ids: &[TxId],
    ) -> Result<(), IndexError>;

    /// Largest committed height, `-1` when empty.
    async fn get_max_height(&self) -> Result<i64, IndexError>;

    /// Id of the committed block at `height`.
    async fn get_new_block_hash_by_height(
        &self,
        height: u64,
    ) -> Result<Option<BlockId>, IndexError>;

    /// Drop every block above `height` and its transactions.
    async fn reset_to_height(&self, height: u64) -> Result<(), IndexError>;
}

// =============================================================================
// In-memory implementations for tests
// =============================================================================

/// A scripted chain source backed by a height-keyed map.
pub struct MockChainSource {
    blocks: Mutex<BTreeMap<u64, BlockWithTxs>>,
    tip: AtomicU64,
}

impl MockChainSource {
    /// An empty source with tip 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: Mutex::new(BTreeMap::new()),
            tip: AtomicU64::new(0),
        }
    }

    /// Serve `block_with_txs` at its height and raise the tip to cover it.
    pub fn add_block(&self, block_with_txs: BlockWithTxs) {
        let height = block_with_txs.block.height;
        self.blocks.lock().insert(height, block_with_txs);
        self.tip.fetch_max(height, Ordering::SeqCst);
    }

    /// Move the reported tip.
    pub fn set_tip(&self, height: u64) {
        self.tip.store(height, Ordering::SeqCst);
    }
}

impl Default for MockChainSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainSource for MockChainSource {
    async fn get_height(&self) -> Result<u64, ChainError> {
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn get_block_by_height(&self, height: u64) -> Result<Block, ChainError> {
        self.blocks
            .lock()
            .get(&height)
            .map(|b| b.block.clone())
            .ok_or_else(|| ChainError::NotFound(format!("block/height/{height}")))
    }

    async fn get_block_and_txs_by_height(
        &self,
        height: u64,
    ) -> Result<BlockWithTxs, ChainError> {
        self.blocks
            .lock()
            .get(&height)
            .cloned()
            .ok_or_else(|| ChainError::NotFound(format!("block/height/{height}")))
    }
}

#[derive(Default)]
struct MemoryState {
    blocks: BTreeMap<u64, Block>,
    txs: HashMap<TxId, Transaction>,
    missing: HashMap<TxId, u64>,
}

/// An in-memory chain index mirroring the database contract.
#[derive(Default)]
pub struct MemoryChainIndex {
    state: Mutex<MemoryState>,
}

impl MemoryChainIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed block count.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.state.lock().blocks.len()
    }

    /// Committed transaction count.
    #[must_use]
    pub fn tx_count(&self) -> usize {
        self.state.lock().txs.len()
    }

    /// Journal entry count.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.state.lock().missing.len()
    }

    /// Whether a journal entry exists for `id`.
    #[must_use]
    pub fn is_missing(&self, id: &TxId) -> bool {
        self.state.lock().missing.contains_key(id)
    }
}

#[async_trait]
impl ChainIndex for MemoryChainIndex {
    async fn save_block_and_txs(
        &self,
        block: &Block,
        txs: &[Transaction],
        missing_tx_ids: &[TxId],
    ) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        state.blocks.insert(block.height, block.clone());
        for tx in txs {
            state.missing.remove(&tx.id);
            state.txs.insert(tx.id.clone(), tx.clone());
        }
        for id in missing_tx_ids {
            if !state.txs.contains_key(id) {
                state.missing.entry(id.clone()).or_insert(block.height);
            }
        }
        Ok(())
    }

    async fn get_max_height(&self) -> Result<i64, IndexError> {
        let state = self.state.lock();
        Ok(state
            .blocks
            .keys()
            .next_back()
            .map_or(-1, |h| *h as i64))
    }

    async fn get_new_block_hash_by_height(
        &self,
        height: u64,
    ) -> Result<Option<BlockId>, IndexError> {
        let state = self.state.lock();
        Ok(state.blocks.get(&height).map(|b| b.indep_hash.clone()))
    }

    async fn reset_to_height(&self, height: u64) -> Result<(), IndexError> {
        let mut state = self.state.lock();
        state.blocks.retain(|h, _| *h <= height);
        state.missing.retain(|_, first_seen| *first_seen <= height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_id(c: char) -> BlockId {
        let id: String = std::iter::repeat(c).take(shared_types::ID_LENGTH).collect();
        BlockId::new(id).unwrap()
    }

    fn block(height: u64, id: char, prev: char) -> Block {
        Block {
            indep_hash: make_id(id),
            height,
            previous_block: make_id(prev),
            nonce: "n".into(),
            timestamp: height,
            txs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn mock_source_serves_and_404s() {
        let source = MockChainSource::new();
        source.add_block(BlockWithTxs {
            block: block(3, 'a', 'z'),
            txs: Vec::new(),
            missing_tx_ids: Vec::new(),
        });

        assert_eq!(source.get_height().await.unwrap(), 3);
        assert_eq!(source.get_block_by_height(3).await.unwrap().height, 3);
        assert!(matches!(
            source.get_block_by_height(9).await,
            Err(ChainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn memory_index_reset() {
        let index = MemoryChainIndex::new();
        index
            .save_block_and_txs(&block(1, 'a', 'z'), &[], &[])
            .await
            .unwrap();
        index
            .save_block_and_txs(&block(2, 'b', 'a'), &[], &[])
            .await
            .unwrap();

        index.reset_to_height(1).await.unwrap();
        assert_eq!(index.get_max_height().await.unwrap(), 1);
        assert_eq!(index.block_count(), 1);
    }
}
