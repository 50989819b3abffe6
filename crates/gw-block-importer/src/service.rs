//! The import state machine.

use crate::config::BlockImporterConfig;
use crate::error::ImportError;
use crate::ports::{ChainIndex, ChainSource};
use crate::MAX_FORK_DEPTH;
use gateway_telemetry::{
    BLOCKS_IMPORTED, CHAIN_MAX_HEIGHT, ERRORS_TOTAL, FORK_REPAIRS, MISSING_TXS_DISCOVERED,
    TXS_IMPORTED,
};
use rand::Rng;
use shared_bus::{EventPublisher, GatewayEvent};
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Walks the chain forward, one committed block per iteration.
pub struct BlockImporter<S, I> {
    chain: Arc<S>,
    index: Arc<I>,
    bus: Arc<dyn EventPublisher>,
    config: BlockImporterConfig,
    shutdown: watch::Receiver<bool>,
    tip_height: u64,
    consecutive_errors: u32,
}

impl<S: ChainSource, I: ChainIndex> BlockImporter<S, I> {
    /// Build an importer; `shutdown` flips to `true` to request a stop.
    pub fn new(
        chain: Arc<S>,
        index: Arc<I>,
        bus: Arc<dyn EventPublisher>,
        config: BlockImporterConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chain,
            index,
            bus,
            config,
            shutdown,
            tip_height: 0,
            consecutive_errors: 0,
        }
    }

    /// Last tip height observed upstream.
    #[must_use]
    pub fn tip_height(&self) -> u64 {
        self.tip_height
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// The next height to import: `max(start_height, stored_max + 1)`.
    ///
    /// Blocks cooperatively until the upstream tip covers that height,
    /// polling at the configured interval. Even when several blocks appear
    /// while waiting, only a single step is returned; later iterations
    /// catch up one block at a time.
    pub async fn next_height(&mut self) -> Result<u64, ImportError> {
        let stored_max = self.index.get_max_height().await?;
        let candidate = cmp::max(self.config.start_height as i64, stored_max + 1) as u64;

        loop {
            if self.stop_requested() {
                return Err(ImportError::Stopped);
            }

            match self.chain.get_height().await {
                Ok(tip) => {
                    self.tip_height = tip;
                    if candidate <= tip {
                        return Ok(candidate);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "tip poll failed");
                }
            }

            tokio::time::sleep(self.config.height_polling_interval).await;
        }
    }

    /// Import exactly one block, repairing a fork or gap first if the
    /// fetched block does not extend stored history.
    pub async fn import_block(&mut self, height: u64) -> Result<u64, ImportError> {
        let mut target = height;
        let mut fetched = self.chain.get_block_and_txs_by_height(target).await?;

        if target > self.config.start_height {
            let stored_prev = self.index.get_new_block_hash_by_height(target - 1).await?;
            if stored_prev.as_ref() != Some(&fetched.block.previous_block) {
                let ancestor = self.find_common_ancestor(target).await?;
                warn!(
                    from = target,
                    ancestor, "stored history diverges from upstream, rewinding"
                );
                self.index.reset_to_height(ancestor).await?;
                FORK_REPAIRS.inc();
                target = ancestor + 1;
                fetched = self.chain.get_block_and_txs_by_height(target).await?;
            }
        }

        self.index
            .save_block_and_txs(&fetched.block, &fetched.txs, &fetched.missing_tx_ids)
            .await?;

        BLOCKS_IMPORTED.inc();
        CHAIN_MAX_HEIGHT.set(target as f64);
        TXS_IMPORTED.inc_by(fetched.txs.len() as f64);
        MISSING_TXS_DISCOVERED.inc_by(fetched.missing_tx_ids.len() as f64);

        info!(
            height = target,
            txs = fetched.txs.len(),
            missing = fetched.missing_tx_ids.len(),
            "block imported"
        );

        // Only after the commit: the journal entry exists by now.
        for tx_id in fetched.missing_tx_ids {
            self.bus
                .publish(GatewayEvent::BlockTxFetchFailed {
                    tx_id,
                    height: target,
                })
                .await;
        }

        Ok(target)
    }

    /// Walk back from `from` comparing upstream ids with stored ids until
    /// they agree. At most [`MAX_FORK_DEPTH`] heights are examined.
    async fn find_common_ancestor(&self, from: u64) -> Result<u64, ImportError> {
        let mut height = from;
        for _ in 0..MAX_FORK_DEPTH {
            if height == self.config.start_height || height == 0 {
                break;
            }
            height -= 1;

            let Some(stored) = self.index.get_new_block_hash_by_height(height).await? else {
                continue;
            };
            let upstream = self.chain.get_block_by_height(height).await?;
            if upstream.indep_hash == stored {
                return Ok(height);
            }
        }
        Err(ImportError::MaximumForkDepthExceeded { height: from })
    }

    /// Run until the stop height is reached, a stop is requested, or a
    /// fatal error occurs. Transient errors retry the same height with
    /// exponential backoff.
    pub async fn run(mut self) -> Result<(), ImportError> {
        info!(
            start_height = self.config.start_height,
            stop_height = ?self.config.stop_height,
            "block importer starting"
        );

        loop {
            let target = match self.next_height().await {
                Ok(height) => height,
                Err(ImportError::Stopped) => break,
                Err(e) => {
                    warn!(error = %e, "could not determine next height");
                    self.consecutive_errors += 1;
                    self.sleep_backoff().await;
                    continue;
                }
            };

            if let Some(stop) = self.config.stop_height {
                if target >= stop {
                    info!(stop_height = stop, "stop height reached");
                    break;
                }
            }

            match self.import_block(target).await {
                Ok(_) => {
                    self.consecutive_errors = 0;
                }
                Err(ImportError::Stopped) => break,
                Err(e) if e.is_transient() => {
                    ERRORS_TOTAL
                        .with_label_values(&["importer", "transient"])
                        .inc();
                    self.consecutive_errors += 1;
                    warn!(
                        height = target,
                        error = %e,
                        consecutive_errors = self.consecutive_errors,
                        "import failed, backing off"
                    );
                    self.sleep_backoff().await;
                }
                Err(e) => {
                    ERRORS_TOTAL.with_label_values(&["importer", "fatal"]).inc();
                    error!(error = %e, "fatal import error, aborting importer");
                    return Err(e);
                }
            }

            if self.stop_requested() {
                break;
            }
        }

        info!("block importer stopped");
        Ok(())
    }

    /// Exponential backoff with ±20 % jitter.
    async fn sleep_backoff(&self) {
        let exponent = self.consecutive_errors.saturating_sub(1).min(5);
        let base_ms = self.config.backoff_base.as_millis() as u64;
        let cap_ms = self.config.backoff_cap.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1 << exponent).min(cap_ms);
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        let delay = Duration::from_millis((delay_ms as f64 * jitter) as u64);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MemoryChainIndex, MockChainSource};
    use shared_bus::{EventFilter, InMemoryEventBus};
    use shared_types::{Block, BlockId, BlockWithTxs, Transaction, TxId};
    use tokio::time::timeout;

    fn make_id(tag: &str, n: u64) -> String {
        let mut id = format!("{tag}{n}");
        while id.len() < shared_types::ID_LENGTH {
            id.push('_');
        }
        id
    }

    fn make_tx(tag: &str, n: u64) -> Transaction {
        Transaction {
            id: TxId::new(make_id(tag, n)).unwrap(),
            owner: "owner".into(),
            target: String::new(),
            quantity: "0".into(),
            reward: "1".into(),
            tags: Vec::new(),
            data_size: 8,
            data_root: "root".into(),
            signature: "sig".into(),
        }
    }

    /// A linear chain of blocks `from..=to`, each carrying `tx_count` txs.
    fn seed_chain(source: &MockChainSource, from: u64, to: u64, tx_count: usize) {
        for height in from..=to {
            let txs: Vec<Transaction> = (0..tx_count)
                .map(|i| make_tx(&format!("tx{height}x{i}x"), height))
                .collect();
            let block = Block {
                indep_hash: BlockId::new(make_id("block", height)).unwrap(),
                height,
                previous_block: BlockId::new(make_id("block", height.wrapping_sub(1))).unwrap(),
                nonce: "n".into(),
                timestamp: height,
                txs: txs.iter().map(|t| t.id.clone()).collect(),
            };
            source.add_block(BlockWithTxs {
                block,
                txs,
                missing_tx_ids: Vec::new(),
            });
        }
    }

    struct Harness {
        source: Arc<MockChainSource>,
        index: Arc<MemoryChainIndex>,
        bus: Arc<InMemoryEventBus>,
        importer: BlockImporter<MockChainSource, MemoryChainIndex>,
        _shutdown: watch::Sender<bool>,
    }

    fn harness(start_height: u64) -> Harness {
        let source = Arc::new(MockChainSource::new());
        let index = Arc::new(MemoryChainIndex::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let importer = BlockImporter::new(
            Arc::clone(&source),
            Arc::clone(&index),
            Arc::clone(&bus) as Arc<dyn EventPublisher>,
            BlockImporterConfig::for_testing(start_height),
            shutdown_rx,
        );
        Harness {
            source,
            index,
            bus,
            importer,
            _shutdown: shutdown_tx,
        }
    }

    #[tokio::test]
    async fn single_block_with_all_txs() {
        let mut h = harness(982_575);
        seed_chain(&h.source, 982_575, 982_575, 3);

        h.importer.import_block(982_575).await.unwrap();

        assert_eq!(h.index.get_max_height().await.unwrap(), 982_575);
        assert_eq!(h.index.block_count(), 1);
        assert_eq!(h.index.tx_count(), 3);
        assert_eq!(h.index.missing_count(), 0);
    }

    #[tokio::test]
    async fn block_with_unavailable_tx() {
        let mut h = harness(982_575);
        seed_chain(&h.source, 982_575, 982_575, 3);

        // Make one tx unavailable upstream: it moves from txs to missing.
        let missing_id = TxId::new("oq-v4Cv61YAGmY_KlLdxmGp5HjcldvOSLOMv0UPjSTE").unwrap();
        let mut served = h
            .source
            .get_block_and_txs_by_height(982_575)
            .await
            .unwrap();
        let dropped = served.txs.pop().unwrap();
        served.block.txs.retain(|id| *id != dropped.id);
        served.block.txs.push(missing_id.clone());
        served.missing_tx_ids.push(missing_id.clone());
        h.source.add_block(served);

        let mut sub = h.bus.subscribe(EventFilter::all());
        h.importer.import_block(982_575).await.unwrap();

        assert_eq!(h.index.get_max_height().await.unwrap(), 982_575);
        assert_eq!(h.index.block_count(), 1);
        assert_eq!(h.index.tx_count(), 2);
        assert_eq!(h.index.missing_count(), 1);

        // The failure event is observable only after the commit, and the
        // journal entry already exists at emission time.
        match sub.try_recv().unwrap() {
            Some(GatewayEvent::BlockTxFetchFailed { tx_id, height }) => {
                assert_eq!(tx_id, missing_id);
                assert_eq!(height, 982_575);
                assert!(h.index.is_missing(&tx_id));
            }
            other => panic!("expected fetch-failed event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn gap_import_advances_one_step() {
        let mut h = harness(1);
        seed_chain(&h.source, 1, 6, 0);

        h.importer.import_block(1).await.unwrap();
        h.importer.import_block(6).await.unwrap();

        assert_eq!(h.index.block_count(), 2);
        assert_eq!(h.index.get_max_height().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fork_walk_depth_is_bounded() {
        let mut h = harness(0);
        seed_chain(&h.source, 0, 51, 0);

        // Nothing stored at any height: every comparison misses.
        let result = h.importer.import_block(51).await;
        assert_eq!(
            result,
            Err(ImportError::MaximumForkDepthExceeded { height: 51 })
        );
        assert_eq!(h.index.block_count(), 0);
    }

    #[tokio::test]
    async fn fork_repair_rewinds_to_common_ancestor() {
        let mut h = harness(10);
        seed_chain(&h.source, 10, 12, 0);
        h.importer.import_block(10).await.unwrap();
        h.importer.import_block(11).await.unwrap();
        h.importer.import_block(12).await.unwrap();

        // Upstream reorganizes heights 11 and 12.
        let forked_11 = Block {
            indep_hash: BlockId::new(make_id("fork", 11)).unwrap(),
            height: 11,
            previous_block: BlockId::new(make_id("block", 10)).unwrap(),
            nonce: "n".into(),
            timestamp: 11,
            txs: Vec::new(),
        };
        let forked_12 = Block {
            indep_hash: BlockId::new(make_id("fork", 12)).unwrap(),
            height: 12,
            previous_block: forked_11.indep_hash.clone(),
            nonce: "n".into(),
            timestamp: 12,
            txs: Vec::new(),
        };
        let forked_13 = Block {
            indep_hash: BlockId::new(make_id("fork", 13)).unwrap(),
            height: 13,
            previous_block: forked_12.indep_hash.clone(),
            nonce: "n".into(),
            timestamp: 13,
            txs: Vec::new(),
        };
        for block in [forked_11, forked_12, forked_13] {
            h.source.add_block(BlockWithTxs {
                block,
                txs: Vec::new(),
                missing_tx_ids: Vec::new(),
            });
        }

        // Importing 13 notices the divergence, rewinds to 10, and imports
        // the forked block at 11.
        let committed = h.importer.import_block(13).await.unwrap();
        assert_eq!(committed, 11);
        assert_eq!(h.index.get_max_height().await.unwrap(), 11);
        assert_eq!(
            h.index
                .get_new_block_hash_by_height(11)
                .await
                .unwrap()
                .unwrap()
                .as_str(),
            make_id("fork", 11)
        );
    }

    #[tokio::test]
    async fn next_height_on_empty_store_is_start_height() {
        let mut h = harness(982_575);
        seed_chain(&h.source, 982_575, 982_575, 0);

        assert_eq!(h.importer.next_height().await.unwrap(), 982_575);
    }

    #[tokio::test]
    async fn next_height_waits_for_tip_to_advance() {
        let mut h = harness(1);
        seed_chain(&h.source, 1, 1, 0);
        h.importer.import_block(1).await.unwrap();
        h.source.set_tip(1);

        let source = Arc::clone(&h.source);
        let pending = tokio::spawn(async move {
            let mut importer = h.importer;
            importer.next_height().await
        });

        // Stalled tip: the call must not complete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        source.set_tip(2);
        let height = timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(height, 2);
    }

    #[tokio::test]
    async fn next_height_steps_once_even_when_tip_jumps() {
        let mut h = harness(1);
        seed_chain(&h.source, 1, 1, 0);
        h.importer.import_block(1).await.unwrap();
        h.source.set_tip(1);

        let source = Arc::clone(&h.source);
        let pending = tokio::spawn(async move {
            let mut importer = h.importer;
            importer.next_height().await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        source.set_tip(3);

        let height = timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(height, 2);
    }

    #[tokio::test]
    async fn run_stops_at_stop_height() {
        let source = Arc::new(MockChainSource::new());
        seed_chain(&source, 0, 3, 0);
        let index = Arc::new(MemoryChainIndex::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut config = BlockImporterConfig::for_testing(0);
        config.stop_height = Some(2);
        let importer = BlockImporter::new(
            Arc::clone(&source),
            Arc::clone(&index),
            Arc::clone(&bus) as Arc<dyn EventPublisher>,
            config,
            shutdown_rx,
        );

        timeout(Duration::from_secs(5), importer.run())
            .await
            .unwrap()
            .unwrap();

        // Heights 0 and 1 imported; 2 is the exclusive bound.
        assert_eq!(index.get_max_height().await.unwrap(), 1);
        assert_eq!(index.block_count(), 2);
        drop(shutdown_tx);
    }

    #[tokio::test]
    async fn stop_interrupts_tip_wait() {
        let source = Arc::new(MockChainSource::new());
        seed_chain(&source, 0, 0, 0);
        let index = Arc::new(MemoryChainIndex::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let importer = BlockImporter::new(
            Arc::clone(&source),
            Arc::clone(&index),
            Arc::clone(&bus) as Arc<dyn EventPublisher>,
            BlockImporterConfig::for_testing(0),
            shutdown_rx,
        );

        let handle = tokio::spawn(importer.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(true).unwrap();

        timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
