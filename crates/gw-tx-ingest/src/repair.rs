//! The background repair worker.
//!
//! Every tick it scans the missing-tx journal (least recently attempted
//! first), skips ids re-queued within the cooldown, records the attempt,
//! and feeds the rest back into the fetch queue.

use crate::fetcher::{QueueError, TxFetcher};
use crate::ports::TxSink;
use gateway_telemetry::ERRORS_TOTAL;
use shared_types::TxId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Tuning knobs for the repair worker.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Time between scans.
    pub interval: Duration,
    /// Journal entries examined per tick.
    pub batch_size: usize,
    /// Per-id minimum time between re-queues.
    pub cooldown: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
            cooldown: Duration::from_secs(300),
        }
    }
}

impl RepairConfig {
    /// A config with tight timings for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            interval: Duration::from_millis(10),
            batch_size: 10,
            cooldown: Duration::from_millis(100),
        }
    }
}

/// Periodically re-queues still-missing transactions.
pub struct RepairWorker {
    sink: Arc<dyn TxSink>,
    fetcher: TxFetcher,
    config: RepairConfig,
    recently_queued: HashMap<TxId, Instant>,
    shutdown: watch::Receiver<bool>,
}

impl RepairWorker {
    /// Build a repair worker feeding the given fetch queue.
    pub fn new(
        sink: Arc<dyn TxSink>,
        fetcher: TxFetcher,
        config: RepairConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sink,
            fetcher,
            config,
            recently_queued: HashMap::new(),
            shutdown,
        }
    }

    /// Run ticks until a stop is requested.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.config.interval) => {
                    self.tick().await;
                }
            }
        }
        debug!("repair worker stopped");
    }

    /// One scan of the journal.
    pub async fn tick(&mut self) {
        let ids = match self.sink.get_missing_tx_ids(self.config.batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "missing-tx scan failed");
                ERRORS_TOTAL.with_label_values(&["repair", "scan"]).inc();
                return;
            }
        };

        let now = Instant::now();
        let cooldown = self.config.cooldown;
        self.recently_queued
            .retain(|_, queued_at| now.duration_since(*queued_at) < cooldown);

        let mut queued = 0usize;
        for id in ids {
            if self.recently_queued.contains_key(&id) {
                continue;
            }

            if let Err(e) = self.sink.mark_missing_tx_attempt(&id).await {
                warn!(tx_id = %id, error = %e, "attempt bump failed");
            }

            match self.fetcher.queue_tx_id(id.clone()) {
                Ok(()) => {
                    self.recently_queued.insert(id, now);
                    queued += 1;
                }
                Err(QueueError::QueueFull) => {
                    debug!("fetch queue full, deferring rest of the batch");
                    break;
                }
                Err(QueueError::Closed) => return,
            }
        }

        if queued > 0 {
            debug!(queued, "re-queued missing txs");
        }
    }
}
