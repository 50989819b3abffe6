//! The queue-driven transaction fetcher.
//!
//! A single-consumer FIFO of tx ids with a hard depth bound: producers get
//! [`QueueError::QueueFull`] instead of silently dropping work, and ids
//! that are already queued or in flight are de-duplicated as no-ops.

use crate::ports::TxSource;
use gateway_telemetry::ERRORS_TOTAL;
use parking_lot::Mutex;
use shared_bus::{EventPublisher, GatewayEvent};
use shared_types::TxId;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Default depth of the fetch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Errors from queueing a tx id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue is at capacity; the caller decides whether to retry.
    #[error("tx fetch queue full")]
    QueueFull,

    /// The worker is gone; the process is shutting down.
    #[error("tx fetch queue closed")]
    Closed,
}

/// Producer handle for the fetch queue. Cheap to clone.
#[derive(Clone)]
pub struct TxFetcher {
    queue: mpsc::Sender<TxId>,
    pending: Arc<Mutex<HashSet<TxId>>>,
}

impl TxFetcher {
    /// Enqueue a tx id for fetching.
    ///
    /// Ids already queued or in flight are accepted as no-ops. A full
    /// queue rejects the id rather than dropping older work.
    pub fn queue_tx_id(&self, id: TxId) -> Result<(), QueueError> {
        let mut pending = self.pending.lock();
        if pending.contains(&id) {
            return Ok(());
        }

        match self.queue.try_send(id.clone()) {
            Ok(()) => {
                pending.insert(id);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(QueueError::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Ids currently queued or in flight.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// The consumer side: pulls ids, fetches, publishes `tx-fetched`.
pub struct TxFetchWorker {
    receiver: mpsc::Receiver<TxId>,
    pending: Arc<Mutex<HashSet<TxId>>>,
    source: Arc<dyn TxSource>,
    bus: Arc<dyn EventPublisher>,
    shutdown: watch::Receiver<bool>,
}

impl TxFetchWorker {
    /// Run until the queue closes or a stop is requested. Pending queue
    /// items are discarded on stop.
    pub async fn run(mut self) {
        loop {
            let id = tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                maybe = self.receiver.recv() => {
                    let Some(id) = maybe else { break };
                    id
                }
            };

            match self.source.get_tx(&id).await {
                Ok(tx) => {
                    debug!(tx_id = %id, "missing tx fetched");
                    self.bus.publish(GatewayEvent::TxFetched(tx)).await;
                }
                Err(e) => {
                    // Dropped on purpose: the repair worker re-queues the
                    // journal entry on a later tick.
                    warn!(tx_id = %id, error = %e, "async tx fetch failed");
                    ERRORS_TOTAL.with_label_values(&["tx_fetcher", "fetch"]).inc();
                }
            }

            self.pending.lock().remove(&id);
        }
        debug!("tx fetch worker stopped");
    }
}

/// Build a fetch queue of the given capacity plus its worker.
pub fn new_tx_fetcher(
    source: Arc<dyn TxSource>,
    bus: Arc<dyn EventPublisher>,
    capacity: usize,
    shutdown: watch::Receiver<bool>,
) -> (TxFetcher, TxFetchWorker) {
    let (queue, receiver) = mpsc::channel(capacity);
    let pending = Arc::new(Mutex::new(HashSet::new()));

    let fetcher = TxFetcher {
        queue,
        pending: Arc::clone(&pending),
    };
    let worker = TxFetchWorker {
        receiver,
        pending,
        source,
        bus,
        shutdown,
    };
    (fetcher, worker)
}
