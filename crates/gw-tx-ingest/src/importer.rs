//! The transaction importer: consumes `tx-fetched` events and writes
//! through to the chain database.

use crate::ports::TxSink;
use gateway_telemetry::{ERRORS_TOTAL, TXS_IMPORTED};
use shared_bus::{GatewayEvent, Subscription};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Single consumer of fetched transactions.
pub struct TxImporter {
    subscription: Subscription,
    sink: Arc<dyn TxSink>,
    shutdown: watch::Receiver<bool>,
}

impl TxImporter {
    /// Build an importer over a bus subscription (filtered to
    /// `tx-fetched` by the caller).
    pub fn new(
        subscription: Subscription,
        sink: Arc<dyn TxSink>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            subscription,
            sink,
            shutdown,
        }
    }

    /// Run until the bus closes or a stop is requested. A failed insert is
    /// logged and dropped; the journal entry survives until a later fetch.
    pub async fn run(mut self) {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                maybe = self.subscription.recv() => {
                    let Some(event) = maybe else { break };
                    event
                }
            };

            let GatewayEvent::TxFetched(tx) = event else {
                continue;
            };

            match self.sink.save_tx(&tx).await {
                Ok(()) => {
                    TXS_IMPORTED.inc();
                    debug!(tx_id = %tx.id, "tx imported");
                }
                Err(e) => {
                    warn!(tx_id = %tx.id, error = %e, "tx import failed");
                    ERRORS_TOTAL.with_label_values(&["tx_importer", "save"]).inc();
                }
            }
        }
        debug!("tx importer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryTxSink;
    use shared_bus::{EventFilter, EventPublisher, EventTopic, InMemoryEventBus};
    use shared_types::Transaction;
    use std::time::Duration;
    use tokio::time::timeout;

    fn make_tx(c: char) -> Transaction {
        let id: String = std::iter::repeat(c).take(shared_types::ID_LENGTH).collect();
        Transaction {
            id: id.parse().unwrap(),
            owner: "owner".into(),
            target: String::new(),
            quantity: "0".into(),
            reward: "1".into(),
            tags: Vec::new(),
            data_size: 4,
            data_root: "root".into(),
            signature: "sig".into(),
        }
    }

    #[tokio::test]
    async fn fetched_txs_are_saved() {
        let bus = Arc::new(InMemoryEventBus::new());
        let sink = Arc::new(MemoryTxSink::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let importer = TxImporter::new(
            bus.subscribe(EventFilter::topic(EventTopic::TxFetched)),
            Arc::clone(&sink) as Arc<dyn TxSink>,
            shutdown_rx,
        );
        let handle = tokio::spawn(importer.run());

        let tx = make_tx('a');
        bus.publish(GatewayEvent::TxFetched(tx.clone())).await;

        timeout(Duration::from_secs(1), async {
            while sink.saved().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(sink.saved()[0].id, tx.id);

        shutdown.send(true).unwrap();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
