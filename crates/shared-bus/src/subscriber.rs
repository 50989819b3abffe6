//! # Event Subscriber
//!
//! The subscription side of the bus.

use crate::events::{EventFilter, GatewayEvent};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The event bus was dropped.
    #[error("event bus closed")]
    Closed,
}

/// A handle for receiving events matching a filter.
///
/// A subscriber that falls more than the channel capacity behind loses the
/// oldest events for itself only; the lag is logged and reception resumes.
pub struct Subscription {
    receiver: broadcast::Receiver<GatewayEvent>,
    filter: EventFilter,
}

impl Subscription {
    pub(crate) fn new(receiver: broadcast::Receiver<GatewayEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next event that matches the filter, or `None` once the
    /// bus is closed.
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "subscriber lagged, events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Receive without blocking. `Ok(None)` means no event is ready.
    pub fn try_recv(&mut self) -> Result<Option<GatewayEvent>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    /// The filter this subscription was created with.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;
    use crate::publisher::{EventPublisher, InMemoryEventBus};
    use shared_types::{Transaction, TxId};
    use std::str::FromStr;
    use std::time::Duration;
    use tokio::time::timeout;

    fn tx(idc: char) -> Transaction {
        let id: String = std::iter::repeat(idc).take(shared_types::ID_LENGTH).collect();
        Transaction {
            id: TxId::from_str(&id).unwrap(),
            owner: "owner".into(),
            target: String::new(),
            quantity: "0".into(),
            reward: "0".into(),
            tags: Vec::new(),
            data_size: 0,
            data_root: String::new(),
            signature: "sig".into(),
        }
    }

    #[tokio::test]
    async fn recv_delivers_published_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(GatewayEvent::TxFetched(tx('a'))).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert!(matches!(received, GatewayEvent::TxFetched(_)));
    }

    #[tokio::test]
    async fn recv_applies_filter() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::topic(EventTopic::TxFetched));

        bus.publish(GatewayEvent::BlockTxFetchFailed {
            tx_id: tx('b').id,
            height: 9,
        })
        .await;
        bus.publish(GatewayEvent::TxFetched(tx('c'))).await;

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert!(matches!(received, GatewayEvent::TxFetched(_)));
    }

    #[tokio::test]
    async fn try_recv_empty() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn recv_none_after_bus_dropped() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        drop(bus);
        assert!(sub.recv().await.is_none());
    }
}
