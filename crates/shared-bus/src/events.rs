//! # Gateway Events
//!
//! The closed set of events that flow through the bus.

use serde::{Deserialize, Serialize};
use shared_types::{Transaction, TxId};
use std::fmt;

/// All events that can be published to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// A block was committed but this transaction could not be fetched
    /// synchronously. Consumed by the tx fetcher.
    BlockTxFetchFailed {
        /// Id of the transaction that is still missing.
        tx_id: TxId,
        /// Height of the block that references it.
        height: u64,
    },

    /// A transaction was fetched asynchronously. Consumed by the tx
    /// importer.
    TxFetched(Transaction),
}

impl GatewayEvent {
    /// The topic this event is published under.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::BlockTxFetchFailed { .. } => EventTopic::BlockTxFetchFailed,
            Self::TxFetched(_) => EventTopic::TxFetched,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Per-tx fetch failures emitted after a block commit.
    BlockTxFetchFailed,
    /// Asynchronously fetched transactions.
    TxFetched,
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BlockTxFetchFailed => "block-tx-fetch-failed",
            Self::TxFetched => "tx-fetched",
        };
        f.write_str(name)
    }
}

/// Filter for subscribing to specific topics. Empty means all topics.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// A filter that accepts every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// A filter for a single topic.
    #[must_use]
    pub fn topic(topic: EventTopic) -> Self {
        Self {
            topics: vec![topic],
        }
    }

    /// Whether an event passes this filter.
    #[must_use]
    pub fn matches(&self, event: &GatewayEvent) -> bool {
        self.topics.is_empty() || self.topics.contains(&event.topic())
    }
}
