//! # Shared Bus - Event Bus for the Ingestion Pipeline
//!
//! Decouples the block importer from the transaction workers: the importer
//! publishes per-tx fetch failures after a block commits, the tx fetcher
//! publishes fetched transactions, and the tx importer consumes them. The
//! topic set is closed; see [`EventTopic`].
//!
//! Handlers must be non-blocking; they enqueue work into their component's
//! own queue rather than doing I/O on the publisher's task.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventFilter, EventTopic, GatewayEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum events buffered per subscriber before older events are dropped
/// for that (lagging) subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
