//! # Chain Client
//!
//! Everything the gateway needs to talk to the upstream chain:
//!
//! - [`store`]: content-addressed on-disk caches for raw block/tx JSON
//! - [`failure`]: deterministic probabilistic fault injection
//! - [`peers`]: the ranked peer set behind tx/chunk fan-out
//! - [`client`]: the two-tier fetch client composing all of the above
//!
//! The client prefers the disk cache, then the trusted node, and for
//! tx/chunk requests falls through to ranked peers. Schema-invalid
//! responses are neither cached nor returned.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod chunk;
pub mod client;
pub mod failure;
pub mod peers;
pub mod store;
pub mod wire;

pub use client::{ArweaveClient, ChainClientConfig};
pub use failure::FailureSimulator;
pub use peers::{PeerEntry, PeerRegistry};
pub use store::BlobStore;
