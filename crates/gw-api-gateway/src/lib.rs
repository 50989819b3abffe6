//! # API Gateway
//!
//! The HTTP surface of Permagate:
//!
//! - `GET /healthcheck`: liveness, always 200 while the process runs
//! - `GET /debug`: chain database counters
//! - `GET /gateway_metrics`: Prometheus text exposition
//! - `GET /{txId}` and `GET /{txId}/{subpath}`: raw payload bytes
//!   streamed from the chunk data source
//!
//! Query surfaces beyond these routes live in sibling services; this crate
//! only exposes what the ingestion core serves directly.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod routes;
pub mod service;

pub use routes::{router, AppState};
pub use service::{serve, GatewayHttpError};
