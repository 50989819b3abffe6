//! # Chain Database
//!
//! The single owner of persisted chain state: committed blocks, committed
//! transactions, and the missing-tx journal, in one SQLite database.
//!
//! All multi-row operations run inside a transaction on the single
//! connection; readers observe committed writes only.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod db;

pub use db::{ChainDb, DbError, DebugInfo};
