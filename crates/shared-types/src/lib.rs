//! # Shared Types
//!
//! Core domain types shared by every Permagate subsystem.
//!
//! ## Clusters
//!
//! - **Identifiers**: [`BlockId`], [`TxId`], the 43-character base64url ids
//! - **Chain**: [`Block`], [`Transaction`], [`Tag`], [`BlockWithTxs`]
//! - **Errors**: [`ChainError`], the error vocabulary of the upstream
//!   fetch path

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod entities;
pub mod errors;
pub mod ids;

pub use entities::{Block, BlockWithTxs, Tag, Transaction, TxOffset};
pub use errors::ChainError;
pub use ids::{BlockId, IdError, TxId, ID_LENGTH};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
