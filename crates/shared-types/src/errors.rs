//! # Error Types
//!
//! The shared error vocabulary of the upstream fetch path. Components that
//! own a retry loop decide per variant whether to back off, fall through to
//! peers, or record the item as missing.

use thiserror::Error;

/// Errors surfaced by the chain client and its callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// Every source (trusted node and peers) was exhausted.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The trusted node returned 404 and no peer had the item.
    #[error("not found: {0}")]
    NotFound(String),

    /// The response failed schema validation.
    #[error("invalid upstream response: {0}")]
    Invalid(String),

    /// Injected by the failure simulator to exercise retry paths.
    #[error("simulated request failure")]
    Simulated,
}
