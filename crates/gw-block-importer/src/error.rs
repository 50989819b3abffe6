//! Importer errors.

use shared_types::ChainError;
use thiserror::Error;

/// Error from a chain index (database) operation, stringly typed so the
/// importer stays independent of the concrete store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("chain index error: {0}")]
pub struct IndexError(pub String);

/// Errors from the import state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImportError {
    /// The fork walk descended [`crate::MAX_FORK_DEPTH`] heights without
    /// finding a common ancestor. Fatal: the importer aborts.
    #[error("maximum fork depth exceeded repairing towards height {height}")]
    MaximumForkDepthExceeded {
        /// The height whose import triggered the walk.
        height: u64,
    },

    /// The chain source failed; transient unless it says otherwise.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The chain index failed.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// `stop()` was requested; the current iteration settled and returned.
    #[error("importer stopped")]
    Stopped,
}

impl ImportError {
    /// Whether the importer should back off and retry the same height.
    ///
    /// Every chain or index failure is retried: a block not yet visible
    /// at the tip comes back as `NotFound`, and a malformed response may
    /// be an upstream blip. Only a fork-depth overflow (and an explicit
    /// stop) is terminal.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Chain(_) | Self::Index(_) => true,
            Self::MaximumForkDepthExceeded { .. } | Self::Stopped => false,
        }
    }
}
