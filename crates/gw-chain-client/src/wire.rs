//! Wire shapes of the upstream HTTP protocol that are not domain entities.

use serde::Deserialize;

/// Response of `GET /info`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    /// Current tip height.
    pub height: u64,
}

/// Response of `GET /chunk/{offset}`: the chunk bytes plus its merkle
/// proofs, all base64url encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkResponse {
    /// The chunk payload.
    pub chunk: String,
    /// Merkle path from the data root to this chunk.
    pub data_path: String,
    /// Merkle path from the block's tx root to the transaction.
    #[serde(default)]
    pub tx_path: String,
}
