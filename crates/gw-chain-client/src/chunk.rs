//! Chunk decoding and identity validation.
//!
//! A chunk response carries the payload and a merkle path whose final node
//! is `[data_hash (32) | offset note (32)]`. The gateway does not re-verify
//! the full path against the data root, but it does check that the payload
//! hashes to the leaf's data hash, which catches truncated or substituted
//! chunk bytes from any source.

use crate::wire::ChunkResponse;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use shared_types::ChainError;

/// Maximum size of a single chunk payload.
pub const MAX_CHUNK_SIZE: usize = 256 * 1024;

/// Size of the merkle leaf node at the tail of a data path.
const LEAF_NODE_SIZE: usize = 64;

/// Decode and validate a chunk response, returning the payload bytes.
pub fn validate_chunk(response: &ChunkResponse) -> Result<Vec<u8>, ChainError> {
    let chunk = URL_SAFE_NO_PAD
        .decode(&response.chunk)
        .map_err(|e| ChainError::Invalid(format!("chunk is not base64url: {e}")))?;

    if chunk.is_empty() {
        return Err(ChainError::Invalid("empty chunk".into()));
    }
    if chunk.len() > MAX_CHUNK_SIZE {
        return Err(ChainError::Invalid(format!(
            "chunk of {} bytes exceeds the {MAX_CHUNK_SIZE}-byte maximum",
            chunk.len()
        )));
    }

    let data_path = URL_SAFE_NO_PAD
        .decode(&response.data_path)
        .map_err(|e| ChainError::Invalid(format!("data path is not base64url: {e}")))?;

    if data_path.len() < LEAF_NODE_SIZE {
        return Err(ChainError::Invalid(format!(
            "data path of {} bytes is shorter than a leaf node",
            data_path.len()
        )));
    }

    let leaf_start = data_path.len() - LEAF_NODE_SIZE;
    let advertised_hash = &data_path[leaf_start..leaf_start + 32];
    let actual_hash = Sha256::digest(&chunk);

    if advertised_hash != actual_hash.as_slice() {
        return Err(ChainError::Invalid("chunk hash mismatch".into()));
    }

    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_for(payload: &[u8]) -> ChunkResponse {
        let mut data_path = vec![0u8; 32]; // parent nodes, irrelevant here
        data_path.extend_from_slice(&Sha256::digest(payload));
        data_path.extend_from_slice(&[7u8; 32]); // offset note

        ChunkResponse {
            chunk: URL_SAFE_NO_PAD.encode(payload),
            data_path: URL_SAFE_NO_PAD.encode(&data_path),
            tx_path: String::new(),
        }
    }

    #[test]
    fn valid_chunk_round_trips() {
        let payload = b"hello chunk".to_vec();
        let decoded = validate_chunk(&response_for(&payload)).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn rejects_hash_mismatch() {
        let mut response = response_for(b"original");
        response.chunk = URL_SAFE_NO_PAD.encode(b"tampered");
        assert!(matches!(
            validate_chunk(&response),
            Err(ChainError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_bad_encoding() {
        let mut response = response_for(b"data");
        response.chunk = "!not-base64!".into();
        assert!(matches!(
            validate_chunk(&response),
            Err(ChainError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_short_data_path() {
        let payload = b"data";
        let response = ChunkResponse {
            chunk: URL_SAFE_NO_PAD.encode(payload),
            data_path: URL_SAFE_NO_PAD.encode([1u8; 16]),
            tx_path: String::new(),
        };
        assert!(matches!(
            validate_chunk(&response),
            Err(ChainError::Invalid(_))
        ));
    }
}
