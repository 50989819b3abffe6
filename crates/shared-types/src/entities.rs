//! # Chain Entities
//!
//! The block and transaction shapes the gateway persists and serves. These
//! mirror the upstream node's JSON representation: balance-like quantities
//! stay opaque strings, numeric sizes tolerate both string and number
//! encodings.

use crate::ids::{BlockId, TxId};
use serde::{Deserialize, Deserializer, Serialize};

/// A block as reported by the upstream node.
///
/// Proof-of-work fields are carried opaquely; the gateway only interprets
/// `indep_hash`, `height`, `previous_block` and the tx list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block's id (independent hash).
    pub indep_hash: BlockId,
    /// Height in the chain. Monotone along a chain, re-usable across forks.
    pub height: u64,
    /// Id of the parent block.
    pub previous_block: BlockId,
    /// Proof nonce, opaque.
    pub nonce: String,
    /// Unix timestamp of the block.
    pub timestamp: u64,
    /// Ordered ids of the transactions this block claims.
    #[serde(default)]
    pub txs: Vec<TxId>,
}

/// A name/value tag attached to a transaction (base64url byte strings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name, base64url encoded.
    pub name: String,
    /// Tag value, base64url encoded.
    pub value: String,
}

/// A transaction as reported by the upstream node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction id.
    pub id: TxId,
    /// Owner public key, opaque.
    pub owner: String,
    /// Transfer target, empty for pure data transactions.
    #[serde(default)]
    pub target: String,
    /// Transfer quantity in base units, opaque decimal string.
    #[serde(default)]
    pub quantity: String,
    /// Mining reward in base units, opaque decimal string.
    #[serde(default)]
    pub reward: String,
    /// Ordered tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Size of the transaction's payload in bytes.
    #[serde(deserialize_with = "string_or_u64", default)]
    pub data_size: u64,
    /// Merkle root of the payload chunks.
    #[serde(default)]
    pub data_root: String,
    /// Owner signature, opaque.
    #[serde(default)]
    pub signature: String,
}

/// A block together with the transactions that could be fetched
/// synchronously and the ids of those that could not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockWithTxs {
    /// The block itself.
    pub block: Block,
    /// Transactions fetched within the per-block deadline.
    pub txs: Vec<Transaction>,
    /// Ids whose synchronous fetch timed out, errored or failed validation.
    pub missing_tx_ids: Vec<TxId>,
}

/// Absolute location of a transaction's payload on the chain: the global
/// byte offset of its last byte and its total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOffset {
    /// Global offset of the payload's final byte.
    #[serde(deserialize_with = "string_or_u64")]
    pub offset: u64,
    /// Payload size in bytes.
    #[serde(deserialize_with = "string_or_u64")]
    pub size: u64,
}

impl TxOffset {
    /// Global offset of the payload's first byte.
    #[must_use]
    pub fn start_offset(&self) -> u64 {
        self.offset.saturating_sub(self.size) + 1
    }
}

/// Upstream nodes encode large integers as JSON strings; accept both.
fn string_or_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: u8) -> String {
        let mut s = String::new();
        for i in 0..crate::ID_LENGTH {
            let c = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdef"[((seed as usize) + i) % 32];
            s.push(c as char);
        }
        s
    }

    #[test]
    fn block_parses_from_upstream_json() {
        let json = format!(
            r#"{{
                "indep_hash": "{}",
                "height": 982575,
                "previous_block": "{}",
                "nonce": "n1",
                "timestamp": 1577836800,
                "txs": ["{}"]
            }}"#,
            id(1),
            id(2),
            id(3)
        );
        let block: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(block.height, 982_575);
        assert_eq!(block.txs.len(), 1);
    }

    #[test]
    fn tx_data_size_accepts_string_encoding() {
        let json = format!(
            r#"{{"id": "{}", "owner": "o", "data_size": "683", "data_root": "r"}}"#,
            id(4)
        );
        let tx: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(tx.data_size, 683);
    }

    #[test]
    fn tx_offset_start() {
        let off = TxOffset {
            offset: 1099,
            size: 100,
        };
        assert_eq!(off.start_offset(), 1000);
    }
}
