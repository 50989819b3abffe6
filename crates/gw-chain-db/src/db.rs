//! The SQLite-backed chain store.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use shared_types::{Block, BlockId, Transaction, TxId};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::debug;

const SCHEMA: &str = include_str!("schema.sql");

/// Errors from chain database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The database file's directory could not be created.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counts exposed on the debug endpoint and asserted by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    /// Committed blocks.
    pub new_blocks: u64,
    /// Committed transactions.
    pub new_txs: u64,
    /// Journal entries still missing.
    pub missing_txs: u64,
    /// Largest committed height, `-1` when empty.
    pub max_height: i64,
}

/// The transactional store of canonical chain metadata.
pub struct ChainDb {
    conn: Mutex<Connection>,
}

impl ChainDb {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// An in-memory database, for tests.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a block, its fetched transactions, and one journal entry per
    /// missing tx id, atomically. Idempotent on the block id.
    pub fn save_block_and_txs(
        &self,
        block: &Block,
        txs: &[Transaction],
        missing_tx_ids: &[TxId],
    ) -> Result<(), DbError> {
        let tx_ids = serde_json::to_string(&block.txs)
            .map_err(|e| DbError::Corrupt(format!("tx id list: {e}")))?;

        let mut conn = self.conn.lock();
        let dbtx = conn.transaction()?;

        dbtx.execute(
            "INSERT OR IGNORE INTO new_blocks
                 (id, height, previous_block, nonce, timestamp, txs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                block.indep_hash.as_str(),
                block.height,
                block.previous_block.as_str(),
                block.nonce,
                block.timestamp,
                tx_ids,
            ],
        )?;

        for tx in txs {
            Self::insert_tx(&dbtx, tx, Some(block.height))?;
        }

        for id in missing_tx_ids {
            dbtx.execute(
                "INSERT OR IGNORE INTO missing_transactions
                     (tx_id, first_seen_height, attempts, last_attempt_at)
                 SELECT ?1, ?2, 0, 0
                 WHERE NOT EXISTS (SELECT 1 FROM new_transactions WHERE id = ?1)",
                params![id.as_str(), block.height],
            )?;
        }

        dbtx.commit()?;
        debug!(
            height = block.height,
            txs = txs.len(),
            missing = missing_tx_ids.len(),
            "block committed"
        );
        Ok(())
    }

    /// Insert a transaction fetched asynchronously; its journal entry (if
    /// any) is deleted in the same transaction.
    ///
    /// The journal entry records the height of the block that referenced
    /// the tx; the row is stored under that height so a later
    /// [`reset_to_height`](Self::reset_to_height) discards it with its
    /// block.
    pub fn save_tx(&self, tx: &Transaction) -> Result<(), DbError> {
        let mut conn = self.conn.lock();
        let dbtx = conn.transaction()?;
        let height: Option<u64> = dbtx
            .query_row(
                "SELECT first_seen_height FROM missing_transactions WHERE tx_id = ?1",
                params![tx.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Self::insert_tx(&dbtx, tx, height)?;
        dbtx.commit()?;
        Ok(())
    }

    fn insert_tx(
        dbtx: &rusqlite::Transaction<'_>,
        tx: &Transaction,
        height: Option<u64>,
    ) -> Result<(), DbError> {
        let tags = serde_json::to_string(&tx.tags)
            .map_err(|e| DbError::Corrupt(format!("tags: {e}")))?;
        dbtx.execute(
            "INSERT OR IGNORE INTO new_transactions
                 (id, owner, target, quantity, reward, tags,
                  data_size, data_root, signature, height)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                tx.id.as_str(),
                tx.owner,
                tx.target,
                tx.quantity,
                tx.reward,
                tags,
                tx.data_size,
                tx.data_root,
                tx.signature,
                height,
            ],
        )?;
        // A tx observed before any block claimed it has no height yet;
        // adopt it into the claiming block.
        if let Some(height) = height {
            dbtx.execute(
                "UPDATE new_transactions SET height = ?2 WHERE id = ?1 AND height IS NULL",
                params![tx.id.as_str(), height],
            )?;
        }
        // The tx may have been journalled by an earlier block import.
        dbtx.execute(
            "DELETE FROM missing_transactions WHERE tx_id = ?1",
            params![tx.id.as_str()],
        )?;
        Ok(())
    }

    /// Largest committed block height, `-1` when the store is empty.
    pub fn get_max_height(&self) -> Result<i64, DbError> {
        let conn = self.conn.lock();
        let height: i64 =
            conn.query_row("SELECT COALESCE(MAX(height), -1) FROM new_blocks", [], |row| {
                row.get(0)
            })?;
        Ok(height)
    }

    /// Id of the committed block at `height`, if any.
    pub fn get_new_block_hash_by_height(&self, height: u64) -> Result<Option<BlockId>, DbError> {
        let conn = self.conn.lock();
        let id: Option<String> = conn
            .query_row(
                "SELECT id FROM new_blocks WHERE height = ?1",
                params![height],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(Some(
                BlockId::new(id).map_err(|e| DbError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Journal entries ordered by `(last_attempt_at, first_seen_height)`.
    pub fn get_missing_tx_ids(&self, limit: usize) -> Result<Vec<TxId>, DbError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tx_id FROM missing_transactions
             ORDER BY last_attempt_at ASC, first_seen_height ASC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            let id = row?;
            ids.push(TxId::new(id).map_err(|e| DbError::Corrupt(e.to_string()))?);
        }
        Ok(ids)
    }

    /// Bump a journal entry's attempt counter and timestamp.
    pub fn mark_missing_tx_attempt(&self, id: &TxId) -> Result<(), DbError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE missing_transactions
             SET attempts = attempts + 1, last_attempt_at = ?2
             WHERE tx_id = ?1",
            params![id.as_str(), unix_now()],
        )?;
        Ok(())
    }

    /// Delete every block above `height` together with its transactions;
    /// journal entries first seen at or below `height` are preserved.
    pub fn reset_to_height(&self, height: u64) -> Result<(), DbError> {
        let mut conn = self.conn.lock();
        let dbtx = conn.transaction()?;
        dbtx.execute(
            "DELETE FROM new_transactions WHERE height IS NOT NULL AND height > ?1",
            params![height],
        )?;
        dbtx.execute("DELETE FROM new_blocks WHERE height > ?1", params![height])?;
        dbtx.execute(
            "DELETE FROM missing_transactions WHERE first_seen_height > ?1",
            params![height],
        )?;
        dbtx.commit()?;
        debug!(height, "chain state reset");
        Ok(())
    }

    /// Row counts and the max height, for diagnostics and tests.
    pub fn get_debug_info(&self) -> Result<DebugInfo, DbError> {
        let conn = self.conn.lock();
        let count = |table: &str| -> Result<u64, DbError> {
            let n: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(n as u64)
        };
        let new_blocks = count("new_blocks")?;
        let new_txs = count("new_transactions")?;
        let missing_txs = count("missing_transactions")?;
        let max_height: i64 =
            conn.query_row("SELECT COALESCE(MAX(height), -1) FROM new_blocks", [], |row| {
                row.get(0)
            })?;
        Ok(DebugInfo {
            new_blocks,
            new_txs,
            missing_txs,
            max_height,
        })
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
