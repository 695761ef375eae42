//! Cursor and dedup checkpoint persistence.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

/// Durable low-water-mark cursor plus the processed-tx set.
///
/// The cursor is only ever advanced by the processing loop after a successful
/// submission; the store itself does not reject a decrease, so callers must
/// keep advancement monotonic. The processed set outlives cursor advancement:
/// entries are pruned strictly by age, never because the cursor passed them,
/// so re-delivered transactions stay deduplicated for the whole retention
/// window.
#[derive(Clone)]
pub struct CheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl CheckpointStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Current low-water mark in unix seconds.
    pub fn cursor(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT cursor FROM cursor_state WHERE id = 1", [], |row| {
            row.get(0)
        })
        .context("reading cursor")
    }

    /// Persists a new cursor value.
    pub fn set_cursor(&self, cursor: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE cursor_state SET cursor = ?1 WHERE id = 1",
            params![cursor],
        )
        .context("persisting cursor")?;
        Ok(())
    }

    pub fn has_processed(&self, txid: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_txs WHERE txid = ?1",
                params![txid],
                |row| row.get(0),
            )
            .optional()
            .context("querying processed tx")?;
        Ok(found.is_some())
    }

    /// Records a transaction as fully submitted. Re-marking an already-known
    /// txid is a no-op, not an error.
    pub fn mark_processed(&self, txid: &str, seen_at: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO processed_txs (txid, seen_at) VALUES (?1, ?2)",
            params![txid, seen_at],
        )
        .context("marking tx processed")?;
        Ok(())
    }

    /// Deletes entries with `seen_at < now - retention_secs` and returns how
    /// many were removed.
    pub fn purge_processed_older_than(&self, retention_secs: i64, now: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn
            .execute(
                "DELETE FROM processed_txs WHERE seen_at < ?1",
                params![now - retention_secs],
            )
            .context("pruning processed txs")?;
        Ok(removed)
    }

    pub fn processed_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM processed_txs", [], |row| row.get(0))
            .context("counting processed txs")?;
        Ok(count as u64)
    }
}
