use crate::store::checkpoint::CheckpointStore;
use crate::store::lease::LeaseStore;
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cursor_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    cursor INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS processed_txs (
    txid TEXT PRIMARY KEY,
    seen_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS processed_txs_seen_at ON processed_txs (seen_at);
CREATE TABLE IF NOT EXISTS lease_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT,
    expires_at INTEGER,
    updated_at INTEGER
);
INSERT OR IGNORE INTO lease_state (id, holder, expires_at, updated_at)
    VALUES (1, NULL, NULL, NULL);
";

/// Durable state shared by every candidate instance: one cursor row, the
/// processed-tx dedup set, and the single lease row. All facades hand
/// statements to the same serialized connection, so in-process accesses are
/// ordered and cross-process claims rely on SQLite transactions.
#[derive(Clone)]
pub struct StateDb {
    conn: Arc<Mutex<Connection>>,
}

impl StateDb {
    /// Opens (creating if needed) the state database and applies the schema.
    ///
    /// The cursor is initialized to "now" the first time the file is created,
    /// matching the daemon's start-from-present semantics.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening state db {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL journal mode")?;
        conn.execute_batch(SCHEMA).context("applying state schema")?;
        conn.execute(
            "INSERT OR IGNORE INTO cursor_state (id, cursor) VALUES (1, ?1)",
            params![unix_now()],
        )
        .context("initializing cursor")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn checkpoint(&self) -> CheckpointStore {
        CheckpointStore::new(self.conn.clone())
    }

    pub fn lease(&self) -> LeaseStore {
        LeaseStore::new(self.conn.clone())
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
