//! Persisted single-row lease with compare-and-swap claim semantics.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Snapshot of the lease row. An empty row (`holder == None`) means the lease
/// has never been claimed or was explicitly released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Lease {
    pub holder: Option<String>,
    pub expires_at: Option<i64>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Unclaimed,
    Held,
    /// Logically still recorded for a holder but `expires_at <= now`; treated
    /// as unclaimed for claiming purposes.
    Expired,
}

impl Lease {
    pub fn status(&self, now: i64) -> LeaseStatus {
        match (&self.holder, self.expires_at) {
            (Some(_), Some(expires_at)) if expires_at > now => LeaseStatus::Held,
            (Some(_), _) => LeaseStatus::Expired,
            (None, _) => LeaseStatus::Unclaimed,
        }
    }

    pub fn held_by(&self, instance_id: &str, now: i64) -> bool {
        self.status(now) == LeaseStatus::Held && self.holder.as_deref() == Some(instance_id)
    }
}

/// Access to the lease row. Claim and release read-modify-write inside
/// immediate transactions so two instances racing on the same file cannot both
/// observe an unclaimed row and both win.
#[derive(Clone)]
pub struct LeaseStore {
    conn: Arc<Mutex<Connection>>,
}

impl LeaseStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Attempts to claim (or renew) the lease for `instance_id` until
    /// `now + ttl_secs`. Succeeds iff the row is unclaimed, expired, or
    /// already held by the same instance; otherwise the row is left untouched.
    pub fn claim(&self, instance_id: &str, ttl_secs: i64, now: i64) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("opening lease claim transaction")?;

        let lease = read_row(&tx)?;
        let claimable = match lease.status(now) {
            LeaseStatus::Unclaimed | LeaseStatus::Expired => true,
            LeaseStatus::Held => lease.holder.as_deref() == Some(instance_id),
        };

        if claimable {
            tx.execute(
                "UPDATE lease_state SET holder = ?1, expires_at = ?2, updated_at = ?3 WHERE id = 1",
                params![instance_id, now + ttl_secs, now],
            )
            .context("writing lease claim")?;
        }

        tx.commit().context("committing lease claim")?;
        Ok(claimable)
    }

    /// Clears the lease iff `instance_id` is the recorded holder. Releasing a
    /// lease held by someone else (or nobody) returns `false` and changes
    /// nothing, so a stale instance cannot drop a successor's lease.
    pub fn release(&self, instance_id: &str, now: i64) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("opening lease release transaction")?;

        let lease = read_row(&tx)?;
        let owned = lease.holder.as_deref() == Some(instance_id);
        if owned {
            clear_row(&tx, now)?;
        }

        tx.commit().context("committing lease release")?;
        Ok(owned)
    }

    /// Unconditionally clears the lease, returning the previous holder.
    /// Reserved for the administrative cutover path.
    pub fn force_release(&self, now: i64) -> Result<Option<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("opening forced release transaction")?;

        let lease = read_row(&tx)?;
        clear_row(&tx, now)?;

        tx.commit().context("committing forced release")?;
        Ok(lease.holder)
    }

    /// Read-only snapshot of the lease row.
    pub fn state(&self) -> Result<Lease> {
        let conn = self.conn.lock().unwrap();
        read_row(&conn)
    }
}

fn read_row(conn: &Connection) -> Result<Lease> {
    conn.query_row(
        "SELECT holder, expires_at, updated_at FROM lease_state WHERE id = 1",
        [],
        |row| {
            Ok(Lease {
                holder: row.get(0)?,
                expires_at: row.get(1)?,
                updated_at: row.get(2)?,
            })
        },
    )
    .context("reading lease row")
}

fn clear_row(conn: &Connection, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE lease_state SET holder = NULL, expires_at = NULL, updated_at = ?1 WHERE id = 1",
        params![now],
    )
    .context("clearing lease row")?;
    Ok(())
}
