//! Operator-facing operations: CLI-equivalent state inspection and the
//! authenticated forced lease cutover.

use crate::runtime::alerts::AlertSink;
use crate::store::checkpoint::CheckpointStore;
use crate::store::db::StateDb;
use crate::store::lease::{Lease, LeaseStatus, LeaseStore};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Read/repair operations over the durable state, usable while (or without)
/// a daemon running against the same database file.
pub struct Admin {
    checkpoint: CheckpointStore,
    lease: LeaseStore,
}

/// Combined status report for operators deciding whether a takeover is safe.
#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub cursor: i64,
    pub processed_count: u64,
    pub lease: Lease,
    pub safe_to_takeover: bool,
}

impl Admin {
    pub fn new(db: &StateDb) -> Self {
        Self {
            checkpoint: db.checkpoint(),
            lease: db.lease(),
        }
    }

    pub fn cursor(&self) -> Result<i64> {
        self.checkpoint.cursor()
    }

    pub fn processed_count(&self) -> Result<u64> {
        self.checkpoint.processed_count()
    }

    /// Resets the cursor to the supplied time. Use with caution: moving it
    /// backwards re-fetches history and leans on the dedup set alone.
    pub fn reset_cursor(&self, now: i64) -> Result<()> {
        self.checkpoint.set_cursor(now)
    }

    pub fn lease_state(&self) -> Result<Lease> {
        self.lease.state()
    }

    /// Releases the lease iff `instance_id` currently holds it.
    pub fn force_release(&self, instance_id: &str, now: i64) -> Result<bool> {
        self.lease.release(instance_id, now)
    }

    /// Forcefully transfers the lease to `new_instance_id`, bypassing the
    /// holder-only release rule.
    pub fn takeover(&self, new_instance_id: &str, ttl_secs: i64, now: i64) -> Result<bool> {
        self.lease.force_release(now)?;
        self.lease.claim(new_instance_id, ttl_secs, now)
    }

    pub fn doctor(&self, now: i64) -> Result<DoctorReport> {
        let lease = self.lease.state()?;
        let safe_to_takeover = lease.status(now) != LeaseStatus::Held;
        Ok(DoctorReport {
            cursor: self.checkpoint.cursor()?,
            processed_count: self.checkpoint.processed_count()?,
            lease,
            safe_to_takeover,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CutoverRequest {
    pub token: String,
    pub instance_id: Option<String>,
    pub requested_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CutoverStatus {
    Ok,
    Blocked,
    Forbidden,
    Disabled,
}

#[derive(Debug, Clone, Serialize)]
pub struct CutoverResponse {
    pub status: CutoverStatus,
    pub holder: Option<String>,
    pub expires_at: Option<i64>,
}

/// Authenticated forced lease transfer, intended for planned maintenance.
/// Every effective invocation (transfer or race loss) emits an audit alert
/// carrying the previous and new holder.
pub struct CutoverHandler {
    lease: LeaseStore,
    token: Option<String>,
    default_instance_id: String,
    ttl_secs: i64,
    alerts: Arc<dyn AlertSink>,
}

impl CutoverHandler {
    pub fn new(
        db: &StateDb,
        token: Option<String>,
        default_instance_id: impl Into<String>,
        ttl_secs: i64,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            lease: db.lease(),
            token,
            default_instance_id: default_instance_id.into(),
            ttl_secs,
            alerts,
        }
    }

    pub fn handle(&self, request: &CutoverRequest, now: i64) -> Result<CutoverResponse> {
        let Some(expected) = self.token.as_deref() else {
            let lease = self.lease.state()?;
            return Ok(Self::response(CutoverStatus::Disabled, &lease));
        };

        if request.token != expected {
            tracing::warn!(
                requested_by = request.requested_by.as_deref(),
                "cutover rejected: bad token"
            );
            let lease = self.lease.state()?;
            return Ok(Self::response(CutoverStatus::Forbidden, &lease));
        }

        let target = request
            .instance_id
            .as_deref()
            .unwrap_or(&self.default_instance_id);
        let previous_holder = self.lease.force_release(now)?;
        let claimed = self.lease.claim(target, self.ttl_secs, now)?;
        let lease = self.lease.state()?;

        let status = if claimed {
            CutoverStatus::Ok
        } else {
            CutoverStatus::Blocked
        };

        self.alerts.alert(
            "administrative lease cutover invoked",
            json!({
                "status": status,
                "previous_holder": previous_holder,
                "new_holder": lease.holder,
                "expires_at": lease.expires_at,
                "requested_by": request.requested_by,
            }),
        );

        Ok(Self::response(status, &lease))
    }

    fn response(status: CutoverStatus, lease: &Lease) -> CutoverResponse {
        CutoverResponse {
            status,
            holder: lease.holder.clone(),
            expires_at: lease.expires_at,
        }
    }
}
