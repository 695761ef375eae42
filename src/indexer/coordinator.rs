//! Claim/renew/contend protocol gating every processing iteration.

use crate::indexer::health::HealthMonitor;
use crate::runtime::alerts::AlertSink;
use crate::runtime::telemetry::Telemetry;
use crate::store::db::unix_now;
use crate::store::lease::LeaseStore;
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Serializes the single-writer guarantee: the processing loop calls
/// [`LeaseCoordinator::wait_until_authoritative`] at the top of every
/// iteration and makes no progress at all until it returns `true`.
pub struct LeaseCoordinator {
    lease: LeaseStore,
    instance_id: String,
    ttl_secs: i64,
    renew_grace_secs: i64,
    retry_interval: Duration,
    alerts: Arc<dyn AlertSink>,
    telemetry: Arc<Telemetry>,
    health: HealthMonitor,
    /// Local view of our own expiry; `None` while not authoritative.
    expires_at: Option<i64>,
    /// Last holder we alerted about, so contention alerts stay edge-triggered.
    contended_holder: Option<String>,
}

impl LeaseCoordinator {
    pub fn new(
        lease: LeaseStore,
        instance_id: impl Into<String>,
        ttl_secs: i64,
        renew_grace_secs: i64,
        retry_interval: Duration,
        alerts: Arc<dyn AlertSink>,
        telemetry: Arc<Telemetry>,
        health: HealthMonitor,
    ) -> Self {
        Self {
            lease,
            instance_id: instance_id.into(),
            ttl_secs,
            renew_grace_secs,
            retry_interval,
            alerts,
            telemetry,
            health,
            expires_at: None,
            contended_holder: None,
        }
    }

    /// Blocks until this instance holds a lease that is not about to expire,
    /// or until `shutdown` fires (returning `false`). Store failures
    /// propagate; lease contention does not, it is the expected standby state.
    pub async fn wait_until_authoritative(&mut self, shutdown: &CancellationToken) -> Result<bool> {
        loop {
            if shutdown.is_cancelled() {
                return Ok(false);
            }

            let now = unix_now();

            if let Some(expires_at) = self.expires_at {
                if now <= expires_at - self.renew_grace_secs {
                    return Ok(true);
                }
            }

            if self.lease.claim(&self.instance_id, self.ttl_secs, now)? {
                let first_acquisition = self.expires_at.is_none();
                self.expires_at = Some(now + self.ttl_secs);
                self.telemetry.set_lease_held(true);
                let holder = self.instance_id.clone();
                self.health.update(|health| {
                    health.lease_holder = Some(holder);
                    health.lease_expires_at = Some(now + self.ttl_secs);
                    health.lease_held = true;
                });

                if first_acquisition {
                    tracing::info!(
                        instance_id = %self.instance_id,
                        expires_at = now + self.ttl_secs,
                        previous_holder = self.contended_holder.as_deref(),
                        "lease acquired; this instance is now authoritative"
                    );
                    self.contended_holder = None;
                } else {
                    tracing::debug!(
                        instance_id = %self.instance_id,
                        expires_at = now + self.ttl_secs,
                        "lease renewed"
                    );
                }

                return Ok(true);
            }

            self.expires_at = None;
            self.telemetry.set_lease_held(false);

            let observed = self.lease.state()?;
            let (holder, expires_at) = (observed.holder.clone(), observed.expires_at);
            self.health.update(|health| {
                health.lease_holder = holder;
                health.lease_expires_at = expires_at;
                health.lease_held = false;
            });
            if observed.holder != self.contended_holder {
                self.alerts.alert(
                    "indexer lease held by another instance; standing by",
                    json!({
                        "instance_id": self.instance_id,
                        "holder": observed.holder,
                        "expires_at": observed.expires_at,
                    }),
                );
                self.contended_holder = observed.holder;
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(false),
                _ = sleep(self.retry_interval) => {}
            }
        }
    }

    /// Best-effort release during shutdown. Returns whether the row was ours
    /// to clear.
    pub fn release_if_held(&mut self) -> Result<bool> {
        if self.expires_at.take().is_none() {
            return Ok(false);
        }

        self.telemetry.set_lease_held(false);
        let released = self.lease.release(&self.instance_id, unix_now())?;
        if released {
            tracing::info!(instance_id = %self.instance_id, "lease released on shutdown");
        }
        Ok(released)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}
