//! Per-iteration orchestration of lease, fetch, dedup, submit, checkpoint,
//! watchdog, and maintenance.

use crate::indexer::coordinator::LeaseCoordinator;
use crate::indexer::health::HealthMonitor;
use crate::indexer::retry::{run_with_retries, RetryDisposition};
use crate::indexer::watchdog::BacklogWatchdog;
use crate::runtime::alerts::AlertSink;
use crate::runtime::config::IndexerConfig;
use crate::runtime::telemetry::Telemetry;
use crate::source::{scale_amount, Estimator, OracleSink, Submission, TxSource};
use crate::store::checkpoint::CheckpointStore;
use crate::store::db::{unix_now, StateDb};
use crate::store::lease::LeaseStore;
use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Single-writer polling loop. Iterations run strictly sequentially; the
/// lease coordinator blocks the whole loop whenever this instance is not
/// authoritative.
pub struct Indexer<S, E, K>
where
    S: TxSource,
    E: Estimator,
    K: OracleSink,
{
    config: IndexerConfig,
    checkpoint: CheckpointStore,
    lease: LeaseStore,
    coordinator: LeaseCoordinator,
    watchdog: BacklogWatchdog,
    source: S,
    estimator: E,
    sink: K,
    alerts: Arc<dyn AlertSink>,
    telemetry: Arc<Telemetry>,
    health: HealthMonitor,
    shutdown: CancellationToken,
    last_finalize_at: Option<i64>,
}

impl<S, E, K> Indexer<S, E, K>
where
    S: TxSource,
    E: Estimator,
    K: OracleSink,
{
    pub fn new(
        config: IndexerConfig,
        db: &StateDb,
        source: S,
        estimator: E,
        sink: K,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self::with_cancellation_token(
            config,
            db,
            source,
            estimator,
            sink,
            alerts,
            CancellationToken::new(),
        )
    }

    pub fn with_cancellation_token(
        config: IndexerConfig,
        db: &StateDb,
        source: S,
        estimator: E,
        sink: K,
        alerts: Arc<dyn AlertSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let telemetry = Arc::new(Telemetry::default());
        let health = HealthMonitor::new(config.instance_id());
        let coordinator = LeaseCoordinator::new(
            db.lease(),
            config.instance_id(),
            config.lease_ttl_secs(),
            config.lease_renew_grace_secs(),
            config.lease_retry_interval(),
            alerts.clone(),
            telemetry.clone(),
            health.clone(),
        );
        let watchdog = BacklogWatchdog::new(config.backlog_threshold(), unix_now());

        Self {
            config,
            checkpoint: db.checkpoint(),
            lease: db.lease(),
            coordinator,
            watchdog,
            source,
            estimator,
            sink,
            alerts,
            telemetry,
            health,
            shutdown,
            last_finalize_at: None,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn health(&self) -> HealthMonitor {
        self.health.clone()
    }

    /// Runs iterations until the shutdown token fires, then releases the
    /// lease best-effort. Iteration failures are surfaced and the loop keeps
    /// going; only shutdown ends it.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            instance_id = %self.config.instance_id(),
            poll_interval_secs = self.config.poll_interval().as_secs(),
            "indexer loop starting"
        );

        while !self.shutdown.is_cancelled() {
            match self.coordinator.wait_until_authoritative(&self.shutdown).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    self.surface_iteration_error("lease coordination failed", &err);
                    self.sleep_poll_interval().await;
                    continue;
                }
            }

            self.telemetry.record_iteration();
            match self.run_iteration().await {
                Ok(()) => self.health.update(|health| health.last_error = None),
                Err(err) => self.surface_iteration_error("indexer iteration failed", &err),
            }

            self.refresh_health();
            self.sleep_poll_interval().await;
        }

        if let Err(err) = self.coordinator.release_if_held() {
            tracing::warn!(error = %err, "best-effort lease release failed during shutdown");
        }
        self.refresh_health();
        tracing::info!("indexer loop stopped");
        Ok(())
    }

    /// One full processing cycle. The watchdog evaluation and the periodic
    /// sink maintenance run whether or not the batch succeeded; a sustained
    /// source outage is exactly the kind of idle episode the backlog alert
    /// exists for.
    async fn run_iteration(&mut self) -> Result<()> {
        let outcome = self.process_batch().await;

        let now = unix_now();
        if let Some(alert) = self.watchdog.evaluate(now) {
            self.alerts.alert(
                "no successful oracle submission within backlog threshold",
                json!({
                    "instance_id": self.config.instance_id(),
                    "idle_secs": alert.idle_secs,
                    "threshold_secs": alert.threshold_secs,
                }),
            );
        }

        self.maybe_finalize(now).await;

        outcome
    }

    /// Fetch, dedup, submit, checkpoint. Store failures abort with an error;
    /// an exhausted submission aborts the remainder of the batch but leaves
    /// everything processed so far checkpointed.
    async fn process_batch(&mut self) -> Result<()> {
        let cursor = self.checkpoint.cursor()?;
        let policy = self.config.retry_policy();

        let fetched = {
            let source = &self.source;
            let telemetry = &self.telemetry;
            run_with_retries(
                policy,
                Some(&self.shutdown),
                |_| source.fetch_since(cursor),
                |_| RetryDisposition::Retry,
                |attempt, backoff, err| {
                    telemetry.record_source_error();
                    tracing::warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "fetch_since failed; retrying"
                    );
                },
            )
            .await
            .context("fetching candidate transactions")?
        };

        let mut batch = Vec::new();
        for tx in fetched {
            if batch.len() >= self.config.max_batch_size() {
                break;
            }
            if !self.checkpoint.has_processed(&tx.txid)? {
                batch.push(tx);
            }
        }

        let mut max_seen = cursor;
        let mut submitted = 0usize;
        let mut batch_error = None;

        for tx in batch {
            let estimate = self.estimator.estimate(&tx);
            let submission = Submission {
                source_txid: tx.txid.clone(),
                scaled_amount: scale_amount(estimate.value, self.config.submission_scale()),
                confidence: estimate.confidence,
            };

            let outcome = {
                let sink = &self.sink;
                let telemetry = &self.telemetry;
                run_with_retries(
                    policy,
                    Some(&self.shutdown),
                    |_| sink.submit(submission.clone()),
                    |err| {
                        if sink.is_permanent_failure(err) {
                            RetryDisposition::Abort
                        } else {
                            RetryDisposition::Retry
                        }
                    },
                    |attempt, backoff, err| {
                        telemetry.record_submit_error();
                        tracing::warn!(
                            attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            txid = %submission.source_txid,
                            error = %err,
                            "submission failed; retrying"
                        );
                    },
                )
                .await
            };

            match outcome {
                Ok(()) => {
                    let seen_at = unix_now();
                    self.checkpoint.mark_processed(&tx.txid, seen_at)?;
                    max_seen = max_seen.max(tx.block_time);
                    submitted += 1;
                    self.telemetry.record_submitted();
                    self.watchdog.record_success(seen_at);
                    tracing::debug!(
                        txid = %tx.txid,
                        block_time = tx.block_time,
                        scaled_amount = submission.scaled_amount,
                        "submission confirmed"
                    );
                }
                Err(err) => {
                    // Do not advance the cursor past the failing item; it and
                    // everything after it stay unprocessed for the next
                    // iteration.
                    batch_error =
                        Some(err.context(format!("submitting estimate for {}", tx.txid)));
                    break;
                }
            }
        }

        if submitted > 0 {
            self.checkpoint.set_cursor(max_seen)?;
            let purged = self
                .checkpoint
                .purge_processed_older_than(self.config.processed_retention_secs(), unix_now())?;
            if purged > 0 {
                tracing::debug!(purged, "pruned expired dedup entries");
            }
        }

        match batch_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Periodic maintenance against the sink, independent of batch content.
    /// Failures with a known benign signature stay quiet; anything else
    /// alerts.
    async fn maybe_finalize(&mut self, now: i64) {
        let due = self
            .last_finalize_at
            .map_or(true, |last| now - last >= self.config.finalize_interval_secs());
        if !due {
            return;
        }
        self.last_finalize_at = Some(now);

        match self.sink.finalize_period().await {
            Ok(()) => {
                tracing::info!("oracle period finalized");
            }
            Err(err) if self.sink.is_benign_finalize(&err) => {
                tracing::debug!(error = %err, "finalize had nothing to do");
            }
            Err(err) => {
                self.alerts.alert(
                    "oracle period finalize failed",
                    json!({
                        "instance_id": self.config.instance_id(),
                        "error": format!("{err:#}"),
                    }),
                );
            }
        }
    }

    fn surface_iteration_error(&self, message: &str, err: &anyhow::Error) {
        tracing::error!(error = %format!("{err:#}"), "{message}");
        self.alerts.alert(
            message,
            json!({
                "instance_id": self.config.instance_id(),
                "error": format!("{err:#}"),
            }),
        );
        let rendered = format!("{err:#}");
        self.health
            .update(|health| health.last_error = Some(rendered));
    }

    fn refresh_health(&self) {
        let now = unix_now();
        let cursor = self.checkpoint.cursor().unwrap_or_default();
        // Read the lease row itself so the snapshot names the real holder
        // even when that holder is another instance.
        let lease = self.lease.state().unwrap_or_default();
        let lease_held = lease.held_by(self.config.instance_id(), now);
        let backlog_secs = self.watchdog.backlog_secs(now);
        let backlog_alert_active = self.watchdog.alert_active();

        self.health.update(|health| {
            health.cursor = cursor;
            health.lease_holder = lease.holder;
            health.lease_expires_at = lease.expires_at;
            health.lease_held = lease_held;
            health.last_iteration_at = Some(now);
            health.backlog_secs = backlog_secs;
            health.backlog_alert_active = backlog_alert_active;
        });
    }

    async fn sleep_poll_interval(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = sleep(self.config.poll_interval()) => {}
        }
    }
}
