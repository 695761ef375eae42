use crate::indexer::health::HealthMonitor;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    items_submitted: AtomicU64,
    iterations: AtomicU64,
    source_errors: AtomicU64,
    submit_errors: AtomicU64,
    lease_held: AtomicBool,
}

impl Telemetry {
    pub fn record_submitted(&self) {
        self.items_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_iteration(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submit_error(&self) {
        self.submit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_lease_held(&self, held: bool) {
        self.lease_held.store(held, Ordering::Relaxed);
    }

    pub fn items_submitted(&self) -> u64 {
        self.items_submitted.load(Ordering::Relaxed)
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// 0/1 gauge for "lease currently held by this instance".
    pub fn lease_held(&self) -> bool {
        self.lease_held.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            items_submitted: self.items_submitted.load(Ordering::Relaxed),
            iterations: self.iterations.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            submit_errors: self.submit_errors.load(Ordering::Relaxed),
            lease_held: self.lease_held.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub items_submitted: u64,
    pub iterations: u64,
    pub source_errors: u64,
    pub submit_errors: u64,
    pub lease_held: bool,
}

/// Spawns a background task that periodically logs submission throughput,
/// cursor position, and lease state.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    health: HealthMonitor,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "zkoracle::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let submitted_delta = current
                        .items_submitted
                        .saturating_sub(last_snapshot.items_submitted);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        submitted_delta as f64 / elapsed
                    };
                    let status = health.snapshot();

                    tracing::info!(
                        target: "zkoracle::metrics",
                        throughput = format!("{throughput:.2}"),
                        submitted = current.items_submitted,
                        iterations = current.iterations,
                        cursor = status.cursor,
                        lease_held = u8::from(current.lease_held),
                        source_errors = current.source_errors,
                        submit_errors = current.submit_errors,
                        backlog_secs = status.backlog_secs,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
