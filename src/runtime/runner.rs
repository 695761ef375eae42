use crate::indexer::cycle::Indexer;
use crate::runtime::telemetry::spawn_metrics_reporter;
use crate::source::{Estimator, OracleSink, TxSource};
use anyhow::Result;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the indexer lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner<S, E, K>
where
    S: TxSource,
    E: Estimator,
    K: OracleSink,
{
    indexer: Indexer<S, E, K>,
    shutdown: CancellationToken,
    metrics_interval: Duration,
}

impl<S, E, K> Runner<S, E, K>
where
    S: TxSource,
    E: Estimator,
    K: OracleSink,
{
    /// Wraps an indexer whose cancellation token becomes the root shutdown
    /// token for the whole process (loop, lease release, metrics reporter).
    pub fn new(indexer: Indexer<S, E, K>, metrics_interval: Duration) -> Self {
        let shutdown = indexer.cancellation_token();
        Self {
            indexer,
            shutdown,
            metrics_interval,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs until a Ctrl-C (SIGINT) is received or the shutdown token is
    /// cancelled elsewhere, then waits for the loop to release the lease and
    /// the reporter task to drain.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        let reporter = spawn_metrics_reporter(
            self.indexer.telemetry(),
            self.indexer.health(),
            self.shutdown.clone(),
            self.metrics_interval,
        );

        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");
        let shutdown = self.shutdown.clone();
        let result = {
            let mut run = std::pin::pin!(self.indexer.run());
            tokio::select! {
                result = &mut run => result,
                _ = signal::ctrl_c() => {
                    tracing::info!("Ctrl-C received; shutting down runner");
                    shutdown.cancel();
                    run.await
                }
            }
        };

        self.shutdown.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }

        result
    }
}
