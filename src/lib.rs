pub mod indexer;
pub mod runtime;
pub mod source;
pub mod store;

pub use indexer::coordinator::LeaseCoordinator;
pub use indexer::cycle::Indexer;
pub use indexer::health::{HealthMonitor, HealthSnapshot};
pub use indexer::retry::{run_with_retries, RetryDisposition, RetryPolicy};
pub use indexer::watchdog::{BacklogAlert, BacklogWatchdog};
pub use runtime::admin::{
    Admin, CutoverHandler, CutoverRequest, CutoverResponse, CutoverStatus, DoctorReport,
};
pub use runtime::alerts::{AlertSink, LogAlerts};
pub use runtime::config::{IndexerConfig, IndexerConfigBuilder};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use source::{
    scale_amount, Estimate, Estimator, FetchFuture, OracleSink, Pool, ShieldedTx, SubmitFuture,
    Submission, TxSource,
};
pub use store::checkpoint::CheckpointStore;
pub use store::db::{unix_now, StateDb};
pub use store::lease::{Lease, LeaseStatus, LeaseStore};
