use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing_subscriber::EnvFilter;
use zkoracle::{
    AlertSink, Estimate, Estimator, FetchFuture, IndexerConfig, IndexerConfigBuilder, OracleSink,
    Pool, ShieldedTx, SubmitFuture, Submission, TxSource,
};

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn tx(txid: &str, block_time: i64) -> ShieldedTx {
    ShieldedTx {
        txid: txid.to_string(),
        block_time,
        pool: Pool::Sapling,
    }
}

/// Builder tuned for fast test loops: short polls, one retry, tiny backoff.
pub fn test_config_builder(state_db_path: &std::path::Path) -> IndexerConfigBuilder {
    IndexerConfig::builder()
        .instance_id("test-indexer")
        .state_db_path(state_db_path)
        .poll_interval(Duration::from_millis(10))
        .lease_ttl_secs(60)
        .lease_renew_grace_secs(5)
        .lease_retry_interval(Duration::from_millis(10))
        .retry_max_attempts(1)
        .retry_base_delay(Duration::from_millis(1))
}

pub fn test_config(state_db_path: &std::path::Path) -> IndexerConfig {
    test_config_builder(state_db_path)
        .build()
        .expect("test config should validate")
}

pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// In-memory transaction feed; returns every entry at or past the cursor, or
/// errors while an outage is simulated.
#[derive(Clone, Default)]
pub struct MockSource {
    txs: Arc<Mutex<Vec<ShieldedTx>>>,
    failing: Arc<AtomicBool>,
}

impl MockSource {
    pub fn new(txs: Vec<ShieldedTx>) -> Self {
        Self {
            txs: Arc::new(Mutex::new(txs)),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&self, tx: ShieldedTx) {
        self.txs.lock().unwrap().push(tx);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl TxSource for MockSource {
    fn fetch_since(&self, cursor: i64) -> FetchFuture {
        if self.failing.load(Ordering::SeqCst) {
            return Box::pin(async { Err(anyhow!("source unreachable")) });
        }
        let matching: Vec<ShieldedTx> = self
            .txs
            .lock()
            .unwrap()
            .iter()
            .filter(|tx| tx.block_time >= cursor)
            .cloned()
            .collect();
        Box::pin(async move { Ok(matching) })
    }
}

pub enum FinalizeBehavior {
    Succeed,
    BenignError,
    UnexpectedError,
}

/// Records submissions and simulates transient/permanent failures per txid.
pub struct MockSink {
    pub submitted: Mutex<Vec<Submission>>,
    pub submit_calls: AtomicUsize,
    pub finalize_calls: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    permanent: Mutex<HashSet<String>>,
    finalize_behavior: Mutex<FinalizeBehavior>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submitted: Mutex::new(Vec::new()),
            submit_calls: AtomicUsize::new(0),
            finalize_calls: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            permanent: Mutex::new(HashSet::new()),
            finalize_behavior: Mutex::new(FinalizeBehavior::Succeed),
        })
    }

    pub fn fail_txid(&self, txid: &str) {
        self.failing.lock().unwrap().insert(txid.to_string());
    }

    pub fn clear_failure(&self, txid: &str) {
        self.failing.lock().unwrap().remove(txid);
    }

    pub fn fail_txid_permanently(&self, txid: &str) {
        self.failing.lock().unwrap().insert(txid.to_string());
        self.permanent.lock().unwrap().insert(txid.to_string());
    }

    pub fn set_finalize_behavior(&self, behavior: FinalizeBehavior) {
        *self.finalize_behavior.lock().unwrap() = behavior;
    }

    pub fn submitted_txids(&self) -> Vec<String> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|submission| submission.source_txid.clone())
            .collect()
    }
}

/// Cloneable handle handed to the indexer; tests keep the inner `Arc` so they
/// can assert on the shared sink state while the loop runs.
#[derive(Clone)]
pub struct SinkHandle(pub Arc<MockSink>);

impl OracleSink for SinkHandle {
    fn submit(&self, submission: Submission) -> SubmitFuture {
        self.0.submit_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .0
            .failing
            .lock()
            .unwrap()
            .contains(&submission.source_txid);
        let permanent = self
            .0
            .permanent
            .lock()
            .unwrap()
            .contains(&submission.source_txid);
        let sink = self.0.clone();
        Box::pin(async move {
            if failing {
                if permanent {
                    return Err(anyhow!("rejected: {}", submission.source_txid));
                }
                return Err(anyhow!("connection reset: {}", submission.source_txid));
            }
            sink.submitted.lock().unwrap().push(submission);
            Ok(())
        })
    }

    fn finalize_period(&self) -> SubmitFuture {
        self.0.finalize_calls.fetch_add(1, Ordering::SeqCst);
        let outcome: Result<()> = match *self.0.finalize_behavior.lock().unwrap() {
            FinalizeBehavior::Succeed => Ok(()),
            FinalizeBehavior::BenignError => Err(anyhow!("period not yet elapsed")),
            FinalizeBehavior::UnexpectedError => Err(anyhow!("contract reverted")),
        };
        Box::pin(async move { outcome })
    }

    fn is_permanent_failure(&self, err: &anyhow::Error) -> bool {
        format!("{err}").starts_with("rejected:")
    }

    fn is_benign_finalize(&self, err: &anyhow::Error) -> bool {
        format!("{err}").contains("not yet elapsed")
    }
}

/// Estimator returning a fixed value so scaled submissions are predictable.
pub struct FixedEstimator {
    pub value: u64,
}

impl Estimator for FixedEstimator {
    fn estimate(&mut self, _tx: &ShieldedTx) -> Estimate {
        Estimate {
            value: self.value,
            confidence: 0.9,
        }
    }
}

/// Captures alerts so tests can assert on edge-triggered behavior.
pub struct RecordingAlerts {
    pub entries: Mutex<Vec<(String, Value)>>,
}

impl RecordingAlerts {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(message, _)| message.clone())
            .collect()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages()
            .iter()
            .filter(|message| message.contains(needle))
            .count()
    }
}

impl AlertSink for RecordingAlerts {
    fn alert(&self, message: &str, details: Value) {
        self.entries
            .lock()
            .unwrap()
            .push((message.to_string(), details));
    }
}
