//! Collaborator seams for the indexer loop.
//!
//! The concrete lightwalletd/zcashd fetchers, the statistical estimator, and
//! the encrypting oracle submitter all live outside this crate; the loop only
//! sees these traits.

use anyhow::{Error as AnyError, Result};
use core::future::Future;
use core::pin::Pin;
use serde::Serialize;

pub type FetchFuture = Pin<Box<dyn Future<Output = Result<Vec<ShieldedTx>>> + Send + 'static>>;
pub type SubmitFuture = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Sapling,
    Orchard,
}

/// Metadata for one shielded transaction observed at the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldedTx {
    pub txid: String,
    /// Block time in unix seconds; doubles as the cursor dimension.
    pub block_time: i64,
    pub pool: Pool,
}

/// Output of the opaque estimation heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub value: u64,
    pub confidence: f64,
}

/// Scaled, clamped payload handed to the oracle sink for one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub source_txid: String,
    pub scaled_amount: u32,
    pub confidence: f64,
}

/// Scales an estimated amount and clamps it into the u32 range the downstream
/// contract accepts.
pub fn scale_amount(value: u64, scale: u64) -> u32 {
    value.saturating_mul(scale).min(u32::MAX as u64) as u32
}

/// Upstream transaction feed. `fetch_since` returns every candidate whose
/// block time is at or past the cursor; re-delivery of already-processed
/// transactions is expected and handled by the dedup set.
pub trait TxSource: Send + Sync + 'static {
    fn fetch_since(&self, cursor: i64) -> FetchFuture;
}

/// Pure amount estimator. May keep rolling history internally, hence `&mut`.
pub trait Estimator: Send + 'static {
    fn estimate(&mut self, tx: &ShieldedTx) -> Estimate;
}

/// Downstream oracle submission and maintenance seam.
pub trait OracleSink: Send + Sync + 'static {
    fn submit(&self, submission: Submission) -> SubmitFuture;

    /// Periodic maintenance call (e.g. closing out the current oracle
    /// period); scheduled independently of whether any batch had items.
    fn finalize_period(&self) -> SubmitFuture;

    /// Errors with a known permanent signature are not retried.
    fn is_permanent_failure(&self, _err: &AnyError) -> bool {
        false
    }

    /// Finalize failures with a known "nothing to do" signature are expected
    /// and must not alert.
    fn is_benign_finalize(&self, _err: &AnyError) -> bool {
        false
    }
}
