//! Bounded retry wrapper for externally-fallible calls.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Retry budget: up to `max_retries` additional attempts after the first, with
/// linear backoff `base_delay * attempt` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

pub enum RetryDisposition {
    Retry,
    Abort,
}

/// Invokes `operation` until it succeeds, the classifier aborts, or the retry
/// budget is exhausted; the final error is re-raised. `on_retry` fires before
/// each backoff sleep so callers can log consistently.
pub async fn run_with_retries<T, F, Fut, C, L>(
    policy: RetryPolicy,
    cancellation: Option<&CancellationToken>,
    mut operation: F,
    mut classify: C,
    mut on_retry: L,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    C: FnMut(&anyhow::Error) -> RetryDisposition,
    L: FnMut(usize, Duration, &anyhow::Error),
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let Some(token) = cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("retry cancelled"));
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify(&err) {
                RetryDisposition::Abort => return Err(err),
                RetryDisposition::Retry => {
                    if attempt > policy.max_retries {
                        return Err(err);
                    }

                    let backoff = policy.base_delay.saturating_mul(attempt as u32);
                    on_retry(attempt, backoff, &err);
                    sleep_with_cancellation(backoff, cancellation).await?;
                }
            },
        }
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("retry cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}
