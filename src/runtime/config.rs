use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;
const DEFAULT_MAX_BATCH_SIZE: usize = 32;
const DEFAULT_SUBMISSION_SCALE: u64 = 10_000;
const DEFAULT_LEASE_TTL_SECS: i64 = 180;
const DEFAULT_LEASE_RENEW_GRACE_SECS: i64 = 30;
const DEFAULT_LEASE_RETRY_SECS: u64 = 5;
const DEFAULT_PROCESSED_RETENTION_SECS: i64 = 86_400;
const DEFAULT_BACKLOG_THRESHOLD_SECS: u64 = 300;
const DEFAULT_FINALIZE_INTERVAL_SECS: i64 = 3_600;
const DEFAULT_RETRY_MAX_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Runtime configuration for the indexer daemon.
///
/// All instances must be constructed via [`IndexerConfig::builder`] so
/// invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    instance_id: String,
    state_db_path: PathBuf,
    poll_interval: Duration,
    max_batch_size: usize,
    submission_scale: u64,
    lease_ttl_secs: i64,
    lease_renew_grace_secs: i64,
    lease_retry_interval: Duration,
    processed_retention_secs: i64,
    backlog_threshold: Duration,
    finalize_interval_secs: i64,
    retry_max_attempts: usize,
    retry_base_delay: Duration,
    metrics_interval: Duration,
    cutover_token: Option<String>,
}

impl IndexerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> IndexerConfigBuilder {
        IndexerConfigBuilder::default()
    }

    /// Stable identity this instance claims the lease under.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Path of the SQLite file holding cursor, dedup set, and lease.
    pub fn state_db_path(&self) -> &PathBuf {
        &self.state_db_path
    }

    /// Delay between processing iterations.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Maximum number of unseen transactions handled per iteration.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Multiplier applied to estimated amounts before the u32 clamp.
    pub fn submission_scale(&self) -> u64 {
        self.submission_scale
    }

    /// Lease lifetime granted by each successful claim.
    pub fn lease_ttl_secs(&self) -> i64 {
        self.lease_ttl_secs
    }

    /// How long before expiry the holder renews. Renewing strictly before
    /// expiry avoids a window where two instances both believe they hold the
    /// lease, so the grace must cover at least one full poll interval.
    pub fn lease_renew_grace_secs(&self) -> i64 {
        self.lease_renew_grace_secs
    }

    /// Sleep between claim attempts while another instance holds the lease.
    pub fn lease_retry_interval(&self) -> Duration {
        self.lease_retry_interval
    }

    /// Age beyond which processed-tx dedup entries are pruned.
    pub fn processed_retention_secs(&self) -> i64 {
        self.processed_retention_secs
    }

    /// Idle time after which the backlog watchdog alerts.
    pub fn backlog_threshold(&self) -> Duration {
        self.backlog_threshold
    }

    /// Interval between periodic finalize maintenance calls.
    pub fn finalize_interval_secs(&self) -> i64 {
        self.finalize_interval_secs
    }

    /// Additional attempts granted to fetch/submit calls after the first.
    pub fn retry_max_attempts(&self) -> usize {
        self.retry_max_attempts
    }

    /// Base delay of the linear retry backoff.
    pub fn retry_base_delay(&self) -> Duration {
        self.retry_base_delay
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Shared secret authorizing administrative cutover; unset disables it.
    pub fn cutover_token(&self) -> Option<&str> {
        self.cutover_token.as_deref()
    }

    pub fn retry_policy(&self) -> crate::indexer::retry::RetryPolicy {
        crate::indexer::retry::RetryPolicy {
            max_retries: self.retry_max_attempts,
            base_delay: self.retry_base_delay,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.instance_id.is_empty() {
            bail!("instance_id cannot be empty");
        }

        if self.poll_interval.is_zero() {
            bail!("poll_interval must be greater than 0");
        }

        if self.max_batch_size == 0 {
            bail!("max_batch_size must be greater than 0");
        }

        if self.submission_scale == 0 {
            bail!("submission_scale must be greater than 0");
        }

        if self.lease_ttl_secs <= 0 {
            bail!("lease_ttl_secs must be greater than 0");
        }

        if self.lease_renew_grace_secs <= 0 {
            bail!("lease_renew_grace_secs must be greater than 0");
        }

        if self.lease_renew_grace_secs >= self.lease_ttl_secs {
            bail!(
                "lease_renew_grace_secs ({}) must be smaller than lease_ttl_secs ({})",
                self.lease_renew_grace_secs,
                self.lease_ttl_secs,
            );
        }

        if (self.lease_renew_grace_secs as u64) < self.poll_interval.as_secs() {
            bail!(
                "lease_renew_grace_secs ({}) must cover at least one poll_interval ({}s), \
                 otherwise the lease can expire between iterations",
                self.lease_renew_grace_secs,
                self.poll_interval.as_secs(),
            );
        }

        if self.lease_retry_interval.is_zero() {
            bail!("lease_retry_interval must be greater than 0");
        }

        if self.processed_retention_secs <= 0 {
            bail!("processed_retention_secs must be greater than 0");
        }

        if self.backlog_threshold.is_zero() {
            bail!("backlog_threshold must be greater than 0");
        }

        if self.finalize_interval_secs <= 0 {
            bail!("finalize_interval_secs must be greater than 0");
        }

        if self.retry_base_delay.is_zero() {
            bail!("retry_base_delay must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct IndexerConfigBuilder {
    instance_id: Option<String>,
    state_db_path: Option<PathBuf>,
    poll_interval: Option<Duration>,
    max_batch_size: Option<usize>,
    submission_scale: Option<u64>,
    lease_ttl_secs: Option<i64>,
    lease_renew_grace_secs: Option<i64>,
    lease_retry_interval: Option<Duration>,
    processed_retention_secs: Option<i64>,
    backlog_threshold: Option<Duration>,
    finalize_interval_secs: Option<i64>,
    retry_max_attempts: Option<usize>,
    retry_base_delay: Option<Duration>,
    metrics_interval: Option<Duration>,
    cutover_token: Option<String>,
}

impl IndexerConfigBuilder {
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn state_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_db_path = Some(path.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn submission_scale(mut self, scale: u64) -> Self {
        self.submission_scale = Some(scale);
        self
    }

    pub fn lease_ttl_secs(mut self, ttl: i64) -> Self {
        self.lease_ttl_secs = Some(ttl);
        self
    }

    pub fn lease_renew_grace_secs(mut self, grace: i64) -> Self {
        self.lease_renew_grace_secs = Some(grace);
        self
    }

    pub fn lease_retry_interval(mut self, interval: Duration) -> Self {
        self.lease_retry_interval = Some(interval);
        self
    }

    pub fn processed_retention_secs(mut self, retention: i64) -> Self {
        self.processed_retention_secs = Some(retention);
        self
    }

    pub fn backlog_threshold(mut self, threshold: Duration) -> Self {
        self.backlog_threshold = Some(threshold);
        self
    }

    pub fn finalize_interval_secs(mut self, interval: i64) -> Self {
        self.finalize_interval_secs = Some(interval);
        self
    }

    pub fn retry_max_attempts(mut self, attempts: usize) -> Self {
        self.retry_max_attempts = Some(attempts);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn cutover_token(mut self, token: impl Into<String>) -> Self {
        self.cutover_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<IndexerConfig> {
        let config = IndexerConfig {
            instance_id: self
                .instance_id
                .unwrap_or_else(|| format!("indexer-{}", uuid::Uuid::new_v4())),
            state_db_path: self.state_db_path.context("state_db_path is required")?,
            poll_interval: self
                .poll_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)),
            max_batch_size: self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE),
            submission_scale: self.submission_scale.unwrap_or(DEFAULT_SUBMISSION_SCALE),
            lease_ttl_secs: self.lease_ttl_secs.unwrap_or(DEFAULT_LEASE_TTL_SECS),
            lease_renew_grace_secs: self
                .lease_renew_grace_secs
                .unwrap_or(DEFAULT_LEASE_RENEW_GRACE_SECS),
            lease_retry_interval: self
                .lease_retry_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_LEASE_RETRY_SECS)),
            processed_retention_secs: self
                .processed_retention_secs
                .unwrap_or(DEFAULT_PROCESSED_RETENTION_SECS),
            backlog_threshold: self
                .backlog_threshold
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BACKLOG_THRESHOLD_SECS)),
            finalize_interval_secs: self
                .finalize_interval_secs
                .unwrap_or(DEFAULT_FINALIZE_INTERVAL_SECS),
            retry_max_attempts: self
                .retry_max_attempts
                .unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
            retry_base_delay: self
                .retry_base_delay
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            cutover_token: self.cutover_token,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> IndexerConfigBuilder {
        IndexerConfig::builder().state_db_path("/tmp/zkoracle-test/state.db")
    }

    #[test]
    fn builder_produces_valid_config_with_defaults() {
        let config = base_builder().build().unwrap();

        assert!(config.instance_id().starts_with("indexer-"));
        assert_eq!(
            config.poll_interval(),
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        );
        assert_eq!(config.max_batch_size(), DEFAULT_MAX_BATCH_SIZE);
        assert_eq!(config.submission_scale(), DEFAULT_SUBMISSION_SCALE);
        assert_eq!(config.lease_ttl_secs(), DEFAULT_LEASE_TTL_SECS);
        assert_eq!(
            config.lease_renew_grace_secs(),
            DEFAULT_LEASE_RENEW_GRACE_SECS
        );
        assert_eq!(
            config.processed_retention_secs(),
            DEFAULT_PROCESSED_RETENTION_SECS
        );
        assert_eq!(
            config.metrics_interval(),
            telemetry::DEFAULT_METRICS_INTERVAL
        );
        assert_eq!(config.cutover_token(), None);
    }

    #[test]
    fn generated_instance_ids_are_unique() {
        let first = base_builder().build().unwrap();
        let second = base_builder().build().unwrap();
        assert_ne!(first.instance_id(), second.instance_id());
    }

    #[test]
    fn state_db_path_is_required() {
        let err = IndexerConfig::builder().build().unwrap_err();
        assert!(
            format!("{err}").contains("state_db_path"),
            "error should mention missing state_db_path"
        );
    }

    #[test]
    fn grace_must_be_smaller_than_ttl() {
        let err = base_builder()
            .lease_ttl_secs(60)
            .lease_renew_grace_secs(60)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("lease_renew_grace_secs"));
    }

    #[test]
    fn grace_must_cover_a_poll_interval() {
        let err = base_builder()
            .poll_interval(Duration::from_secs(45))
            .lease_renew_grace_secs(30)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("poll_interval"));
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = base_builder().instance_id("").build().unwrap_err();
        assert!(format!("{err}").contains("instance_id"));

        let err = base_builder()
            .poll_interval(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("poll_interval"));

        let err = base_builder().max_batch_size(0).build().unwrap_err();
        assert!(format!("{err}").contains("max_batch_size"));

        let err = base_builder().submission_scale(0).build().unwrap_err();
        assert!(format!("{err}").contains("submission_scale"));

        let err = base_builder().lease_ttl_secs(0).build().unwrap_err();
        assert!(format!("{err}").contains("lease_ttl_secs"));

        let err = base_builder()
            .lease_retry_interval(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("lease_retry_interval"));

        let err = base_builder()
            .processed_retention_secs(0)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("processed_retention_secs"));

        let err = base_builder()
            .backlog_threshold(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("backlog_threshold"));

        let err = base_builder().finalize_interval_secs(0).build().unwrap_err();
        assert!(format!("{err}").contains("finalize_interval_secs"));

        let err = base_builder()
            .retry_base_delay(Duration::from_millis(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("retry_base_delay"));

        let err = base_builder()
            .metrics_interval(Duration::from_secs(0))
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("metrics_interval"));
    }

    #[test]
    fn zero_retries_is_allowed() {
        let config = base_builder().retry_max_attempts(0).build().unwrap();
        assert_eq!(config.retry_policy().max_retries, 0);
    }
}
