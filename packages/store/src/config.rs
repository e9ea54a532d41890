//! Event store configuration.

use std::time::Duration;

use eventlog_core::{Backoff, JobOptions};

/// Job kind every analytics event is submitted under.
pub const DEFAULT_JOB_KIND: &str = "processAddClientLogPostgresDB";

/// Retention grace period used when `purge` is given none (24 hours).
pub const DEFAULT_GRACE_MS: u64 = 24 * 60 * 60 * 1000;

/// Upper bound on the page size accepted by paginated listings.
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Retry policy for submitting jobs when the queue reports a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submission attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failed attempt; doubles after each further one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Configuration for [`crate::EventStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Job kind events are submitted under; also the prefix tried by lookups.
    pub job_kind: String,
    /// Retry policy for submissions.
    pub submit_retry: RetryPolicy,
    /// Processing attempts and backoff attached to each job.
    pub job_attempts: u32,
    pub job_backoff: Backoff,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            job_kind: DEFAULT_JOB_KIND.to_string(),
            submit_retry: RetryPolicy::default(),
            job_attempts: 3,
            job_backoff: Backoff::Exponential { delay_ms: 1000 },
        }
    }
}

impl StoreConfig {
    pub fn with_job_kind(mut self, job_kind: impl Into<String>) -> Self {
        self.job_kind = job_kind.into();
        self
    }

    pub fn with_submit_retry(mut self, policy: RetryPolicy) -> Self {
        self.submit_retry = policy;
        self
    }

    pub fn with_job_retry(mut self, attempts: u32, backoff: Backoff) -> Self {
        self.job_attempts = attempts;
        self.job_backoff = backoff;
        self
    }

    /// Options attached to a new job with the given identifier.
    pub fn job_options(&self, job_id: &str) -> JobOptions {
        JobOptions::default()
            .with_job_id(job_id)
            .with_attempts(self.job_attempts)
            .with_backoff(self.job_backoff)
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// - `EVENTLOG_JOB_KIND`
    /// - `EVENTLOG_SUBMIT_ATTEMPTS`, `EVENTLOG_SUBMIT_BASE_DELAY_MS`
    /// - `EVENTLOG_JOB_ATTEMPTS`, `EVENTLOG_JOB_BACKOFF_MS` (exponential)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(kind) = env_string("EVENTLOG_JOB_KIND") {
            cfg.job_kind = kind;
        }
        if let Some(attempts) = env_parse::<u32>("EVENTLOG_SUBMIT_ATTEMPTS")? {
            cfg.submit_retry.attempts = attempts.max(1);
        }
        if let Some(ms) = env_parse::<u64>("EVENTLOG_SUBMIT_BASE_DELAY_MS")? {
            cfg.submit_retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_parse::<u32>("EVENTLOG_JOB_ATTEMPTS")? {
            cfg.job_attempts = attempts.max(1);
        }
        if let Some(ms) = env_parse::<u64>("EVENTLOG_JOB_BACKOFF_MS")? {
            cfg.job_backoff = Backoff::Exponential { delay_ms: ms };
        }

        Ok(cfg)
    }
}

fn env_string(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(var) {
        None => Ok(None),
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}
