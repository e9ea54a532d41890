//! Processing runtime configuration.

use std::time::Duration;

use event_store::{ConfigError, DEFAULT_GRACE_MS};

/// How the supervisor runs workers and maintenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Number of worker actors.
    pub concurrency: usize,
    /// Delay between polls of an idle worker.
    pub poll_interval: Duration,
    /// Period of the maintenance tick (delayed-job promotion and purge).
    pub maintenance_interval: Duration,
    /// Age a terminal job must reach before the maintenance tick purges it.
    pub retention_grace_ms: u64,
    /// How long a job may stay active before maintenance releases it.
    pub stall_timeout_ms: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(250),
            maintenance_interval: Duration::from_secs(30),
            retention_grace_ms: DEFAULT_GRACE_MS,
            stall_timeout_ms: 30_000,
        }
    }
}

impl ProcessorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    pub fn with_retention_grace_ms(mut self, grace_ms: u64) -> Self {
        self.retention_grace_ms = grace_ms;
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build a config from environment variables, falling back to defaults.
    ///
    /// `EVENTLOG_WORKERS`, `EVENTLOG_POLL_MS`, `EVENTLOG_MAINTENANCE_SECS`,
    /// `EVENTLOG_RETENTION_HOURS`, `EVENTLOG_STALL_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(workers) = parse_var::<usize>("EVENTLOG_WORKERS")? {
            config = config.with_concurrency(workers);
        }
        if let Some(ms) = parse_var::<u64>("EVENTLOG_POLL_MS")? {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = parse_var::<u64>("EVENTLOG_MAINTENANCE_SECS")? {
            config.maintenance_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(hours) = parse_var::<u64>("EVENTLOG_RETENTION_HOURS")? {
            config.retention_grace_ms = hours.saturating_mul(60 * 60 * 1000);
        }
        if let Some(secs) = parse_var::<u64>("EVENTLOG_STALL_SECS")? {
            config.stall_timeout_ms = secs.max(1).saturating_mul(1000);
        }
        Ok(config)
    }
}

fn parse_var<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
