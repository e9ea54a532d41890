//! Queue-side job types: identifiers, states, options and snapshots.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier accepted by lookups: `^[A-Za-z0-9_-]+$`.
///
/// Freshly generated identifiers are ULIDs, but historical producers used
/// other encodings (UUIDs, numeric queue ids), so parsing only checks the
/// character set. Callers must treat the contents as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new unique job ID.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    /// Parse a caller-supplied job ID.
    pub fn parse(s: &str) -> Result<Self, InvalidJobId> {
        if is_valid_job_id(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(InvalidJobId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rejected job identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0:?}")]
pub struct InvalidJobId(pub String);

/// Check a string against the job identifier grammar.
pub fn is_valid_job_id(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// State of a job inside the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted, not yet picked up by a worker.
    Waiting,
    /// Claimed by a worker.
    Active,
    /// Processed successfully.
    Completed,
    /// Exhausted its attempts.
    Failed,
    /// Waiting out a backoff delay before becoming `Waiting` again.
    Delayed,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Delayed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    /// Completed and failed jobs never change state again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "delayed" => Ok(JobState::Delayed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// Which terminal state a `clean` call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    Completed,
    Failed,
}

impl CleanTarget {
    pub fn state(self) -> JobState {
        match self {
            CleanTarget::Completed => JobState::Completed,
            CleanTarget::Failed => JobState::Failed,
        }
    }
}

/// Delay policy between processing attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Backoff {
    /// `delay_ms * 2^(attempt - 1)`.
    Exponential { delay_ms: u64 },
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
}

impl Backoff {
    /// Delay in milliseconds before the retry that follows `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        match *self {
            Backoff::Exponential { delay_ms } => {
                let exp = attempt.saturating_sub(1).min(32);
                delay_ms.saturating_mul(1u64 << exp)
            }
            Backoff::Fixed { delay_ms } => delay_ms,
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential { delay_ms: 1000 }
    }
}

/// Options attached to a job at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Queue identifier to use instead of a backend-assigned one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Total processing attempts before the job is marked failed.
    pub attempts: u32,
    /// Delay between processing attempts.
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl JobOptions {
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Snapshot of a job as held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    /// Queue-assigned identifier.
    pub id: String,
    /// Job kind the job was submitted under.
    pub name: String,
    /// The originally submitted payload.
    pub data: serde_json::Value,
    pub options: JobOptions,
    pub state: JobState,
    /// Enqueue time, epoch millis.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_on: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
    #[serde(default)]
    pub attempts_made: u32,
    /// When a delayed job becomes eligible again, epoch millis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_until: Option<i64>,
}

impl QueuedJob {
    /// Create a new waiting job stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            data,
            options,
            state: JobState::Waiting,
            timestamp: now_millis(),
            processed_on: None,
            finished_on: None,
            failed_reason: None,
            attempts_made: 0,
            delay_until: None,
        }
    }

    /// Enqueue time as a UTC datetime.
    pub fn enqueued_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.timestamp)
    }
}

/// Current wall-clock time in epoch millis.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch millis to a UTC datetime, clamping out-of-range values to the epoch.
pub fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::Exponential { delay_ms: 1000 };
        assert_eq!(backoff.delay_ms(1), 1000);
        assert_eq!(backoff.delay_ms(2), 2000);
        assert_eq!(backoff.delay_ms(3), 4000);
        assert_eq!(Backoff::Fixed { delay_ms: 50 }.delay_ms(7), 50);
    }

    #[test]
    fn exponential_backoff_saturates() {
        let backoff = Backoff::Exponential { delay_ms: u64::MAX / 2 };
        assert_eq!(backoff.delay_ms(40), u64::MAX);
    }

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let a = JobId::generate();
        let b = JobId::generate();
        assert_ne!(a, b);
        assert!(JobId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn job_state_parses_case_insensitively() {
        assert_eq!("Completed".parse::<JobState>(), Ok(JobState::Completed));
        assert!("paused".parse::<JobState>().is_err());
    }

    #[test]
    fn rejects_ids_outside_grammar() {
        for bad in ["", "a b", "job:1", "../etc", "id*", "é"] {
            assert!(JobId::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(JobId::parse("job_12345-AbC").is_ok());
    }

    proptest! {
        #[test]
        fn accepts_every_id_in_grammar(s in "[A-Za-z0-9_-]{1,64}") {
            prop_assert!(JobId::parse(&s).is_ok());
        }

        #[test]
        fn rejects_ids_with_foreign_characters(
            prefix in "[A-Za-z0-9_-]{0,8}",
            bad in "[^A-Za-z0-9_-]",
            suffix in "[A-Za-z0-9_-]{0,8}",
        ) {
            let candidate = format!("{prefix}{bad}{suffix}");
            prop_assert!(JobId::parse(&candidate).is_err());
        }
    }
}
