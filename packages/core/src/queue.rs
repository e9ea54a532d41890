//! The job queue contract the event store runs against.

use std::future::Future;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{CleanTarget, JobOptions, JobState, QueuedJob};
use crate::record::EventRecord;

/// Errors reported by a queue backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Transient infrastructure failure; callers may retry.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    #[error("job already exists: {0}")]
    Conflict(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("queue backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl QueueError {
    /// Only transient failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Unavailable(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

/// A durable, shared, at-least-once work queue.
///
/// Implementations provide their own atomicity; callers add no locking.
pub trait JobQueue: Send + Sync + 'static {
    /// Submit a job in the waiting state and return its queue identifier.
    fn add(
        &self,
        name: &str,
        data: serde_json::Value,
        options: JobOptions,
    ) -> impl Future<Output = Result<String, QueueError>> + Send;

    /// Fetch a job by its queue identifier.
    fn get_job(&self, id: &str) -> impl Future<Output = Result<Option<QueuedJob>, QueueError>> + Send;

    /// Jobs in any of `states`, newest first by enqueue time.
    ///
    /// `range` slices that ordering; `None` returns everything.
    fn get_jobs(
        &self,
        states: &[JobState],
        range: Option<Range<usize>>,
    ) -> impl Future<Output = Result<Vec<QueuedJob>, QueueError>> + Send;

    /// Number of jobs currently in `state`.
    fn count(&self, state: JobState) -> impl Future<Output = Result<u64, QueueError>> + Send;

    /// Remove jobs in the target state that finished more than `grace_ms` ago.
    /// Returns the removed identifiers.
    fn clean(
        &self,
        grace_ms: u64,
        target: CleanTarget,
    ) -> impl Future<Output = Result<Vec<String>, QueueError>> + Send;
}

/// Consumer-side transitions used by processing workers.
pub trait JobLifecycle: JobQueue {
    /// Claim the oldest waiting job of kind `name`: move it to active,
    /// stamp `processed_on` and count the attempt.
    fn take_next(&self, name: &str) -> impl Future<Output = Result<Option<QueuedJob>, QueueError>> + Send;

    /// Mark an active job completed.
    fn complete(&self, id: &str) -> impl Future<Output = Result<(), QueueError>> + Send;

    /// Record a processing failure. Jobs with attempts left move to delayed
    /// according to their backoff, the rest to failed. Returns the new state.
    fn fail(&self, id: &str, reason: &str) -> impl Future<Output = Result<JobState, QueueError>> + Send;

    /// Move due delayed jobs back to waiting. Returns how many moved.
    fn promote_delayed(&self) -> impl Future<Output = Result<u64, QueueError>> + Send;

    /// Release active jobs claimed more than `stall_ms` ago. Jobs with attempts
    /// left go back to waiting, the rest to failed with [`STALLED_REASON`].
    /// Returns how many moved.
    fn recover_stalled(&self, stall_ms: u64) -> impl Future<Output = Result<u64, QueueError>> + Send;
}

/// Failure reason recorded on jobs that stalled with no attempts left.
pub const STALLED_REASON: &str = "job stalled more than allowable limit";

/// Durable destination for processed events ("append rows to storage").
pub trait EventSink: Send + Sync + 'static {
    fn append(&self, record: &EventRecord) -> impl Future<Output = Result<(), String>> + Send;
}

/// Aggregate backlog counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
    /// Sum across all five states.
    pub total: u64,
}

impl QueueStats {
    /// Build stats from per-state counts, computing the total.
    pub fn from_counts(waiting: u64, active: u64, completed: u64, failed: u64, delayed: u64) -> Self {
        Self {
            waiting,
            active,
            completed,
            failed,
            delayed,
            total: waiting + active + completed + failed + delayed,
        }
    }

    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Waiting => self.waiting,
            JobState::Active => self.active,
            JobState::Completed => self.completed,
            JobState::Failed => self.failed,
            JobState::Delayed => self.delayed,
        }
    }

    /// Jobs not yet finished (waiting + active + delayed).
    pub fn pending(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }

    /// Success rate over terminal jobs as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let processed = self.completed + self.failed;
        if processed == 0 {
            None
        } else {
            Some((self.completed as f64 / processed as f64) * 100.0)
        }
    }
}

/// Optional predicates for paginated listings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageFilter {
    pub account_id: Option<String>,
    pub user_id: Option<String>,
    pub event_type: Option<String>,
    /// Restrict to one state; also disables newest-first merging across states.
    pub status: Option<JobState>,
    /// Inclusive lower bound on enqueue time.
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on enqueue time.
    pub end_date: Option<DateTime<Utc>>,
}

impl PageFilter {
    pub fn for_account(account_id: impl Into<String>) -> Self {
        Self {
            account_id: Some(account_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobState) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }
}

/// One page of the backlog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResult {
    pub items: Vec<QueuedJob>,
    /// Aggregate backlog size, not the filtered count.
    pub total: u64,
    pub page: usize,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_total_sums_every_state() {
        let stats = QueueStats::from_counts(1, 2, 3, 4, 5);
        assert_eq!(stats.total, 15);
        assert_eq!(stats.pending(), 8);
        assert_eq!(stats.get(JobState::Failed), 4);
    }

    #[test]
    fn success_rate_ignores_pending_jobs() {
        assert_eq!(QueueStats::from_counts(9, 0, 0, 0, 0).success_rate(), None);
        let stats = QueueStats::from_counts(0, 0, 3, 1, 0);
        assert_eq!(stats.success_rate(), Some(75.0));
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(QueueError::Unavailable("down".into()).is_transient());
        assert!(!QueueError::Conflict("J".into()).is_transient());
        assert!(!QueueError::Backend("boom".into()).is_transient());
    }
}
