//! Backlog health and retention.

use chrono::Utc;
use eventlog_core::{CleanTarget, EventLogResult, JobQueue, JobState, QueueEvent, QueueStats};
use futures_util::future::try_join5;

use crate::config::DEFAULT_GRACE_MS;
use crate::store::{EventStore, queue_failure};

impl<Q: JobQueue> EventStore<Q> {
    /// Per-state backlog counts.
    pub async fn stats(&self) -> EventLogResult<QueueStats> {
        let queue = self.queue.as_ref();
        let (waiting, active, completed, failed, delayed) = try_join5(
            queue.count(JobState::Waiting),
            queue.count(JobState::Active),
            queue.count(JobState::Completed),
            queue.count(JobState::Failed),
            queue.count(JobState::Delayed),
        )
        .await
        .map_err(|e| queue_failure("stats", None, e))?;

        Ok(QueueStats::from_counts(waiting, active, completed, failed, delayed))
    }

    /// Remove completed and failed jobs that finished more than `grace_ms`
    /// ago (24 hours when `None`). Returns how many were removed.
    pub async fn purge(&self, grace_ms: Option<u64>) -> EventLogResult<u64> {
        let grace_ms = grace_ms.unwrap_or(DEFAULT_GRACE_MS);

        let completed = self
            .queue
            .clean(grace_ms, CleanTarget::Completed)
            .await
            .map_err(|e| queue_failure("purge", None, e))?;
        let failed = self
            .queue
            .clean(grace_ms, CleanTarget::Failed)
            .await
            .map_err(|e| queue_failure("purge", None, e))?;

        let removed = (completed.len() + failed.len()) as u64;
        tracing::info!(
            grace_ms,
            completed = completed.len(),
            failed = failed.len(),
            "Purged terminal jobs"
        );
        if removed > 0 {
            self.notify(QueueEvent::BacklogPurged {
                removed,
                timestamp: Utc::now(),
            });
        }
        Ok(removed)
    }
}
