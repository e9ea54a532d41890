//! Notifications emitted while events move through the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle notifications broadcast to in-process subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// An analytics event was durably queued.
    EventEnqueued {
        job_id: String,
        account_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobStarted {
        job_id: String,
        worker_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// A job was written to the sink and completed.
    JobCompleted {
        job_id: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// Processing failed.
    JobFailed {
        job_id: String,
        error: String,
        attempts: u32,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// Delayed jobs became eligible again.
    JobsPromoted { count: u64, timestamp: DateTime<Utc> },
    /// Stalled active jobs were released by maintenance.
    JobsRecovered { count: u64, timestamp: DateTime<Utc> },
    /// Retention removed terminal jobs.
    BacklogPurged { removed: u64, timestamp: DateTime<Utc> },
    /// A worker is alive.
    WorkerHeartbeat {
        worker_id: String,
        current_job: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// The job this notification concerns, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            QueueEvent::EventEnqueued { job_id, .. }
            | QueueEvent::JobStarted { job_id, .. }
            | QueueEvent::JobCompleted { job_id, .. }
            | QueueEvent::JobFailed { job_id, .. } => Some(job_id),
            QueueEvent::WorkerHeartbeat { current_job, .. } => current_job.as_deref(),
            QueueEvent::JobsPromoted { .. }
            | QueueEvent::JobsRecovered { .. }
            | QueueEvent::BacklogPurged { .. } => None,
        }
    }

    /// Short description for logging.
    pub fn description(&self) -> String {
        match self {
            QueueEvent::EventEnqueued {
                job_id, account_id, ..
            } => format!("Event {} enqueued for {}", job_id, account_id),
            QueueEvent::JobStarted {
                job_id,
                worker_id,
                attempt,
                ..
            } => format!("Job {} started by {} (attempt {})", job_id, worker_id, attempt),
            QueueEvent::JobCompleted {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            QueueEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            QueueEvent::JobsPromoted { count, .. } => format!("{} delayed job(s) promoted", count),
            QueueEvent::JobsRecovered { count, .. } => {
                format!("{} stalled job(s) recovered", count)
            }
            QueueEvent::BacklogPurged { removed, .. } => format!("{} job(s) purged", removed),
            QueueEvent::WorkerHeartbeat { worker_id, .. } => {
                format!("Worker {} heartbeat", worker_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = QueueEvent::BacklogPurged {
            removed: 2,
            timestamp: DateTime::UNIX_EPOCH,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "backlog_purged");
        assert_eq!(value["removed"], 2);
        assert_eq!(event.job_id(), None);
    }

    #[test]
    fn failure_description_mentions_retry() {
        let event = QueueEvent::JobFailed {
            job_id: "J".into(),
            error: "sink down".into(),
            attempts: 1,
            will_retry: true,
            timestamp: Utc::now(),
        };
        assert_eq!(event.description(), "Job J failed: sink down (will retry)");
        assert_eq!(event.job_id(), Some("J"));
    }
}
