//! Caller-facing error taxonomy of the event store.

use crate::queue::QueueError;

/// Errors surfaced by event store operations.
///
/// Absence of a record is not an error: lookups return `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    /// A required identifying field was absent or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The supplied job identifier does not match `^[A-Za-z0-9_-]+$`.
    #[error("invalid job id: {0:?}")]
    InvalidIdentifier(String),

    /// Transient queue failures outlasted the retry budget.
    #[error("queue unavailable during {operation} after {attempts} attempt(s): {source}")]
    QueueUnavailable {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: QueueError,
    },

    /// Any other queue backend failure, annotated for diagnosis.
    #[error("queue error during {operation}{}: {source}", job_suffix(.job_id))]
    Queue {
        operation: &'static str,
        job_id: Option<String>,
        #[source]
        source: QueueError,
    },
}

impl EventLogError {
    /// Caller errors are not worth retrying.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EventLogError::MissingField(_) | EventLogError::InvalidIdentifier(_)
        )
    }

    /// Wrap a backend error with the operation it interrupted.
    pub fn queue(operation: &'static str, job_id: Option<&str>, source: QueueError) -> Self {
        EventLogError::Queue {
            operation,
            job_id: job_id.map(str::to_string),
            source,
        }
    }
}

fn job_suffix(job_id: &Option<String>) -> String {
    job_id
        .as_deref()
        .map(|id| format!(" (job {id})"))
        .unwrap_or_default()
}

/// Result alias for event store operations.
pub type EventLogResult<T> = Result<T, EventLogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_error_message_names_job() {
        let err = EventLogError::queue("resolve", Some("J1"), QueueError::Backend("boom".into()));
        assert_eq!(
            err.to_string(),
            "queue error during resolve (job J1): queue backend error: boom"
        );
        let err = EventLogError::queue("stats", None, QueueError::Backend("boom".into()));
        assert_eq!(err.to_string(), "queue error during stats: queue backend error: boom");
    }

    #[test]
    fn caller_errors_are_classified() {
        assert!(EventLogError::MissingField("accountId").is_caller_error());
        assert!(EventLogError::InvalidIdentifier("a b".into()).is_caller_error());
        assert!(
            !EventLogError::QueueUnavailable {
                operation: "enqueue",
                attempts: 3,
                source: QueueError::Unavailable("down".into()),
            }
            .is_caller_error()
        );
    }
}
