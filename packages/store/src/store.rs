//! The event-backed job store facade.

use std::sync::Arc;

use eventlog_core::{EventLogError, JobQueue, QueueError, QueueEvent};
use tokio::sync::broadcast;

use crate::config::StoreConfig;

/// Stateless handle over a shared job queue.
///
/// Cloning is cheap; clones share the queue handle. Concurrent calls rely on
/// the queue's own atomicity.
pub struct EventStore<Q> {
    pub(crate) queue: Arc<Q>,
    pub(crate) config: StoreConfig,
    events: Option<broadcast::Sender<QueueEvent>>,
}

impl<Q> Clone for EventStore<Q> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            config: self.config.clone(),
            events: self.events.clone(),
        }
    }
}

impl<Q: JobQueue> EventStore<Q> {
    pub fn new(queue: Arc<Q>, config: StoreConfig) -> Self {
        Self {
            queue,
            config,
            events: None,
        }
    }

    /// Publish lifecycle notifications on `tx`.
    pub fn with_events(mut self, tx: broadcast::Sender<QueueEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn notify(&self, event: QueueEvent) {
        if let Some(tx) = &self.events {
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }
}

/// Classify a backend failure for a single-shot operation.
pub(crate) fn queue_failure(
    operation: &'static str,
    job_id: Option<&str>,
    source: QueueError,
) -> EventLogError {
    if source.is_transient() {
        EventLogError::QueueUnavailable {
            operation,
            attempts: 1,
            source,
        }
    } else {
        EventLogError::queue(operation, job_id, source)
    }
}
