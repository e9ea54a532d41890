//! Job Resolver: finds the job behind an event identifier.
//!
//! Producers have encoded the identifier inconsistently over time, so lookup
//! walks an ordered chain of strategies and stops at the first hit.

use eventlog_core::{
    Envelope, EventLogError, EventLogResult, EventRecord, JobId, JobQueue, JobState, QueueError,
    QueuedJob,
};

use crate::store::{EventStore, queue_failure};

/// States enumerated by the embedded-id scan.
pub const SCAN_STATES: [JobState; 3] = [JobState::Completed, JobState::Active, JobState::Waiting];

/// One way of mapping an event identifier to a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveStrategy {
    /// The queue-assigned identifier is the event identifier.
    DirectId,
    /// The queue-assigned identifier is `{job_kind}:{event identifier}`.
    PrefixedId,
    /// Only the job data carries the identifier, as `jobId`.
    EmbeddedScan,
}

impl ResolveStrategy {
    /// Strategies in the order they are tried.
    pub const CHAIN: [ResolveStrategy; 3] = [
        ResolveStrategy::DirectId,
        ResolveStrategy::PrefixedId,
        ResolveStrategy::EmbeddedScan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveStrategy::DirectId => "direct_id",
            ResolveStrategy::PrefixedId => "prefixed_id",
            ResolveStrategy::EmbeddedScan => "embedded_scan",
        }
    }

    /// Run this strategy alone.
    pub async fn find<Q: JobQueue>(
        &self,
        queue: &Q,
        job_kind: &str,
        job_id: &JobId,
    ) -> Result<Option<QueuedJob>, QueueError> {
        match self {
            ResolveStrategy::DirectId => queue.get_job(job_id.as_str()).await,
            ResolveStrategy::PrefixedId => queue.get_job(&prefixed_id(job_kind, job_id)).await,
            ResolveStrategy::EmbeddedScan => {
                let jobs = queue.get_jobs(&SCAN_STATES, None).await?;
                Ok(jobs.into_iter().find(|job| {
                    eventlog_core::embedded_job_id(&job.data) == Some(job_id.as_str())
                }))
            }
        }
    }
}

impl std::fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue identifier composed from a job kind and a caller identifier.
pub fn prefixed_id(job_kind: &str, job_id: &JobId) -> String {
    format!("{job_kind}:{job_id}")
}

impl<Q: JobQueue> EventStore<Q> {
    /// Reconstruct the event behind `job_id`. `Ok(None)` means not found.
    pub async fn resolve_by_job_id(&self, job_id: &str) -> EventLogResult<Option<EventRecord>> {
        let Some((strategy, job)) = self.locate(job_id).await? else {
            tracing::info!(job_id, "Event job not found");
            return Ok(None);
        };

        let Some(envelope) = Envelope::from_data(&job.data) else {
            tracing::info!(job_id, queue_id = %job.id, "Job carries no event body");
            return Ok(None);
        };

        let record = envelope.to_record(&job, job_id);
        if record.account_id.is_empty() {
            tracing::warn!(job_id, "Resolved event has no account id");
        }
        if !record.has_minimum_fields() {
            tracing::warn!(job_id, "Resolved event payload is missing expected fields");
        }
        tracing::info!(job_id, strategy = %strategy, "Resolved event job");
        Ok(Some(record))
    }

    /// Find the job for `job_id` and report which strategy hit.
    pub async fn locate(&self, job_id: &str) -> EventLogResult<Option<(ResolveStrategy, QueuedJob)>> {
        let id = parse_id(job_id)?;
        for strategy in ResolveStrategy::CHAIN {
            let found = strategy
                .find(self.queue.as_ref(), &self.config.job_kind, &id)
                .await
                .map_err(|e| queue_failure("resolve", Some(job_id), e))?;
            match found {
                Some(job) => return Ok(Some((strategy, job))),
                None => tracing::debug!(job_id, strategy = %strategy, "No match"),
            }
        }
        Ok(None)
    }

    /// Snapshot of the job stored under exactly `job_id`, in any state.
    pub async fn inspect(&self, job_id: &str) -> EventLogResult<Option<QueuedJob>> {
        let id = parse_id(job_id)?;
        self.queue
            .get_job(id.as_str())
            .await
            .map_err(|e| queue_failure("inspect", Some(job_id), e))
    }
}

fn parse_id(job_id: &str) -> EventLogResult<JobId> {
    JobId::parse(job_id).map_err(|e| EventLogError::InvalidIdentifier(e.0))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use eventlog_core::JobOptions;
    use serde_json::json;

    use super::*;
    use crate::config::StoreConfig;
    use crate::memory::MemoryJobQueue;

    fn store() -> (Arc<MemoryJobQueue>, EventStore<MemoryJobQueue>) {
        let queue = Arc::new(MemoryJobQueue::new());
        (queue.clone(), EventStore::new(queue, StoreConfig::default().with_job_kind("kind")))
    }

    fn job(id: &str, data: serde_json::Value) -> QueuedJob {
        QueuedJob::new(id, "kind", data, JobOptions::default())
    }

    #[tokio::test]
    async fn direct_id_hits_first() -> Result<(), Box<dyn std::error::Error>> {
        let (queue, store) = store();
        queue.insert(job("J1", json!({"jobId": "J1", "body": {"accountId": "a"}})));

        let (strategy, found) = store.locate("J1").await?.expect("found");
        assert_eq!(strategy, ResolveStrategy::DirectId);
        assert_eq!(found.id, "J1");
        Ok(())
    }

    #[tokio::test]
    async fn prefixed_id_is_tried_second() -> Result<(), Box<dyn std::error::Error>> {
        let (queue, store) = store();
        queue.insert(job("kind:J2", json!({"body": {"accountId": "a"}})));

        let (strategy, _) = store.locate("J2").await?.expect("found");
        assert_eq!(strategy, ResolveStrategy::PrefixedId);

        let record = store.resolve_by_job_id("J2").await?.expect("record");
        assert_eq!(record.job_id, "J2");
        assert_eq!(record.account_id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn embedded_scan_is_the_fallback() -> Result<(), Box<dyn std::error::Error>> {
        let (queue, store) = store();
        queue.insert(job("17", json!({"jobId": "J3", "body": {"body": {"accountId": "n"}}})));

        let (strategy, found) = store.locate("J3").await?.expect("found");
        assert_eq!(strategy, ResolveStrategy::EmbeddedScan);
        assert_eq!(found.id, "17");
        Ok(())
    }

    #[tokio::test]
    async fn embedded_scan_skips_failed_and_delayed() -> Result<(), QueueError> {
        let queue = MemoryJobQueue::new();
        for (id, state) in [("1", JobState::Failed), ("2", JobState::Delayed)] {
            let mut j = job(id, json!({"jobId": "J4", "body": {}}));
            j.state = state;
            queue.insert(j);
        }
        let id = JobId::parse("J4").expect("valid");
        let found = ResolveStrategy::EmbeddedScan.find(&queue, "kind", &id).await?;
        assert!(found.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_malformed_ids_before_querying() {
        let (queue, store) = store();
        for bad in ["", "a b", "../etc", "id:1", "é"] {
            let err = store.resolve_by_job_id(bad).await.unwrap_err();
            assert!(matches!(err, EventLogError::InvalidIdentifier(_)), "{bad:?}");
            assert!(store.inspect(bad).await.is_err());
        }
        assert_eq!(queue.calls(), 0);
    }

    #[tokio::test]
    async fn missing_job_is_not_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let (queue, store) = store();
        assert!(store.resolve_by_job_id("nope").await?.is_none());
        // direct, prefixed, then one scan
        assert_eq!(queue.calls(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn job_without_body_resolves_to_nothing() -> Result<(), Box<dyn std::error::Error>> {
        let (queue, store) = store();
        queue.insert(job("J5", json!({"jobId": "J5"})));
        assert!(store.resolve_by_job_id("J5").await?.is_none());
        assert!(store.inspect("J5").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn partial_payloads_are_still_returned() -> Result<(), Box<dyn std::error::Error>> {
        let (queue, store) = store();
        queue.insert(job("J6", json!({"jobId": "J6", "body": {"payload": {"page": "/"}}})));

        let record = store.resolve_by_job_id("J6").await?.expect("record");
        assert!(!record.has_minimum_fields());
        assert_eq!(record.account_id, "");
        assert_eq!(record.payload, json!({"page": "/"}));
        Ok(())
    }
}
