//! Event Enqueuer: turns a payload into a uniquely identified, retryable job.

use chrono::{SecondsFormat, Utc};
use eventlog_core::{
    AckRecord, Envelope, EventLogError, EventLogResult, JobId, JobQueue, Payload, QueueError,
    QueueEvent,
};
use serde_json::Value;

use crate::store::EventStore;

impl<Q: JobQueue> EventStore<Q> {
    /// Queue an analytics event and acknowledge it without waiting for processing.
    ///
    /// The payload must carry a non-empty `accountId`. Not idempotent: equal
    /// payloads produce distinct jobs.
    pub async fn enqueue(&self, payload: Payload) -> EventLogResult<AckRecord> {
        let account_id = match payload.get("accountId").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => return Err(EventLogError::MissingField("accountId")),
        };

        let job_id = JobId::generate();
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let created_at = payload
            .get("createdAt")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| now.clone());

        tracing::info!(job_id = %job_id, account_id = %account_id, "Creating event job");

        let data = Envelope::build(job_id.as_str(), &account_id, &created_at, payload);
        self.submit(job_id.as_str(), data).await?;

        tracing::info!(job_id = %job_id, account_id = %account_id, "Created event job");
        self.notify(QueueEvent::EventEnqueued {
            job_id: job_id.to_string(),
            account_id: account_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(AckRecord {
            job_id: job_id.into_string(),
            account_id,
            created_at: now,
        })
    }

    /// Submit with bounded exponential retry on transient failures.
    async fn submit(&self, job_id: &str, data: Value) -> EventLogResult<()> {
        let policy = self.config.submit_retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let options = self.config.job_options(job_id);
            match self.queue.add(&self.config.job_kind, data.clone(), options).await {
                Ok(_) => return Ok(()),
                // An earlier attempt landed even though it reported failure.
                Err(QueueError::Conflict(_)) if attempt > 1 => {
                    tracing::warn!(job_id, attempt, "Job already present after retry");
                    return Ok(());
                }
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = policy.delay_after(attempt);
                    tracing::warn!(
                        job_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Queue submission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_transient() => {
                    tracing::error!(job_id, attempt, error = %err, "Queue submission retries exhausted");
                    return Err(EventLogError::QueueUnavailable {
                        operation: "enqueue",
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => {
                    tracing::error!(job_id, error = %err, "Queue submission failed");
                    return Err(EventLogError::queue("enqueue", Some(job_id), err));
                }
            }
        }
    }
}
