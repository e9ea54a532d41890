#![allow(dead_code)]

use db::{DbConfig, DbError, SurrealJobQueue};
use eventlog_core::{JobOptions, JobState, QueuedJob};
use serde_json::Value;

/// Fresh queue on its own in-memory datastore.
pub async fn setup_queue() -> Result<SurrealJobQueue, DbError> {
    SurrealJobQueue::open(&DbConfig::memory().with_namespace("test")).await
}

pub fn job_in(id: &str, state: JobState, timestamp: i64, data: Value) -> QueuedJob {
    let mut job = QueuedJob::new(id, "processAddClientLogPostgresDB", data, JobOptions::default());
    job.state = state;
    job.timestamp = timestamp;
    if state.is_terminal() {
        job.finished_on = Some(timestamp);
    }
    job
}
