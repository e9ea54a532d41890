//! SurrealDB-backed job queue.

use std::ops::Range;

use eventlog_core::{
    CleanTarget, JobId, JobLifecycle, JobOptions, JobQueue, JobState, QueueError, QueuedJob,
    STALLED_REASON, now_millis,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Thing;

use crate::schema::{JOB_TABLE, init_schema};
use crate::{Database, DbConfig, DbError, connect};

/// How many waiting candidates a claim inspects before giving up on a race.
const CLAIM_CANDIDATES: usize = 8;

/// Internal record type for SurrealDB.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    name: String,
    data: Value,
    options: JobOptions,
    state: JobState,
    timestamp: i64,
    processed_on: Option<i64>,
    finished_on: Option<i64>,
    failed_reason: Option<String>,
    #[serde(default)]
    attempts_made: u32,
    delay_until: Option<i64>,
}

impl JobRecord {
    fn from_job(job: QueuedJob) -> Self {
        Self {
            id: None,
            name: job.name,
            data: job.data,
            options: job.options,
            state: job.state,
            timestamp: job.timestamp,
            processed_on: job.processed_on,
            finished_on: job.finished_on,
            failed_reason: job.failed_reason,
            attempts_made: job.attempts_made,
            delay_until: job.delay_until,
        }
    }

    fn into_job(self) -> QueuedJob {
        QueuedJob {
            id: self.id.map(|t| t.id.to_raw()).unwrap_or_default(),
            name: self.name,
            data: self.data,
            options: self.options,
            state: self.state,
            timestamp: self.timestamp,
            processed_on: self.processed_on,
            finished_on: self.finished_on,
            failed_reason: self.failed_reason,
            attempts_made: self.attempts_made,
            delay_until: self.delay_until,
        }
    }
}

#[derive(Deserialize)]
struct CountResult {
    count: i64,
}

/// [`JobQueue`] stored in a SurrealDB table.
///
/// Holds an explicitly opened connection; clones share it.
#[derive(Clone)]
pub struct SurrealJobQueue {
    db: Database,
}

impl SurrealJobQueue {
    /// Connect with `config` and make sure the schema exists.
    pub async fn open(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect(config).await?;
        Self::with_database(db).await
    }

    /// Wrap an existing connection, initializing the schema.
    pub async fn with_database(db: Database) -> Result<Self, DbError> {
        init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Release this handle's connection.
    pub fn close(self) {
        drop(self.db);
        tracing::info!("Database connection closed");
    }

    pub async fn create(&self, job: QueuedJob) -> Result<QueuedJob, DbError> {
        let id = job.id.clone();
        let created: Result<Option<JobRecord>, surrealdb::Error> = self
            .db
            .create((JOB_TABLE, id.clone()))
            .content(JobRecord::from_job(job))
            .await;

        match created {
            Ok(record) => record
                .map(JobRecord::into_job)
                .ok_or_else(|| DbError::Query(format!("Failed to create job {}", id))),
            // The only expected failure for a fresh id is a clash with an existing record.
            Err(err) => match self.find(&id).await? {
                Some(_) => Err(DbError::AlreadyExists(id)),
                None => Err(err.into()),
            },
        }
    }

    pub async fn find(&self, id: &str) -> Result<Option<QueuedJob>, DbError> {
        let record: Option<JobRecord> = self.db.select((JOB_TABLE, id.to_string())).await?;
        Ok(record.map(JobRecord::into_job))
    }

    pub async fn list(
        &self,
        states: &[JobState],
        range: Option<Range<usize>>,
    ) -> Result<Vec<QueuedJob>, DbError> {
        let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();

        let paging = match &range {
            Some(r) => format!(
                "LIMIT {} START {}",
                r.end.saturating_sub(r.start),
                r.start
            ),
            None => String::new(),
        };
        let query = format!(
            "SELECT * FROM event_job WHERE state INSIDE $states ORDER BY timestamp DESC {}",
            paging
        );

        let mut result = self.db.query(query).bind(("states", states)).await?;
        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().map(JobRecord::into_job).collect())
    }

    pub async fn count_in(&self, state: JobState) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS count FROM event_job WHERE state = $state GROUP ALL")
            .bind(("state", state.as_str()))
            .await?;

        let counts: Vec<CountResult> = result.take(0)?;
        Ok(counts.first().map(|c| c.count.max(0) as u64).unwrap_or(0))
    }

    pub async fn delete_finished_before(
        &self,
        state: JobState,
        cutoff: i64,
    ) -> Result<Vec<String>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                DELETE event_job
                WHERE state = $state AND (finished_on ?? timestamp) < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("state", state.as_str()))
            .bind(("cutoff", cutoff))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.into_job().id).collect())
    }

    /// Oldest waiting jobs of kind `name`.
    async fn waiting_candidates(&self, name: &str) -> Result<Vec<QueuedJob>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM event_job
                WHERE state = "waiting" AND name = $name
                ORDER BY timestamp ASC
                LIMIT $limit
                "#,
            )
            .bind(("name", name.to_string()))
            .bind(("limit", CLAIM_CANDIDATES as i64))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().map(JobRecord::into_job).collect())
    }

    /// Move one job from waiting to active unless another consumer got there first.
    async fn claim(&self, id: &str) -> Result<Option<QueuedJob>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE type::thing('event_job', $id)
                SET state = "active", processed_on = $now, attempts_made += 1
                WHERE state = "waiting"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("now", now_millis()))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;
        Ok(records.into_iter().next().map(JobRecord::into_job))
    }

    async fn set_fields(&self, id: &str, fields: Value) -> Result<QueuedJob, DbError> {
        let record: Option<JobRecord> = self.db.update((JOB_TABLE, id.to_string())).merge(fields).await?;
        record
            .map(JobRecord::into_job)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }
}

impl From<DbError> for QueueError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(surrealdb::Error::Api(api)) => QueueError::Unavailable(api.to_string()),
            DbError::Connection(other) => QueueError::Backend(other.to_string()),
            DbError::Query(msg) => QueueError::Backend(msg),
            DbError::NotFound(msg) => QueueError::NotFound(msg),
            DbError::AlreadyExists(id) => QueueError::Conflict(id),
            DbError::Serialization(msg) => QueueError::Serialization(msg),
        }
    }
}

impl JobQueue for SurrealJobQueue {
    async fn add(&self, name: &str, data: Value, options: JobOptions) -> Result<String, QueueError> {
        let id = options
            .job_id
            .clone()
            .unwrap_or_else(|| JobId::generate().into_string());
        let job = self.create(QueuedJob::new(id, name, data, options)).await?;
        tracing::debug!(job_id = %job.id, name, "Job added");
        Ok(job.id)
    }

    async fn get_job(&self, id: &str) -> Result<Option<QueuedJob>, QueueError> {
        Ok(self.find(id).await?)
    }

    async fn get_jobs(
        &self,
        states: &[JobState],
        range: Option<Range<usize>>,
    ) -> Result<Vec<QueuedJob>, QueueError> {
        Ok(self.list(states, range).await?)
    }

    async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        Ok(self.count_in(state).await?)
    }

    async fn clean(&self, grace_ms: u64, target: CleanTarget) -> Result<Vec<String>, QueueError> {
        let cutoff = now_millis().saturating_sub(i64::try_from(grace_ms).unwrap_or(i64::MAX));
        let removed = self.delete_finished_before(target.state(), cutoff).await?;
        tracing::debug!(state = %target.state(), removed = removed.len(), "Cleaned jobs");
        Ok(removed)
    }
}

impl JobLifecycle for SurrealJobQueue {
    async fn take_next(&self, name: &str) -> Result<Option<QueuedJob>, QueueError> {
        for candidate in self.waiting_candidates(name).await? {
            if let Some(job) = self.claim(&candidate.id).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.set_fields(
            id,
            serde_json::json!({ "state": JobState::Completed, "finished_on": now_millis() }),
        )
        .await?;
        Ok(())
    }

    async fn fail(&self, id: &str, reason: &str) -> Result<JobState, QueueError> {
        let job = self
            .find(id)
            .await?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let now = now_millis();

        let fields = if job.attempts_made < job.options.attempts {
            let delay = job.options.backoff.delay_ms(job.attempts_made.max(1));
            serde_json::json!({
                "state": JobState::Delayed,
                "failed_reason": reason,
                "delay_until": now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX)),
            })
        } else {
            serde_json::json!({
                "state": JobState::Failed,
                "failed_reason": reason,
                "finished_on": now,
            })
        };

        let updated = self.set_fields(id, fields).await?;
        Ok(updated.state)
    }

    async fn promote_delayed(&self) -> Result<u64, QueueError> {
        let mut result = self
            .db
            .query(
                r#"
                UPDATE event_job
                SET state = "waiting", delay_until = NONE
                WHERE state = "delayed" AND (delay_until ?? 0) <= $now
                RETURN AFTER
                "#,
            )
            .bind(("now", now_millis()))
            .await
            .map_err(DbError::from)?;

        let records: Vec<JobRecord> = result.take(0).map_err(DbError::from)?;
        Ok(records.len() as u64)
    }

    async fn recover_stalled(&self, stall_ms: u64) -> Result<u64, QueueError> {
        let now = now_millis();
        let cutoff = now.saturating_sub(i64::try_from(stall_ms).unwrap_or(i64::MAX));
        let mut result = self
            .db
            .query(
                r#"
                UPDATE event_job
                SET state = "failed", failed_reason = $reason, finished_on = $now
                WHERE state = "active" AND (processed_on ?? timestamp) < $cutoff
                    AND attempts_made >= options.attempts
                RETURN AFTER;
                UPDATE event_job
                SET state = "waiting"
                WHERE state = "active" AND (processed_on ?? timestamp) < $cutoff
                RETURN AFTER;
                "#,
            )
            .bind(("reason", STALLED_REASON))
            .bind(("now", now))
            .bind(("cutoff", cutoff))
            .await
            .map_err(DbError::from)?;

        let failed: Vec<JobRecord> = result.take(0).map_err(DbError::from)?;
        let released: Vec<JobRecord> = result.take(1).map_err(DbError::from)?;
        if !failed.is_empty() {
            tracing::warn!(count = failed.len(), "Stalled jobs out of attempts marked failed");
        }
        Ok((failed.len() + released.len()) as u64)
    }
}
