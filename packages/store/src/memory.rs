//! In-process job queue backend.
//!
//! Keeps the whole backlog in a mutex-guarded map. Used by tests and local
//! runs; it also counts calls and can simulate transient outages.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use eventlog_core::{
    CleanTarget, JobLifecycle, JobOptions, JobQueue, JobState, QueueError, QueuedJob,
    STALLED_REASON, now_millis,
};

#[derive(Debug)]
struct Entry {
    seq: u64,
    job: QueuedJob,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, Entry>,
    next_seq: u64,
}

impl Inner {
    fn insert(&mut self, job: QueuedJob) {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.jobs.insert(job.id.clone(), Entry { seq, job });
    }

    /// Entries in `states`, newest first; insertion order breaks timestamp ties.
    fn sorted(&self, states: &[JobState]) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self
            .jobs
            .values()
            .filter(|e| states.contains(&e.job.state))
            .collect();
        entries.sort_by(|a, b| {
            b.job
                .timestamp
                .cmp(&a.job.timestamp)
                .then(b.seq.cmp(&a.seq))
        });
        entries
    }
}

/// Mutex-backed [`JobQueue`] implementation.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    calls: AtomicU64,
    failing_adds: AtomicU32,
    failing_completes: AtomicU32,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of queue operations invoked so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` calls to `add` fail with [`QueueError::Unavailable`].
    pub fn fail_next_adds(&self, n: u32) {
        self.failing_adds.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `complete` fail with [`QueueError::Unavailable`].
    pub fn fail_next_completes(&self, n: u32) {
        self.failing_completes.store(n, Ordering::SeqCst);
    }

    /// Store a job exactly as given, bypassing `add`. Replaces any job with the same id.
    pub fn insert(&self, job: QueuedJob) {
        self.lock().insert(job);
    }

    /// Number of jobs held, in any state.
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consume one injected failure from `counter`, if any are left.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl JobQueue for MemoryJobQueue {
    async fn add(
        &self,
        name: &str,
        data: serde_json::Value,
        options: JobOptions,
    ) -> Result<String, QueueError> {
        self.record_call();
        if take_one(&self.failing_adds) {
            return Err(QueueError::Unavailable("simulated outage".into()));
        }

        let mut inner = self.lock();
        let id = match options.job_id.clone() {
            Some(id) if inner.jobs.contains_key(&id) => return Err(QueueError::Conflict(id)),
            Some(id) => id,
            None => (inner.next_seq + 1).to_string(),
        };
        inner.insert(QueuedJob::new(id.clone(), name, data, options));
        Ok(id)
    }

    async fn get_job(&self, id: &str) -> Result<Option<QueuedJob>, QueueError> {
        self.record_call();
        Ok(self.lock().jobs.get(id).map(|e| e.job.clone()))
    }

    async fn get_jobs(
        &self,
        states: &[JobState],
        range: Option<Range<usize>>,
    ) -> Result<Vec<QueuedJob>, QueueError> {
        self.record_call();
        let inner = self.lock();
        let sorted = inner.sorted(states);
        let jobs = match range {
            Some(range) => sorted
                .into_iter()
                .skip(range.start)
                .take(range.end.saturating_sub(range.start))
                .map(|e| e.job.clone())
                .collect(),
            None => sorted.into_iter().map(|e| e.job.clone()).collect(),
        };
        Ok(jobs)
    }

    async fn count(&self, state: JobState) -> Result<u64, QueueError> {
        self.record_call();
        let inner = self.lock();
        Ok(inner.jobs.values().filter(|e| e.job.state == state).count() as u64)
    }

    async fn clean(&self, grace_ms: u64, target: CleanTarget) -> Result<Vec<String>, QueueError> {
        self.record_call();
        let cutoff = now_millis().saturating_sub(i64::try_from(grace_ms).unwrap_or(i64::MAX));
        let state = target.state();

        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .jobs
            .values()
            .filter(|e| e.job.state == state)
            .filter(|e| e.job.finished_on.unwrap_or(e.job.timestamp) < cutoff)
            .map(|e| e.job.id.clone())
            .collect();
        for id in &expired {
            inner.jobs.remove(id);
        }
        Ok(expired)
    }
}

impl JobLifecycle for MemoryJobQueue {
    async fn take_next(&self, name: &str) -> Result<Option<QueuedJob>, QueueError> {
        self.record_call();
        let mut inner = self.lock();
        let next_id = inner
            .sorted(&[JobState::Waiting])
            .into_iter()
            .rev()
            .find(|e| e.job.name == name)
            .map(|e| e.job.id.clone());

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(entry) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        entry.job.state = JobState::Active;
        entry.job.processed_on = Some(now_millis());
        entry.job.attempts_made += 1;
        Ok(Some(entry.job.clone()))
    }

    async fn complete(&self, id: &str) -> Result<(), QueueError> {
        self.record_call();
        if take_one(&self.failing_completes) {
            return Err(QueueError::Unavailable("injected complete failure".into()));
        }
        let mut inner = self.lock();
        let entry = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        entry.job.state = JobState::Completed;
        entry.job.finished_on = Some(now_millis());
        Ok(())
    }

    async fn fail(&self, id: &str, reason: &str) -> Result<JobState, QueueError> {
        self.record_call();
        let now = now_millis();
        let mut inner = self.lock();
        let job = &mut inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?
            .job;

        job.failed_reason = Some(reason.to_string());
        if job.attempts_made < job.options.attempts {
            let delay = job.options.backoff.delay_ms(job.attempts_made.max(1));
            job.state = JobState::Delayed;
            job.delay_until = Some(now.saturating_add(i64::try_from(delay).unwrap_or(i64::MAX)));
        } else {
            job.state = JobState::Failed;
            job.finished_on = Some(now);
        }
        Ok(job.state)
    }

    async fn promote_delayed(&self) -> Result<u64, QueueError> {
        self.record_call();
        let now = now_millis();
        let mut inner = self.lock();
        let mut promoted = 0;
        for entry in inner.jobs.values_mut() {
            let job = &mut entry.job;
            if job.state == JobState::Delayed && job.delay_until.is_none_or(|t| t <= now) {
                job.state = JobState::Waiting;
                job.delay_until = None;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn recover_stalled(&self, stall_ms: u64) -> Result<u64, QueueError> {
        self.record_call();
        let now = now_millis();
        let cutoff = now.saturating_sub(i64::try_from(stall_ms).unwrap_or(i64::MAX));
        let mut inner = self.lock();
        let mut recovered = 0;
        for entry in inner.jobs.values_mut() {
            let job = &mut entry.job;
            if job.state != JobState::Active || job.processed_on.unwrap_or(job.timestamp) >= cutoff {
                continue;
            }
            if job.attempts_made < job.options.attempts {
                job.state = JobState::Waiting;
            } else {
                job.state = JobState::Failed;
                job.failed_reason = Some(STALLED_REASON.to_string());
                job.finished_on = Some(now);
            }
            recovered += 1;
        }
        Ok(recovered)
    }
}
