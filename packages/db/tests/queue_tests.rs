#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use db::DbError;
use eventlog_core::{
    Backoff, CleanTarget, JobLifecycle, JobOptions, JobQueue, JobState, QueueError,
    STALLED_REASON, now_millis,
};
use serde_json::json;

const HOUR_MS: i64 = 60 * 60 * 1000;

#[tokio::test]
async fn add_and_get_round_trip() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;

    let data = json!({
        "jobId": "J1",
        "body": {"accountId": "acc_1", "payload": {"tags": ["a"], "nested": {"n": 1}}}
    });
    let id = queue
        .add("processAddClientLogPostgresDB", data.clone(), JobOptions::default().with_job_id("J1"))
        .await?;
    assert_eq!(id, "J1");

    let job = queue.get_job("J1").await?.expect("stored job");
    assert_eq!(job.id, "J1");
    assert_eq!(job.state, JobState::Waiting);
    assert_eq!(job.data, data);
    assert_eq!(job.options.attempts, 3);
    assert!(queue.get_job("missing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn duplicate_job_id_conflicts() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    let options = JobOptions::default().with_job_id("dup");
    queue.add("k", json!({}), options.clone()).await?;

    let err = queue.add("k", json!({}), options).await.unwrap_err();
    assert_eq!(err, QueueError::Conflict("dup".into()));
    Ok(())
}

#[tokio::test]
async fn generated_ids_are_unique() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    let a = queue.add("k", json!({}), JobOptions::default()).await?;
    let b = queue.add("k", json!({}), JobOptions::default()).await?;
    assert_ne!(a, b);
    assert_eq!(queue.count(JobState::Waiting).await?, 2);
    Ok(())
}

#[tokio::test]
async fn prefixed_ids_are_stored_verbatim() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    let now = now_millis();
    queue
        .create(common::job_in("processAddClientLogPostgresDB:J9", JobState::Waiting, now, json!({"body": {}})))
        .await?;
    let job = queue.get_job("processAddClientLogPostgresDB:J9").await?.expect("prefixed job");
    assert_eq!(job.id, "processAddClientLogPostgresDB:J9");
    Ok(())
}

#[tokio::test]
async fn get_jobs_orders_and_slices() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    for (id, state, ts) in [
        ("a", JobState::Completed, 10),
        ("b", JobState::Waiting, 30),
        ("c", JobState::Active, 20),
        ("d", JobState::Failed, 40),
    ] {
        queue.create(common::job_in(id, state, ts, json!({}))).await?;
    }

    let states = [JobState::Completed, JobState::Active, JobState::Waiting];
    let all = queue.get_jobs(&states, None).await?;
    let ids: Vec<_> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, ["b", "c", "a"]);

    let page = queue.get_jobs(&states, Some(1..3)).await?;
    let ids: Vec<_> = page.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, ["c", "a"]);

    assert_eq!(queue.count(JobState::Failed).await?, 1);
    assert_eq!(queue.count(JobState::Delayed).await?, 0);
    Ok(())
}

#[tokio::test]
async fn clean_removes_only_expired_jobs_of_target_state() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    let now = now_millis();
    queue.create(common::job_in("old-done", JobState::Completed, now - 48 * HOUR_MS, json!({}))).await?;
    queue.create(common::job_in("new-done", JobState::Completed, now - HOUR_MS, json!({}))).await?;
    queue.create(common::job_in("old-failed", JobState::Failed, now - 48 * HOUR_MS, json!({}))).await?;
    queue.create(common::job_in("old-waiting", JobState::Waiting, now - 48 * HOUR_MS, json!({}))).await?;

    let removed = queue.clean(24 * HOUR_MS as u64, CleanTarget::Completed).await?;
    assert_eq!(removed, vec!["old-done".to_string()]);
    assert!(queue.get_job("new-done").await?.is_some());
    assert!(queue.get_job("old-failed").await?.is_some());
    assert!(queue.get_job("old-waiting").await?.is_some());

    let removed = queue.clean(0, CleanTarget::Failed).await?;
    assert_eq!(removed.len(), 1);
    Ok(())
}

#[tokio::test]
async fn lifecycle_retries_then_fails() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    let options = JobOptions::default()
        .with_job_id("L1")
        .with_attempts(2)
        .with_backoff(Backoff::Fixed { delay_ms: 0 });
    queue.add("processAddClientLogPostgresDB", json!({}), options).await?;

    assert!(queue.take_next("otherKind").await?.is_none());
    let claimed = queue.take_next("processAddClientLogPostgresDB").await?.expect("claimable");
    assert_eq!(claimed.state, JobState::Active);
    assert_eq!(claimed.attempts_made, 1);
    assert!(claimed.processed_on.is_some());
    assert!(queue.take_next("processAddClientLogPostgresDB").await?.is_none());

    assert_eq!(queue.fail("L1", "sink offline").await?, JobState::Delayed);
    assert_eq!(queue.promote_delayed().await?, 1);

    queue.take_next("processAddClientLogPostgresDB").await?.expect("promoted");
    assert_eq!(queue.fail("L1", "still offline").await?, JobState::Failed);

    let job = queue.get_job("L1").await?.expect("job");
    assert_eq!(job.failed_reason.as_deref(), Some("still offline"));
    assert!(job.finished_on.is_some());
    Ok(())
}

#[tokio::test]
async fn complete_marks_finished() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    queue.add("k", json!({}), JobOptions::default().with_job_id("C1")).await?;
    queue.take_next("k").await?;
    queue.complete("C1").await?;

    let job = queue.get_job("C1").await?.expect("job");
    assert_eq!(job.state, JobState::Completed);
    assert!(job.finished_on.is_some());

    let missing = queue.complete("nope").await;
    assert!(matches!(missing, Err(QueueError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn stalled_active_jobs_are_released() -> Result<(), Box<dyn Error>> {
    let queue = common::setup_queue().await?;
    let now = now_millis();
    let claims = [("S1", 1, now - HOUR_MS), ("S2", 3, now - HOUR_MS), ("S3", 1, now)];
    for (id, attempts_made, claimed_at) in claims {
        let mut job = common::job_in(id, JobState::Active, now - 2 * HOUR_MS, json!({}));
        job.attempts_made = attempts_made;
        job.processed_on = Some(claimed_at);
        queue.create(job).await?;
    }

    assert_eq!(queue.recover_stalled(60_000).await?, 2);

    assert_eq!(queue.get_job("S1").await?.expect("job").state, JobState::Waiting);
    let spent = queue.get_job("S2").await?.expect("job");
    assert_eq!(spent.state, JobState::Failed);
    assert_eq!(spent.failed_reason.as_deref(), Some(STALLED_REASON));
    assert_eq!(queue.get_job("S3").await?.expect("job").state, JobState::Active);
    assert_eq!(queue.count(JobState::Active).await?, 1);
    Ok(())
}

#[tokio::test]
async fn db_errors_map_to_queue_errors() {
    let conflict: QueueError = DbError::AlreadyExists("x".into()).into();
    assert_eq!(conflict, QueueError::Conflict("x".into()));
    let missing: QueueError = DbError::NotFound("x".into()).into();
    assert!(matches!(missing, QueueError::NotFound(_)));
}
