#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use eventlog_core::{
    EventLogError, JobOptions, JobQueue, JobState, Payload, QueuedJob, now_millis,
};
use event_store::{EventStore, MemoryJobQueue, ResolveStrategy, RetryPolicy, StoreConfig};
use serde_json::{Value, json};

const HOUR_MS: i64 = 60 * 60 * 1000;

fn setup() -> (Arc<MemoryJobQueue>, EventStore<MemoryJobQueue>) {
    let queue = Arc::new(MemoryJobQueue::new());
    let config = StoreConfig::default().with_submit_retry(RetryPolicy {
        attempts: 3,
        base_delay: Duration::from_millis(1),
    });
    (queue.clone(), EventStore::new(queue, config))
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be an object, got {other}"),
    }
}

fn page_view() -> Payload {
    payload(json!({
        "accountId": "acc_1",
        "userId": "u1",
        "sessionId": "s1",
        "timestamp": "2024-05-01T10:00:00.000Z",
        "location": "/home",
        "eventType": "page_view",
        "referrer": {"host": "example.com", "campaign": null},
        "tags": ["a", "b"]
    }))
}

#[tokio::test]
async fn enqueue_then_resolve_and_list() -> Result<(), Box<dyn Error>> {
    let (_, store) = setup();

    let ack = store.enqueue(page_view()).await?;
    let job_id = ack.job_id.clone();

    let record = store.resolve_by_job_id(&job_id).await?.expect("resolvable");
    assert_eq!(record.job_id, job_id);
    assert_eq!(record.account_id, "acc_1");
    assert_eq!(record.user_id.as_deref(), Some("u1"));
    assert_eq!(record.event_type.as_deref(), Some("page_view"));
    assert!(record.has_minimum_fields());
    // open payload round-trips unchanged
    assert_eq!(record.payload, Value::Object(page_view()));

    let listed = store.list("acc_1", None, None).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].job_id, job_id);

    assert!(store.list("acc_1", Some("u2"), None).await?.is_empty());
    assert!(store.list("acc_2", None, None).await?.is_empty());
    assert_eq!(store.list("acc_1", Some("u1"), Some("page_view")).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn resolve_is_idempotent() -> Result<(), Box<dyn Error>> {
    let (_, store) = setup();
    let ack = store.enqueue(page_view()).await?;

    let first = store.resolve_by_job_id(&ack.job_id).await?;
    let second = store.resolve_by_job_id(&ack.job_id).await?;
    assert!(first.is_some());
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn invalid_identifiers_never_reach_the_queue() {
    let (queue, store) = setup();
    for bad in ["", " ", "abc!", "a/b", "id with spaces", "tab\t"] {
        let err = store.resolve_by_job_id(bad).await.unwrap_err();
        assert!(matches!(err, EventLogError::InvalidIdentifier(_)));
        assert!(err.is_caller_error());
    }
    assert_eq!(queue.calls(), 0);
}

#[tokio::test]
async fn missing_account_creates_no_job() -> Result<(), Box<dyn Error>> {
    let (_, store) = setup();
    store.enqueue(page_view()).await?;
    let before = store.stats().await?.total;

    let mut body = page_view();
    body.remove("accountId");
    let err = store.enqueue(body).await.unwrap_err();
    assert!(matches!(err, EventLogError::MissingField("accountId")));

    assert_eq!(store.stats().await?.total, before);
    Ok(())
}

#[tokio::test]
async fn purge_removes_only_expired_terminal_jobs() -> Result<(), Box<dyn Error>> {
    let (queue, store) = setup();
    let now = now_millis();
    let finished = |id: &str, state: JobState, age: i64| {
        let mut job = QueuedJob::new(id, "kind", json!({}), JobOptions::default());
        job.state = state;
        job.timestamp = now - age - HOUR_MS;
        job.finished_on = Some(now - age);
        job
    };
    queue.insert(finished("done-48h", JobState::Completed, 48 * HOUR_MS));
    queue.insert(finished("done-1h", JobState::Completed, HOUR_MS));
    let mut stale_waiting = finished("waiting-old", JobState::Waiting, 72 * HOUR_MS);
    stale_waiting.finished_on = None;
    queue.insert(stale_waiting);

    let before = store.stats().await?;
    let removed = store.purge(Some(24 * 3600 * 1000)).await?;
    let after = store.stats().await?;

    assert_eq!(removed, 1);
    assert_eq!(after.completed, before.completed - 1);
    assert_eq!(after.waiting, before.waiting);
    assert!(queue.get_job("done-1h").await?.is_some());
    assert!(queue.get_job("done-48h").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn transient_outage_is_absorbed_by_retry() -> Result<(), Box<dyn Error>> {
    let (queue, store) = setup();
    queue.fail_next_adds(2);

    let ack = store.enqueue(page_view()).await?;
    assert!(store.resolve_by_job_id(&ack.job_id).await?.is_some());
    assert_eq!(store.stats().await?.waiting, 1);
    Ok(())
}

#[tokio::test]
async fn persistent_outage_surfaces_after_budget() -> Result<(), Box<dyn Error>> {
    let (queue, store) = setup();
    queue.fail_next_adds(u32::MAX);

    let err = store.enqueue(page_view()).await.unwrap_err();
    assert!(matches!(err, EventLogError::QueueUnavailable { attempts: 3, .. }));
    assert!(!err.is_caller_error());
    assert_eq!(store.stats().await?.total, 0);
    Ok(())
}

#[tokio::test]
async fn legacy_encodings_still_resolve() -> Result<(), Box<dyn Error>> {
    let (queue, store) = setup();
    let kind = store.config().job_kind.clone();

    queue.insert(QueuedJob::new(
        format!("{kind}:legacy-prefixed"),
        kind.as_str(),
        json!({"body": {"accountId": "acc_p"}}),
        JobOptions::default(),
    ));
    let scanned_id = queue
        .add(
            &kind,
            json!({"jobId": "legacy-embedded", "body": {"body": {"accountId": "acc_e"}}}),
            JobOptions::default(),
        )
        .await?;
    assert_ne!(scanned_id, "legacy-embedded");

    let (strategy, _) = store.locate("legacy-prefixed").await?.expect("prefixed");
    assert_eq!(strategy, ResolveStrategy::PrefixedId);
    let record = store.resolve_by_job_id("legacy-prefixed").await?.expect("record");
    assert_eq!(record.account_id, "acc_p");

    let (strategy, job) = store.locate("legacy-embedded").await?.expect("embedded");
    assert_eq!(strategy, ResolveStrategy::EmbeddedScan);
    assert_eq!(job.id, scanned_id);
    let record = store.resolve_by_job_id("legacy-embedded").await?.expect("record");
    assert_eq!(record.account_id, "acc_e");
    assert_eq!(record.job_id, "legacy-embedded");

    // nested-only account ids are found by list as well
    assert_eq!(store.list("acc_e", None, None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn historical_producer_ids_resolve_with_default_kind() -> Result<(), Box<dyn Error>> {
    let (queue, store) = setup();
    queue.insert(QueuedJob::new(
        "processAddClientLogPostgresDB:01HZX3K9Q0V6W1Y2Z3A4B5C6D7",
        "processAddClientLogPostgresDB",
        json!({"jobId": "01HZX3K9Q0V6W1Y2Z3A4B5C6D7", "body": {"accountId": "acc_h"}}),
        JobOptions::default(),
    ));

    let (strategy, _) = store
        .locate("01HZX3K9Q0V6W1Y2Z3A4B5C6D7")
        .await?
        .expect("historical job");
    assert_eq!(strategy, ResolveStrategy::PrefixedId);
    Ok(())
}

#[tokio::test]
async fn reads_leave_the_backlog_untouched() -> Result<(), Box<dyn Error>> {
    let (queue, store) = setup();
    let ack = store.enqueue(page_view()).await?;
    store.enqueue(page_view()).await?;
    let now = now_millis();
    let seeded = [
        ("done", JobState::Completed),
        ("dead", JobState::Failed),
        ("later", JobState::Delayed),
    ];
    for (id, state) in seeded {
        let data = json!({"jobId": id, "body": {"accountId": "acc_1"}});
        let mut job = QueuedJob::new(id, "processAddClientLogPostgresDB", data, JobOptions::default());
        job.state = state;
        job.timestamp = now - HOUR_MS;
        queue.insert(job);
    }

    let snapshot = |jobs: Vec<QueuedJob>| {
        let mut jobs: Vec<(String, JobState, u32)> =
            jobs.into_iter().map(|j| (j.id, j.state, j.attempts_made)).collect();
        jobs.sort_by(|a, b| a.0.cmp(&b.0));
        jobs
    };
    let stats_before = store.stats().await?;
    let jobs_before = snapshot(queue.get_jobs(&JobState::ALL, None).await?);

    store.resolve_by_job_id(&ack.job_id).await?;
    store.resolve_by_job_id("missing").await?;
    store.inspect("done").await?;
    store.list("acc_1", Some("u1"), None).await?;
    store.list_paged(1, 2, None).await?;
    store.list_paged_for_account("acc_1", 2, 1).await?;

    assert_eq!(store.stats().await?, stats_before);
    assert_eq!(snapshot(queue.get_jobs(&JobState::ALL, None).await?), jobs_before);
    Ok(())
}

#[tokio::test]
async fn concurrent_enqueues_produce_distinct_jobs() -> Result<(), Box<dyn Error>> {
    let (_, store) = setup();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.enqueue(page_view()).await }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await??.job_id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 16);
    assert_eq!(store.stats().await?.waiting, 16);

    let page = store.list_paged_for_account("acc_1", 2, 10).await?;
    assert_eq!(page.items.len(), 6);
    assert_eq!(page.total, 16);
    Ok(())
}
