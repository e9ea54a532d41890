//! `eventlogd`: runs the event processing workers against the configured
//! SurrealDB job queue and archive storage until interrupted.

use std::sync::Arc;

use actors::{ActorError, ProcessorConfig, SupervisorMessage, start_supervisor};
use db::{DbConfig, DbError, SurrealJobQueue};
use event_store::{ConfigError, EventStore, StoreConfig};
use eventlog_core::QueueEvent;
use storage::{EventArchive, Storage, StorageError};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum DaemonError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("database: {0}")]
    Db(#[from] DbError),

    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    #[error("runtime: {0}")]
    Actor(#[from] ActorError),

    #[error("signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("eventlogd stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), DaemonError> {
    let store_config = StoreConfig::from_env()?;
    let processor_config = ProcessorConfig::from_env()?;
    let db_config = DbConfig::from_env();

    tracing::info!(
        endpoint = %db_config.endpoint,
        job_kind = %store_config.job_kind,
        workers = processor_config.concurrency,
        "Starting eventlogd"
    );

    let queue = Arc::new(SurrealJobQueue::open(&db_config).await?);
    let storage = Storage::from_env().await?;
    tracing::info!("Archiving events to {} storage", storage.backend());

    let store = EventStore::new(Arc::clone(&queue), store_config);
    let archive = Arc::new(EventArchive::new(storage));

    let (supervisor, handle) = start_supervisor(store, archive, processor_config).await?;

    let (tx, rx) = broadcast::channel(256);
    supervisor
        .send_message(SupervisorMessage::Subscribe { sender: tx })
        .map_err(|e| ActorError::Actor(e.to_string()))?;
    tokio::spawn(log_events(rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");

    supervisor
        .send_message(SupervisorMessage::Shutdown)
        .map_err(|e| ActorError::Actor(e.to_string()))?;
    if let Err(e) = handle.await {
        tracing::warn!("Supervisor task ended abnormally: {}", e);
    }

    match Arc::try_unwrap(queue) {
        Ok(queue) => queue.close(),
        Err(_) => tracing::warn!("Job queue still shared at shutdown; leaving connection to drop"),
    }
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<QueueEvent>) {
    loop {
        match rx.recv().await {
            Ok(QueueEvent::JobFailed {
                job_id,
                error,
                will_retry: false,
                ..
            }) => tracing::error!(job_id = %job_id, "Event job gave up: {}", error),
            Ok(event @ (QueueEvent::BacklogPurged { .. } | QueueEvent::JobsRecovered { .. })) => {
                tracing::info!("{}", event.description())
            }
            Ok(event) => match event.job_id() {
                Some(job_id) => tracing::debug!(job_id, "{}", event.description()),
                None => tracing::debug!("{}", event.description()),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Event log lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
