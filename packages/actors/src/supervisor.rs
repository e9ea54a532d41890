//! Supervisor actor: owns the workers and runs backlog maintenance.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use event_store::EventStore;
use eventlog_core::{EventSink, JobLifecycle, QueueEvent};
use ractor::{Actor, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::broadcast;

use crate::config::ProcessorConfig;
use crate::messages::{ActorResult, SupervisorMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// State for the supervisor actor.
pub struct SupervisorState<Q, S> {
    /// Store over the shared queue; publishes on `event_tx`.
    pub store: EventStore<Q>,
    /// Sink handed to every worker.
    pub sink: Arc<S>,
    pub config: ProcessorConfig,
    /// Worker actors by ID.
    pub workers: Vec<(String, ActorRef<WorkerMessage>)>,
    /// Event broadcaster.
    pub event_tx: broadcast::Sender<QueueEvent>,
    /// Worker counter for unique IDs.
    worker_counter: u64,
}

impl<Q, S> SupervisorState<Q, S> {
    /// Generate a unique worker ID.
    fn next_worker_id(&mut self) -> String {
        self.worker_counter += 1;
        format!("worker-{}", self.worker_counter)
    }
}

/// Supervisor actor arguments.
pub struct SupervisorArgs<Q, S> {
    pub store: EventStore<Q>,
    pub sink: Arc<S>,
    pub config: ProcessorConfig,
}

/// Supervisor actor that manages the processing workers.
pub struct Supervisor<Q, S> {
    _marker: PhantomData<fn() -> (Q, S)>,
}

impl<Q, S> Default for Supervisor<Q, S> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<Q, S> Supervisor<Q, S>
where
    Q: JobLifecycle,
    S: EventSink,
{
    async fn spawn_worker(
        myself: &ActorRef<SupervisorMessage>,
        state: &mut SupervisorState<Q, S>,
    ) -> Result<(), ActorProcessingErr> {
        let worker_id = state.next_worker_id();
        let args = WorkerArgs {
            worker_id: worker_id.clone(),
            store: state.store.clone(),
            sink: state.sink.clone(),
            poll_interval: state.config.poll_interval,
            event_tx: Some(state.event_tx.clone()),
        };

        let (worker, _handle) =
            Actor::spawn_linked(None, WorkerActor::default(), args, myself.get_cell())
                .await
                .map_err(|e| ActorProcessingErr::from(format!("Failed to spawn worker: {}", e)))?;

        state.workers.push((worker_id, worker));
        Ok(())
    }

    /// Release stalled jobs, promote due delayed ones, then purge expired
    /// terminal ones.
    async fn maintain(state: &SupervisorState<Q, S>) {
        match state.store.queue().recover_stalled(state.config.stall_timeout_ms).await {
            Ok(0) => {}
            Ok(count) => {
                tracing::warn!("Recovered {} stalled jobs", count);
                let _ = state.event_tx.send(QueueEvent::JobsRecovered {
                    count,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => tracing::warn!("Failed to recover stalled jobs: {}", e),
        }

        match state.store.queue().promote_delayed().await {
            Ok(0) => {}
            Ok(count) => {
                tracing::info!("Promoted {} delayed jobs", count);
                let _ = state.event_tx.send(QueueEvent::JobsPromoted {
                    count,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => tracing::warn!("Failed to promote delayed jobs: {}", e),
        }

        if let Err(e) = state.store.purge(Some(state.config.retention_grace_ms)).await {
            tracing::warn!("Retention purge failed: {}", e);
        }
    }
}

impl<Q, S> Actor for Supervisor<Q, S>
where
    Q: JobLifecycle,
    S: EventSink,
{
    type Msg = SupervisorMessage;
    type State = SupervisorState<Q, S>;
    type Arguments = SupervisorArgs<Q, S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting event processing supervisor with {} workers",
            args.config.concurrency
        );

        let (event_tx, _) = broadcast::channel(1024);
        let mut state = SupervisorState {
            store: args.store.with_events(event_tx.clone()),
            sink: args.sink,
            config: args.config,
            workers: Vec::new(),
            event_tx,
            worker_counter: 0,
        };

        for _ in 0..state.config.concurrency.max(1) {
            Self::spawn_worker(&myself, &mut state).await?;
        }

        // Start periodic tick
        let myself_clone = myself.clone();
        let period = state.config.maintenance_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if myself_clone.send_message(SupervisorMessage::Tick).is_err() {
                    break;
                }
            }
        });

        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::GetStats { reply } => {
                let stats = state.store.stats().await.map_err(|e| e.to_string());
                let _ = reply.send(stats);
            }

            SupervisorMessage::Purge { grace_ms, reply } => {
                let grace_ms = grace_ms.unwrap_or(state.config.retention_grace_ms);
                let removed = state.store.purge(Some(grace_ms)).await.map_err(|e| e.to_string());
                let _ = reply.send(removed);
            }

            SupervisorMessage::ListWorkers { reply } => {
                let _ = reply.send(state.workers.iter().map(|(id, _)| id.clone()).collect());
            }

            SupervisorMessage::Subscribe { sender } => {
                // Merge event streams - forward from our channel to subscriber's
                let mut rx = state.event_tx.subscribe();
                tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                });
            }

            SupervisorMessage::Shutdown => {
                tracing::info!("Shutting down supervisor");
                // Wait for the workers so their store handles are dropped
                // before the supervisor's join handle resolves.
                for (worker_id, worker) in state.workers.drain(..) {
                    if let Err(e) = worker.stop_and_wait(None, Some(WORKER_STOP_TIMEOUT)).await {
                        tracing::warn!("Worker {} did not stop cleanly: {}", worker_id, e);
                    }
                }
                myself.stop(None);
                return Ok(());
            }

            SupervisorMessage::Tick => Self::maintain(state).await,
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let SupervisionEvent::ActorFailed(cell, err) = message {
            tracing::warn!("Worker {:?} failed: {}", cell.get_id(), err);
            let failed = cell.get_id();
            let before = state.workers.len();
            state.workers.retain(|(_, worker)| worker.get_id() != failed);
            if state.workers.len() < before {
                Self::spawn_worker(&myself, state).await?;
            }
        }
        Ok(())
    }
}

/// Start the supervisor and its workers.
pub async fn start_supervisor<Q, S>(
    store: EventStore<Q>,
    sink: Arc<S>,
    config: ProcessorConfig,
) -> ActorResult<(ActorRef<SupervisorMessage>, tokio::task::JoinHandle<()>)>
where
    Q: JobLifecycle,
    S: EventSink,
{
    let args = SupervisorArgs {
        store,
        sink,
        config,
    };
    Ok(Actor::spawn(None, Supervisor::default(), args).await?)
}
