//! Worker actor that moves event jobs from the queue into the sink.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use event_store::EventStore;
use eventlog_core::{Envelope, EventSink, JobLifecycle, JobState, QueueEvent, QueuedJob};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;

use crate::messages::WorkerMessage;

/// State for the worker actor.
pub struct WorkerActorState<Q, S> {
    /// Unique worker ID.
    pub worker_id: String,
    /// Store over the shared queue.
    pub store: EventStore<Q>,
    /// Where processed events go.
    pub sink: Arc<S>,
    /// Job being processed.
    pub current_job: Option<String>,
    /// Event broadcaster.
    pub event_tx: Option<broadcast::Sender<QueueEvent>>,
}

impl<Q, S> WorkerActorState<Q, S> {
    /// Check if the worker is idle.
    pub fn is_idle(&self) -> bool {
        self.current_job.is_none()
    }

    fn broadcast(&self, event: QueueEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs<Q, S> {
    pub worker_id: String,
    pub store: EventStore<Q>,
    pub sink: Arc<S>,
    pub poll_interval: Duration,
    pub event_tx: Option<broadcast::Sender<QueueEvent>>,
}

/// Worker actor that processes event jobs.
pub struct WorkerActor<Q, S> {
    _marker: PhantomData<fn() -> (Q, S)>,
}

impl<Q, S> Default for WorkerActor<Q, S> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

/// Why a claimed job could not be written to the sink.
async fn deliver<S: EventSink>(sink: &S, job: &QueuedJob) -> Result<(), String> {
    let Some(envelope) = Envelope::from_data(&job.data) else {
        return Err("job carries no event body".to_string());
    };
    let record = envelope.to_record(job, &job.id);
    if !record.has_minimum_fields() {
        tracing::warn!(job_id = %record.job_id, "Processing event with incomplete payload");
    }
    sink.append(&record).await
}

impl<Q, S> WorkerActor<Q, S>
where
    Q: JobLifecycle,
    S: EventSink,
{
    /// Claim one waiting job and run it to completion or failure.
    /// Returns whether a job was claimed.
    ///
    /// A job whose outcome cannot be recorded stays active; the supervisor's
    /// stall recovery hands it back to the queue.
    async fn work_once(state: &mut WorkerActorState<Q, S>) -> bool {
        let queue = Arc::clone(state.store.queue());
        let job = match queue.take_next(&state.store.config().job_kind).await {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("Worker {} failed to claim a job: {}", state.worker_id, e);
                return false;
            }
        };

        state.current_job = Some(job.id.clone());
        state.broadcast(QueueEvent::JobStarted {
            job_id: job.id.clone(),
            worker_id: state.worker_id.clone(),
            attempt: job.attempts_made,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        match deliver(state.sink.as_ref(), &job).await {
            Ok(()) => match queue.complete(&job.id).await {
                Ok(()) => {
                    tracing::info!("Job {} processed by {}", job.id, state.worker_id);
                    state.broadcast(QueueEvent::JobCompleted {
                        job_id: job.id.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, "Failed to mark job completed: {}", e);
                }
            },
            Err(error) => match queue.fail(&job.id, &error).await {
                Ok(next) => {
                    let will_retry = next == JobState::Delayed;
                    tracing::warn!(
                        "Job {} failed on attempt {} (retry: {}): {}",
                        job.id,
                        job.attempts_made,
                        will_retry,
                        error
                    );
                    state.broadcast(QueueEvent::JobFailed {
                        job_id: job.id.clone(),
                        error,
                        attempts: job.attempts_made,
                        will_retry,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, "Failed to record job failure: {}", e);
                }
            },
        }

        state.current_job = None;
        true
    }
}

impl<Q, S> Actor for WorkerActor<Q, S>
where
    Q: JobLifecycle,
    S: EventSink,
{
    type Msg = WorkerMessage;
    type State = WorkerActorState<Q, S>;
    type Arguments = WorkerArgs<Q, S>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        // Start the poll loop
        let myself_clone = myself.clone();
        let poll_interval = args.poll_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(poll_interval).await;
                if myself_clone.send_message(WorkerMessage::Heartbeat).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            store: args.store,
            sink: args.sink,
            current_job: None,
            event_tx: args.event_tx,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                if state.is_idle() && Self::work_once(state).await {
                    // Keep draining while there is work.
                    myself.send_message(WorkerMessage::Poll)?;
                }
            }

            WorkerMessage::Heartbeat => {
                state.broadcast(QueueEvent::WorkerHeartbeat {
                    worker_id: state.worker_id.clone(),
                    current_job: state.current_job.clone(),
                    timestamp: Utc::now(),
                });

                myself.send_message(WorkerMessage::Poll)?;
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!("Worker stopped: {}", state.worker_id);
        Ok(())
    }
}
