//! Message types for actor communication.

use eventlog_core::{QueueEvent, QueueStats};
use ractor::RpcReplyPort;
use tokio::sync::broadcast;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Claim and process the next waiting job, if idle.
    Poll,

    /// Heartbeat tick.
    Heartbeat,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Backlog counts.
    GetStats {
        reply: RpcReplyPort<Result<QueueStats, String>>,
    },

    /// Purge terminal jobs now; `None` uses the configured grace period.
    Purge {
        grace_ms: Option<u64>,
        reply: RpcReplyPort<Result<u64, String>>,
    },

    /// Identifiers of the running workers.
    ListWorkers { reply: RpcReplyPort<Vec<String>> },

    /// Subscribe to events.
    Subscribe {
        sender: broadcast::Sender<QueueEvent>,
    },

    /// Stop all workers, then the supervisor.
    Shutdown,

    /// Periodic tick for maintenance.
    Tick,
}

/// Result type for actor operations.
pub type ActorResult<T> = Result<T, ActorError>;

/// Error type for actor operations.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error("Failed to spawn actor: {0}")]
    Spawn(#[from] ractor::SpawnErr),

    #[error("Actor error: {0}")]
    Actor(String),
}
