//! Actor runtime that processes queued analytics events.
//!
//! This crate provides the Ractor-based consumer side of the event store.
//!
//! # Architecture
//!
//! - `Supervisor` - Top-level actor: spawns workers, runs the maintenance tick
//!   (stall recovery, delayed-job promotion and retention purge) and fans out
//!   events
//! - `WorkerActor` - Claims waiting event jobs and writes them to an `EventSink`
//!
//! # Usage
//!
//! ```ignore
//! use actors::{ProcessorConfig, SupervisorMessage, start_supervisor};
//!
//! let (supervisor, handle) = start_supervisor(store, sink, ProcessorConfig::default()).await?;
//!
//! supervisor.send_message(SupervisorMessage::Shutdown)?;
//! handle.await?;
//! ```

mod config;
mod messages;
mod supervisor;
mod worker_actor;

pub use config::ProcessorConfig;
pub use messages::{ActorError, ActorResult, SupervisorMessage, WorkerMessage};
pub use supervisor::{Supervisor, SupervisorArgs, SupervisorState, start_supervisor};
pub use worker_actor::{WorkerActor, WorkerActorState, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
