//! Core domain types for the analytics event log.
//!
//! This crate contains shared types used across all packages:
//! - `EventRecord` / `AckRecord` and the envelope events are queued in
//! - `QueuedJob`, `JobState` and job options for the queue side
//! - the `JobQueue` / `JobLifecycle` contract and the `EventSink` capability
//! - `QueueEvent` notifications and the `EventLogError` taxonomy

mod error;
mod events;
mod job;
mod queue;
mod record;

pub use error::{EventLogError, EventLogResult};
pub use events::QueueEvent;
pub use job::{
    Backoff, CleanTarget, InvalidJobId, JobId, JobOptions, JobState, QueuedJob, is_valid_job_id,
    millis_to_datetime, now_millis,
};
pub use queue::{
    EventSink, JobLifecycle, JobQueue, PageFilter, PageResult, QueueError, QueueStats,
    STALLED_REASON,
};
pub use record::{
    AckRecord, Envelope, EventRecord, MINIMUM_EVENT_FIELDS, Payload, embedded_job_id,
    has_minimum_event_fields, iso_timestamp,
};
