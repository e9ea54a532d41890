//! Event-backed job store.
//!
//! Analytics events are stored as jobs in a shared [`JobQueue`]. [`EventStore`]
//! enqueues them, resolves them back by identifier, lists and pages the
//! backlog, and reports on and purges it.
//!
//! [`JobQueue`]: eventlog_core::JobQueue

mod config;
mod enqueue;
mod listing;
mod memory;
mod resolve;
mod retention;
mod store;

pub use config::{
    ConfigError, DEFAULT_GRACE_MS, DEFAULT_JOB_KIND, MAX_PAGE_LIMIT, RetryPolicy, StoreConfig,
};
pub use listing::{DEFAULT_PAGE_LIMIT, EventFilter};
pub use memory::MemoryJobQueue;
pub use resolve::{ResolveStrategy, SCAN_STATES, prefixed_id};
pub use store::EventStore;
