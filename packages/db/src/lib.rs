//! SurrealDB integration for the event job queue.
//!
//! This crate provides an explicitly opened database connection and a
//! [`SurrealJobQueue`] that implements the queue contract on top of it.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod queue;
mod schema;

pub use connection::{Database, DbConfig, DbError, connect};
pub use queue::SurrealJobQueue;
pub use schema::{JOB_TABLE, init_schema};
