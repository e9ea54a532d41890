//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Table holding every queued event job.
pub const JOB_TABLE: &str = "event_job";

/// Initialize the database schema.
///
/// Idempotent; safe to run on every startup.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(EVENT_JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Event job table schema.
///
/// Schemaless so producer data and options are stored as given; only the
/// fields the queue filters and orders on are typed.
const EVENT_JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS event_job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS name ON event_job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON event_job TYPE string
    ASSERT $value INSIDE ["waiting", "active", "completed", "failed", "delayed"];
DEFINE FIELD IF NOT EXISTS timestamp ON event_job TYPE int;
DEFINE FIELD IF NOT EXISTS attempts_made ON event_job TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS processed_on ON event_job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS finished_on ON event_job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS delay_until ON event_job TYPE option<int>;
DEFINE FIELD IF NOT EXISTS failed_reason ON event_job TYPE option<string>;

-- Per-state listing and counting, newest first
DEFINE INDEX IF NOT EXISTS event_job_state ON event_job FIELDS state, timestamp;
-- Worker polling: oldest waiting job of a kind
DEFINE INDEX IF NOT EXISTS event_job_claim ON event_job FIELDS state, name, timestamp;
DEFINE INDEX IF NOT EXISTS event_job_finished ON event_job FIELDS finished_on;
"#;
