//! Archive of processed event records.
//!
//! Each record is one JSON object at `events/{account}/{yyyy-mm-dd}/{job_id}.json`.
//! Rewriting the same job overwrites its object, so redelivered jobs do not
//! produce duplicates.

use chrono::{DateTime, Utc};
use eventlog_core::{EventRecord, EventSink};

use crate::{Storage, StorageError};

const ROOT: &str = "events";

/// Key segment used for records without an account id.
const UNATTRIBUTED: &str = "_unattributed";

#[derive(Clone)]
pub struct EventArchive {
    storage: Storage,
}

impl EventArchive {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Object key for a record.
    pub fn key_for(record: &EventRecord) -> String {
        let day = DateTime::parse_from_rfc3339(&record.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
            .format("%Y-%m-%d");
        format!(
            "{ROOT}/{}/{day}/{}.json",
            segment(&record.account_id),
            segment(&record.job_id)
        )
    }

    /// Write a record and return its key.
    pub async fn store(&self, record: &EventRecord) -> Result<String, StorageError> {
        let key = Self::key_for(record);
        let value = serde_json::to_value(record)?;
        self.storage.write_json(&key, &value).await?;
        tracing::debug!(job_id = %record.job_id, key = %key, "Archived event");
        Ok(key)
    }

    pub async fn load(&self, key: &str) -> Result<EventRecord, StorageError> {
        let value = self.storage.read_json(key).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Every archived record of one account, oldest day first.
    pub async fn account_events(&self, account_id: &str) -> Result<Vec<EventRecord>, StorageError> {
        let prefix = format!("{ROOT}/{}", segment(account_id));
        let mut records = Vec::new();
        for key in self.storage.keys_under(&prefix).await? {
            records.push(self.load(&key).await?);
        }
        Ok(records)
    }
}

impl EventSink for EventArchive {
    async fn append(&self, record: &EventRecord) -> Result<(), String> {
        self.store(record).await.map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Make an identifier safe to use as a single path segment.
fn segment(raw: &str) -> String {
    if raw.is_empty() {
        return UNATTRIBUTED.to_string();
    }
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
