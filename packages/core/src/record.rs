//! Analytics event records and the envelope they travel in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::job::{QueuedJob, millis_to_datetime};

/// Open, producer-owned event payload.
pub type Payload = Map<String, Value>;

/// Fields a payload must carry as strings to pass the structural check.
pub const MINIMUM_EVENT_FIELDS: [&str; 5] =
    ["userId", "sessionId", "timestamp", "location", "eventType"];

/// The logical analytics event, independent of its queue representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub job_id: String,
    /// Empty when no encoding carried an account id.
    pub account_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// ISO-8601.
    pub created_at: String,
    pub payload: Value,
}

impl EventRecord {
    /// Whether the payload carries every field of [`MINIMUM_EVENT_FIELDS`] as a string.
    pub fn has_minimum_fields(&self) -> bool {
        has_minimum_event_fields(&self.payload)
    }
}

/// Acknowledgment returned once an event is durably queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRecord {
    pub job_id: String,
    pub account_id: String,
    pub created_at: String,
}

/// Structural "looks like an event" check.
pub fn has_minimum_event_fields(payload: &Value) -> bool {
    let Some(map) = payload.as_object() else {
        return false;
    };
    MINIMUM_EVENT_FIELDS
        .iter()
        .all(|field| map.get(*field).is_some_and(Value::is_string))
}

/// Borrowed view over a job's data in the envelope shape:
///
/// ```text
/// { "jobId": "...",
///   "body": { "accountId": "...", "createdAt": "...", "payload": {...},
///             "body": { "accountId": "...", "userId": "...", "eventType": "..." } } }
/// ```
///
/// Every part is optional; legacy producers wrote subsets of it.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    data: &'a Value,
    body: &'a Map<String, Value>,
}

impl<'a> Envelope<'a> {
    /// Returns `None` when the data has no `body` object.
    pub fn from_data(data: &'a Value) -> Option<Self> {
        let body = data.get("body")?.as_object()?;
        Some(Self { data, body })
    }

    /// Build the data stored for a freshly enqueued event.
    pub fn build(
        job_id: &str,
        account_id: &str,
        created_at: &str,
        payload: Payload,
    ) -> Value {
        let mut nested = Map::new();
        nested.insert("accountId".into(), Value::String(account_id.to_string()));
        for field in ["userId", "eventType"] {
            if let Some(value) = payload.get(field).and_then(Value::as_str) {
                nested.insert(field.into(), Value::String(value.to_string()));
            }
        }

        let mut body = Map::new();
        body.insert("accountId".into(), Value::String(account_id.to_string()));
        body.insert("createdAt".into(), Value::String(created_at.to_string()));
        body.insert("payload".into(), Value::Object(payload));
        body.insert("body".into(), Value::Object(nested));

        let mut data = Map::new();
        data.insert("jobId".into(), Value::String(job_id.to_string()));
        data.insert("body".into(), Value::Object(body));
        Value::Object(data)
    }

    /// The `jobId` embedded by the producer, if any.
    pub fn embedded_job_id(&self) -> Option<&'a str> {
        embedded_job_id(self.data)
    }

    fn nested(&self) -> Option<&'a Map<String, Value>> {
        self.body.get("body").and_then(Value::as_object)
    }

    fn body_str(&self, field: &str) -> Option<&'a str> {
        self.body.get(field).and_then(Value::as_str)
    }

    fn nested_str(&self, field: &str) -> Option<&'a str> {
        self.nested()
            .and_then(|n| n.get(field))
            .and_then(Value::as_str)
    }

    /// Direct account id, else the nested one. Empty strings count as absent.
    pub fn account_id(&self) -> Option<&'a str> {
        non_empty(self.body_str("accountId")).or_else(|| non_empty(self.nested_str("accountId")))
    }

    /// Whether either account encoding equals `account_id`.
    pub fn matches_account(&self, account_id: &str) -> bool {
        self.matched_account(account_id).is_some()
    }

    /// The encoding that equals `account_id`, direct first. Legacy data may
    /// carry two different account ids; this picks the one that matched.
    pub fn matched_account(&self, account_id: &str) -> Option<&'a str> {
        [self.body_str("accountId"), self.nested_str("accountId")]
            .into_iter()
            .flatten()
            .find(|candidate| *candidate == account_id)
    }

    /// [`Envelope::to_record`] reporting the account encoding that equals
    /// `account_id`, for callers that selected the job by account.
    pub fn to_record_for_account(
        &self,
        job: &QueuedJob,
        fallback_id: &str,
        account_id: &str,
    ) -> EventRecord {
        let mut record = self.to_record(job, fallback_id);
        if let Some(matched) = self.matched_account(account_id) {
            record.account_id = matched.to_string();
        }
        record
    }

    /// `userId` from the nested sub-record only.
    pub fn nested_user_id(&self) -> Option<&'a str> {
        self.nested_str("userId")
    }

    /// `eventType` from the nested sub-record only.
    pub fn nested_event_type(&self) -> Option<&'a str> {
        self.nested_str("eventType")
    }

    pub fn created_at(&self) -> Option<&'a str> {
        non_empty(self.body_str("createdAt"))
    }

    /// `body.payload`, else the whole body.
    pub fn payload(&self) -> Value {
        match self.body.get("payload") {
            Some(payload) if !payload.is_null() => payload.clone(),
            _ => Value::Object(self.body.clone()),
        }
    }

    /// Rebuild the logical record from a job that carries this envelope.
    ///
    /// `fallback_id` is used when the producer embedded no `jobId`.
    pub fn to_record(&self, job: &QueuedJob, fallback_id: &str) -> EventRecord {
        let payload = self.payload();
        let payload_str = |field: &str| payload.get(field).and_then(Value::as_str);

        let user_id = self
            .nested_user_id()
            .or_else(|| payload_str("userId"))
            .map(str::to_string);
        let event_type = self
            .nested_event_type()
            .or_else(|| payload_str("eventType"))
            .map(str::to_string);

        EventRecord {
            job_id: non_empty(self.embedded_job_id())
                .unwrap_or(fallback_id)
                .to_string(),
            account_id: self.account_id().unwrap_or_default().to_string(),
            user_id,
            event_type,
            created_at: self
                .created_at()
                .map(str::to_string)
                .unwrap_or_else(|| iso_timestamp(job.timestamp)),
            payload,
        }
    }
}

/// The `jobId` field of arbitrary job data.
pub fn embedded_job_id(data: &Value) -> Option<&str> {
    data.get("jobId").and_then(Value::as_str)
}

/// Epoch millis formatted as ISO-8601 with millisecond precision.
pub fn iso_timestamp(millis: i64) -> String {
    millis_to_datetime(millis).to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}
