//! Backlog Filter/Paginator.

use eventlog_core::{
    Envelope, EventLogError, EventLogResult, EventRecord, JobQueue, JobState, PageFilter,
    PageResult, QueuedJob,
};
use serde_json::Value;

use crate::config::MAX_PAGE_LIMIT;
use crate::resolve::SCAN_STATES;
use crate::store::{EventStore, queue_failure};

/// Page size used when the caller passes zero.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// ANDed predicates over a job's event envelope. Absent predicates always match.
///
/// The account is matched against both the direct and the nested encoding;
/// user and event type only against the nested sub-record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventFilter<'a> {
    pub account_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub event_type: Option<&'a str>,
}

impl<'a> EventFilter<'a> {
    pub fn for_account(account_id: &'a str) -> Self {
        Self {
            account_id: Some(account_id),
            ..Self::default()
        }
    }

    /// An empty user id counts as absent.
    pub fn with_user(mut self, user_id: Option<&'a str>) -> Self {
        self.user_id = present(user_id);
        self
    }

    /// An empty event type counts as absent.
    pub fn with_event_type(mut self, event_type: Option<&'a str>) -> Self {
        self.event_type = present(event_type);
        self
    }

    fn is_empty(&self) -> bool {
        self.account_id.is_none() && self.user_id.is_none() && self.event_type.is_none()
    }

    /// Whether job data passes every predicate. Data without an envelope only
    /// passes an empty filter.
    pub fn matches(&self, data: &Value) -> bool {
        let Some(envelope) = Envelope::from_data(data) else {
            return self.is_empty();
        };
        self.account_id.is_none_or(|a| envelope.matches_account(a))
            && self.user_id.is_none_or(|u| envelope.nested_user_id() == Some(u))
            && self
                .event_type
                .is_none_or(|t| envelope.nested_event_type() == Some(t))
    }
}

impl<'a> From<&'a PageFilter> for EventFilter<'a> {
    fn from(filter: &'a PageFilter) -> Self {
        Self {
            account_id: present(filter.account_id.as_deref()),
            user_id: present(filter.user_id.as_deref()),
            event_type: present(filter.event_type.as_deref()),
        }
    }
}

fn present(predicate: Option<&str>) -> Option<&str> {
    predicate.filter(|p| !p.is_empty())
}

fn in_window(filter: &PageFilter, job: &QueuedJob) -> bool {
    let enqueued = job.enqueued_at();
    filter.start_date.is_none_or(|start| enqueued >= start)
        && filter.end_date.is_none_or(|end| enqueued <= end)
}

/// Normalise caller paging: page 0 becomes 1, limit 0 the default, and the
/// limit is capped.
fn normalize_paging(page: usize, limit: usize) -> (usize, usize) {
    let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit };
    (page.max(1), limit.min(MAX_PAGE_LIMIT))
}

impl<Q: JobQueue> EventStore<Q> {
    /// Events of one account across completed, active and waiting jobs.
    pub async fn list(
        &self,
        account_id: &str,
        user_id: Option<&str>,
        event_type: Option<&str>,
    ) -> EventLogResult<Vec<EventRecord>> {
        if account_id.is_empty() {
            return Err(EventLogError::MissingField("accountId"));
        }
        let filter = EventFilter::for_account(account_id)
            .with_user(user_id)
            .with_event_type(event_type);

        let jobs = self
            .queue
            .get_jobs(&SCAN_STATES, None)
            .await
            .map_err(|e| queue_failure("list", None, e))?;

        let records: Vec<EventRecord> = jobs
            .iter()
            .filter(|job| filter.matches(&job.data))
            .filter_map(|job| {
                Envelope::from_data(&job.data)
                    .map(|env| env.to_record_for_account(job, &job.id, account_id))
            })
            .collect();

        tracing::info!(account_id, count = records.len(), "Listed account events");
        Ok(records)
    }

    /// One page of job snapshots, newest first unless a status is given.
    ///
    /// `total` is the whole backlog size, not the filtered count.
    pub async fn list_paged(
        &self,
        page: usize,
        limit: usize,
        filter: Option<PageFilter>,
    ) -> EventLogResult<PageResult> {
        let (page, limit) = normalize_paging(page, limit);
        let filter = filter.unwrap_or_default();
        let predicate = EventFilter::from(&filter);
        let start = (page - 1).saturating_mul(limit);
        let end = start.saturating_add(limit);

        let keep = |job: &QueuedJob| predicate.matches(&job.data) && in_window(&filter, job);

        let items: Vec<QueuedJob> = match filter.status {
            Some(status) => self
                .queue
                .get_jobs(&[status], Some(start..end))
                .await
                .map_err(|e| queue_failure("list_paged", None, e))?
                .into_iter()
                .filter(|job| keep(job))
                .collect(),
            None => {
                let mut jobs = self
                    .queue
                    .get_jobs(&JobState::ALL, None)
                    .await
                    .map_err(|e| queue_failure("list_paged", None, e))?;
                jobs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                jobs.into_iter()
                    .filter(|job| keep(job))
                    .skip(start)
                    .take(limit)
                    .collect()
            }
        };

        let total = self.stats().await?.total;
        tracing::debug!(page, limit, items = items.len(), total, "Listed backlog page");
        Ok(PageResult {
            items,
            total,
            page,
            limit,
        })
    }

    /// Paginated jobs of one account.
    pub async fn list_paged_for_account(
        &self,
        account_id: &str,
        page: usize,
        limit: usize,
    ) -> EventLogResult<PageResult> {
        if account_id.is_empty() {
            return Err(EventLogError::MissingField("accountId"));
        }
        self.list_paged(page, limit, Some(PageFilter::for_account(account_id)))
            .await
    }
}
