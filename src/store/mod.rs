//! Repository interfaces for checks, channels and the delivery log
//!
//! Components receive these as `Arc<dyn ...>` so tests and alternative
//! backends can swap them. In-memory implementations live in [`memory`].

pub mod memory;
pub mod retention;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::checks::{CheckConfig, CheckState, HealthCheck, ProbeRecord};
use crate::notify::{
    DeliveryOutcome, LogStatus, NotificationChannel, NotificationLog, Provider,
};

pub use memory::{MemoryChannelStore, MemoryCheckStore, MemoryLogStore};
pub use retention::{run_log_retention, LogRetentionWorker};

/// Health check persistence
pub trait CheckStore: Send + Sync {
    fn insert(&self, check: HealthCheck) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Option<HealthCheck>;

    fn list(&self) -> Vec<HealthCheck>;

    /// Replace the user-owned config, leaving state untouched
    fn update_config(&self, id: &str, config: CheckConfig) -> Result<HealthCheck, StoreError>;

    /// Replace tracker state without recording a probe
    fn update_state(&self, id: &str, state: CheckState) -> Result<(), StoreError>;

    /// Store new tracker state and append `record` to the check's history,
    /// keeping at most `history_limit` records
    fn record_probe(
        &self,
        id: &str,
        state: CheckState,
        record: ProbeRecord,
        history_limit: usize,
    ) -> Result<(), StoreError>;

    /// Most recent probe records, newest first
    fn history(&self, id: &str, limit: usize) -> Vec<ProbeRecord>;

    /// Remove the check and its history
    fn remove(&self, id: &str) -> Option<HealthCheck>;
}

/// Notification channel persistence
pub trait ChannelStore: Send + Sync {
    /// Insert a channel; names are unique
    fn insert(&self, channel: NotificationChannel) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Option<NotificationChannel>;

    fn list(&self) -> Vec<NotificationChannel>;

    fn update(&self, channel: NotificationChannel) -> Result<(), StoreError>;

    fn remove(&self, id: &str) -> Option<NotificationChannel>;

    /// Flip `enabled` and return the updated channel
    fn toggle(&self, id: &str) -> Result<NotificationChannel, StoreError>;

    /// Enabled channels subscribed to `event_type`
    fn subscribers(&self, event_type: &str) -> Vec<NotificationChannel>;
}

/// Append-only delivery log
pub trait LogStore: Send + Sync {
    fn insert(&self, log: NotificationLog) -> Result<(), StoreError>;

    fn get(&self, id: &str) -> Option<NotificationLog>;

    /// Move a pending row to its terminal status. Fails if the row has
    /// already left `pending`.
    fn finalize(&self, id: &str, outcome: DeliveryOutcome) -> Result<NotificationLog, StoreError>;

    /// Filtered rows, newest first
    fn query(&self, filter: &LogFilter, page: PageRequest) -> Page<NotificationLog>;

    fn stats(&self) -> LogStats;

    /// Delete terminal rows created before `cutoff`
    fn purge_before(&self, cutoff: DateTime<Utc>) -> usize;
}

/// Storage errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("health check '{0}' not found")]
    CheckNotFound(String),

    #[error("notification channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("notification log '{0}' not found")]
    LogNotFound(String),

    #[error("channel name '{0}' is already in use")]
    DuplicateName(String),

    #[error("record '{0}' already exists")]
    DuplicateId(String),

    #[error("notification log '{id}' is already {status}")]
    LogFinalized { id: String, status: LogStatus },
}

/// Delivery log filter; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub provider: Option<Provider>,
    pub channel_id: Option<String>,
    pub status: Option<LogStatus>,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive match on subject or message
    pub search: Option<String>,
}

impl LogFilter {
    pub fn matches(&self, log: &NotificationLog) -> bool {
        if self.provider.is_some_and(|p| p != log.provider) {
            return false;
        }
        if self.channel_id.as_ref().is_some_and(|c| *c != log.channel_id) {
            return false;
        }
        if self.status.is_some_and(|s| s != log.status) {
            return false;
        }
        if self.event_type.as_ref().is_some_and(|e| *e != log.event_type) {
            return false;
        }
        if self.from.is_some_and(|from| log.created_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| log.created_at > to) {
            return false;
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let hit = log.payload.subject.to_lowercase().contains(&needle)
                || log.payload.message.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        true
    }
}

pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 100;

/// 1-based page selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub per_page: usize,
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PER_PAGE)
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    /// Slice an already-filtered, already-sorted list
    pub fn paginate(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.per_page)
            .collect();

        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
            total_pages: total.div_ceil(request.per_page),
        }
    }
}

/// Counts per delivery status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    pub total: usize,
    pub pending: usize,
    pub success: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let request = PageRequest::new(0, 1000);
        assert_eq!(request.page, 1);
        assert_eq!(request.per_page, MAX_PER_PAGE);
    }

    #[test]
    fn test_paginate() {
        let page = Page::paginate((1..=45).collect::<Vec<_>>(), PageRequest::new(3, 20));
        assert_eq!(page.items, (41..=45).collect::<Vec<_>>());
        assert_eq!(page.total, 45);
        assert_eq!(page.total_pages, 3);

        let beyond = Page::paginate(vec![1, 2, 3], PageRequest::new(5, 20));
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total_pages, 1);
    }

    #[test]
    fn test_paginate_huge_page_number() {
        let request = PageRequest::new(usize::MAX, MAX_PER_PAGE);
        assert_eq!(request.offset(), usize::MAX);

        let page = Page::paginate((1..=5).collect::<Vec<_>>(), request);
        assert!(page.items.is_empty());
        assert_eq!(page.total, 5);
        assert_eq!(page.page, usize::MAX);
    }
}
