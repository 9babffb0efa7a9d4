use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{
    ChannelStore, CheckStore, LogFilter, LogStats, LogStore, Page, PageRequest, StoreError,
};
use crate::checks::{CheckConfig, CheckState, HealthCheck, ProbeRecord};
use crate::notify::{DeliveryOutcome, LogStatus, NotificationChannel, NotificationLog};

struct CheckEntry {
    check: HealthCheck,
    /// Newest at the front
    history: VecDeque<ProbeRecord>,
}

/// In-memory health check store
#[derive(Default)]
pub struct MemoryCheckStore {
    checks: DashMap<String, CheckEntry>,
}

impl MemoryCheckStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckStore for MemoryCheckStore {
    fn insert(&self, check: HealthCheck) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.checks.entry(check.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(check.id)),
            Entry::Vacant(slot) => {
                slot.insert(CheckEntry {
                    check,
                    history: VecDeque::new(),
                });
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Option<HealthCheck> {
        self.checks.get(id).map(|entry| entry.check.clone())
    }

    fn list(&self) -> Vec<HealthCheck> {
        let mut checks: Vec<HealthCheck> =
            self.checks.iter().map(|entry| entry.check.clone()).collect();
        checks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        checks
    }

    fn update_config(&self, id: &str, config: CheckConfig) -> Result<HealthCheck, StoreError> {
        let mut entry = self
            .checks
            .get_mut(id)
            .ok_or_else(|| StoreError::CheckNotFound(id.to_string()))?;
        entry.check.config = config;
        Ok(entry.check.clone())
    }

    fn update_state(&self, id: &str, state: CheckState) -> Result<(), StoreError> {
        let mut entry = self
            .checks
            .get_mut(id)
            .ok_or_else(|| StoreError::CheckNotFound(id.to_string()))?;
        entry.check.state = state;
        Ok(())
    }

    fn record_probe(
        &self,
        id: &str,
        state: CheckState,
        record: ProbeRecord,
        history_limit: usize,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .checks
            .get_mut(id)
            .ok_or_else(|| StoreError::CheckNotFound(id.to_string()))?;

        entry.check.state = state;
        if history_limit > 0 {
            entry.history.push_front(record);
            entry.history.truncate(history_limit);
        }
        Ok(())
    }

    fn history(&self, id: &str, limit: usize) -> Vec<ProbeRecord> {
        self.checks
            .get(id)
            .map(|entry| entry.history.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn remove(&self, id: &str) -> Option<HealthCheck> {
        self.checks.remove(id).map(|(_, entry)| entry.check)
    }
}

/// In-memory channel store.
///
/// A single lock keeps the unique-name check and the write atomic.
#[derive(Default)]
pub struct MemoryChannelStore {
    channels: RwLock<HashMap<String, NotificationChannel>>,
}

impl MemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn name_taken(
    channels: &HashMap<String, NotificationChannel>,
    name: &str,
    except_id: Option<&str>,
) -> bool {
    channels.values().any(|c| {
        Some(c.id.as_str()) != except_id && c.config.name.eq_ignore_ascii_case(name.trim())
    })
}

impl ChannelStore for MemoryChannelStore {
    fn insert(&self, channel: NotificationChannel) -> Result<(), StoreError> {
        let mut channels = self.channels.write();
        if channels.contains_key(&channel.id) {
            return Err(StoreError::DuplicateId(channel.id));
        }
        if name_taken(&channels, &channel.config.name, None) {
            return Err(StoreError::DuplicateName(channel.config.name));
        }
        channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    fn get(&self, id: &str) -> Option<NotificationChannel> {
        self.channels.read().get(id).cloned()
    }

    fn list(&self) -> Vec<NotificationChannel> {
        let mut channels: Vec<_> = self.channels.read().values().cloned().collect();
        channels.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        channels
    }

    fn update(&self, channel: NotificationChannel) -> Result<(), StoreError> {
        let mut channels = self.channels.write();
        if !channels.contains_key(&channel.id) {
            return Err(StoreError::ChannelNotFound(channel.id));
        }
        if name_taken(&channels, &channel.config.name, Some(&channel.id)) {
            return Err(StoreError::DuplicateName(channel.config.name));
        }
        channels.insert(channel.id.clone(), channel);
        Ok(())
    }

    fn remove(&self, id: &str) -> Option<NotificationChannel> {
        self.channels.write().remove(id)
    }

    fn toggle(&self, id: &str) -> Result<NotificationChannel, StoreError> {
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(id)
            .ok_or_else(|| StoreError::ChannelNotFound(id.to_string()))?;
        channel.config.enabled = !channel.config.enabled;
        Ok(channel.clone())
    }

    fn subscribers(&self, event_type: &str) -> Vec<NotificationChannel> {
        self.channels
            .read()
            .values()
            .filter(|c| c.accepts(event_type))
            .cloned()
            .collect()
    }
}

/// In-memory delivery log
#[derive(Default)]
pub struct MemoryLogStore {
    logs: DashMap<String, NotificationLog>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl LogStore for MemoryLogStore {
    fn insert(&self, log: NotificationLog) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.logs.entry(log.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateId(log.id)),
            Entry::Vacant(slot) => {
                slot.insert(log);
                Ok(())
            }
        }
    }

    fn get(&self, id: &str) -> Option<NotificationLog> {
        self.logs.get(id).map(|log| log.clone())
    }

    fn finalize(&self, id: &str, outcome: DeliveryOutcome) -> Result<NotificationLog, StoreError> {
        let mut log = self
            .logs
            .get_mut(id)
            .ok_or_else(|| StoreError::LogNotFound(id.to_string()))?;

        if log.status.is_terminal() {
            return Err(StoreError::LogFinalized {
                id: id.to_string(),
                status: log.status,
            });
        }

        log.status = outcome.status;
        log.error_message = outcome.error_message;
        log.attempts = outcome.attempts;
        log.completed_at = Some(Utc::now());
        Ok(log.clone())
    }

    fn query(&self, filter: &LogFilter, page: PageRequest) -> Page<NotificationLog> {
        let mut matching: Vec<NotificationLog> = self
            .logs
            .iter()
            .filter(|log| filter.matches(log))
            .map(|log| log.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        Page::paginate(matching, page)
    }

    fn stats(&self) -> LogStats {
        let mut stats = LogStats::default();
        for log in self.logs.iter() {
            stats.total += 1;
            match log.status {
                LogStatus::Pending => stats.pending += 1,
                LogStatus::Success => stats.success += 1,
                LogStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.logs.len();
        self.logs
            .retain(|_, log| !(log.status.is_terminal() && log.created_at < cutoff));
        before.saturating_sub(self.logs.len())
    }
}
