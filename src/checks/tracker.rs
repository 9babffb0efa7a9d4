//! Health state machine
//!
//! `unknown` before the first probe, then `healthy` after any success,
//! `degraded` while failures are below the down threshold and `down` once
//! they reach it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::config::{CheckConfig, CheckState, CheckStatus, HealthCheck};
use super::probe::{ProbeRecord, ProbeResult};
use crate::store::{CheckStore, StoreError};

/// Default number of consecutive failures that marks a check down
pub const DEFAULT_DOWN_THRESHOLD: u32 = 3;

/// Emitted once per status change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthChanged {
    pub check_id: String,
    pub check_name: String,
    pub target: String,
    pub old_status: CheckStatus,
    pub new_status: CheckStatus,
    pub consecutive_failures: u32,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Status for a failure count under `threshold`
pub fn status_for(consecutive_failures: u32, threshold: u32) -> CheckStatus {
    match consecutive_failures {
        0 => CheckStatus::Healthy,
        n if n < threshold.max(1) => CheckStatus::Degraded,
        _ => CheckStatus::Down,
    }
}

/// Next state after applying `result`
pub fn transition(
    state: &CheckState,
    result: &ProbeResult,
    threshold: u32,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> CheckState {
    let consecutive_failures = if result.success {
        0
    } else {
        state.consecutive_failures.saturating_add(1)
    };

    CheckState {
        status: status_for(consecutive_failures, threshold),
        consecutive_failures,
        last_check_at: Some(now),
        last_latency_ms: Some(result.latency_ms),
        last_error: result.error_message(),
        last_probe_started_at: Some(started_at),
    }
}

/// Applies probe results to stored check state
pub struct HealthTracker {
    store: Arc<dyn CheckStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    default_threshold: u32,
    history_limit: usize,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn CheckStore>, default_threshold: u32, history_limit: usize) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            default_threshold: default_threshold.max(1),
            history_limit,
        }
    }

    pub fn default_threshold(&self) -> u32 {
        self.default_threshold
    }

    /// Apply the result of a probe that started at `started_at`.
    ///
    /// Results for removed checks and results older than the last applied
    /// probe are dropped. Returns the transition if the status changed.
    pub fn apply(
        &self,
        check_id: &str,
        started_at: DateTime<Utc>,
        result: &ProbeResult,
    ) -> Option<HealthChanged> {
        let lock = Arc::clone(&self.locks.entry(check_id.to_string()).or_default());
        let _guard = lock.lock();

        let Some(check) = self.store.get(check_id) else {
            tracing::debug!(check_id, "Discarding result for removed check");
            return None;
        };

        if check
            .state
            .last_probe_started_at
            .is_some_and(|last| started_at < last)
        {
            tracing::debug!(check_id, "Discarding stale probe result");
            return None;
        }

        let threshold = check
            .config
            .failure_threshold
            .unwrap_or(self.default_threshold);
        let now = Utc::now();
        let next = transition(&check.state, result, threshold, started_at, now);
        let record = ProbeRecord::from_result(result, now);

        if let Err(e) = self
            .store
            .record_probe(check_id, next.clone(), record, self.history_limit)
        {
            tracing::debug!(check_id, error = %e, "Check removed while applying result");
            return None;
        }

        if next.status == check.state.status {
            return None;
        }

        tracing::info!(
            check_id,
            check = %check.config.name,
            old_status = %check.state.status,
            new_status = %next.status,
            consecutive_failures = next.consecutive_failures,
            "Health status changed"
        );

        Some(HealthChanged {
            check_id: check.id,
            check_name: check.config.name,
            target: check.config.target,
            old_status: check.state.status,
            new_status: next.status,
            consecutive_failures: next.consecutive_failures,
            error: next.last_error,
            timestamp: now,
        })
    }

    /// Replace a check's config and re-derive its status, since a new
    /// failure threshold can move a check between `degraded` and `down`
    /// without another probe.
    pub fn reconfigure(
        &self,
        check_id: &str,
        config: CheckConfig,
    ) -> Result<(HealthCheck, Option<HealthChanged>), StoreError> {
        let lock = Arc::clone(&self.locks.entry(check_id.to_string()).or_default());
        let _guard = lock.lock();

        let mut check = self.store.update_config(check_id, config)?;
        if check.state.status == CheckStatus::Unknown {
            return Ok((check, None));
        }

        let threshold = check
            .config
            .failure_threshold
            .unwrap_or(self.default_threshold);
        let old_status = check.state.status;
        let new_status = status_for(check.state.consecutive_failures, threshold);
        if new_status == old_status {
            return Ok((check, None));
        }

        check.state.status = new_status;
        self.store.update_state(check_id, check.state.clone())?;

        tracing::info!(
            check_id,
            check = %check.config.name,
            old_status = %old_status,
            new_status = %new_status,
            threshold,
            "Health status changed by threshold edit"
        );

        let change = HealthChanged {
            check_id: check.id.clone(),
            check_name: check.config.name.clone(),
            target: check.config.target.clone(),
            old_status,
            new_status,
            consecutive_failures: check.state.consecutive_failures,
            error: check.state.last_error.clone(),
            timestamp: Utc::now(),
        };
        Ok((check, Some(change)))
    }

    /// Drop per-check bookkeeping for a removed check
    pub fn forget(&self, check_id: &str) {
        self.locks.remove(check_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::config::{CheckConfig, CheckType, HealthCheck};
    use crate::checks::probe::{FailureKind, ProbeFailure};
    use crate::store::MemoryCheckStore;
    use std::time::Duration;

    fn failure() -> ProbeResult {
        ProbeResult::failed(
            ProbeFailure::new(FailureKind::UnexpectedStatus, "expected 200, got 500"),
            Duration::from_millis(12),
        )
        .with_status_code(500)
    }

    fn success() -> ProbeResult {
        ProbeResult::ok(Duration::from_millis(8)).with_status_code(200)
    }

    fn setup(config: CheckConfig) -> (HealthTracker, Arc<MemoryCheckStore>, String) {
        let store = Arc::new(MemoryCheckStore::new());
        let check = HealthCheck::new(config);
        let id = check.id.clone();
        store.insert(check).unwrap();
        let tracker = HealthTracker::new(store.clone(), DEFAULT_DOWN_THRESHOLD, 100);
        (tracker, store, id)
    }

    fn http_config() -> CheckConfig {
        CheckConfig::new("api", "https://api.example.com/health", CheckType::Http)
    }

    #[test]
    fn test_status_for() {
        assert_eq!(status_for(0, 3), CheckStatus::Healthy);
        assert_eq!(status_for(1, 3), CheckStatus::Degraded);
        assert_eq!(status_for(2, 3), CheckStatus::Degraded);
        assert_eq!(status_for(3, 3), CheckStatus::Down);
        assert_eq!(status_for(7, 3), CheckStatus::Down);
        assert_eq!(status_for(1, 1), CheckStatus::Down);
    }

    #[test]
    fn test_three_failures_go_down() {
        let (tracker, store, id) = setup(http_config());
        let mut statuses = vec![store.get(&id).unwrap().state.status];
        let mut changes = Vec::new();

        for _ in 0..3 {
            if let Some(change) = tracker.apply(&id, Utc::now(), &failure()) {
                changes.push(change);
            }
            statuses.push(store.get(&id).unwrap().state.status);
        }

        assert_eq!(
            statuses,
            vec![
                CheckStatus::Unknown,
                CheckStatus::Degraded,
                CheckStatus::Degraded,
                CheckStatus::Down
            ]
        );
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].old_status, CheckStatus::Unknown);
        assert_eq!(changes[0].new_status, CheckStatus::Degraded);
        assert_eq!(changes[1].new_status, CheckStatus::Down);
        assert_eq!(changes[1].consecutive_failures, 3);
        assert_eq!(
            changes[1].error.as_deref(),
            Some("unexpected_status: expected 200, got 500")
        );
    }

    #[test]
    fn test_success_resets_failures() {
        let (tracker, store, id) = setup(http_config());
        tracker.apply(&id, Utc::now(), &failure());
        tracker.apply(&id, Utc::now(), &failure());

        let change = tracker.apply(&id, Utc::now(), &success()).unwrap();
        assert_eq!(change.old_status, CheckStatus::Degraded);
        assert_eq!(change.new_status, CheckStatus::Healthy);

        let state = store.get(&id).unwrap().state;
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());
        assert!(state.last_check_at.is_some());

        // Healthy again, no new transition
        assert!(tracker.apply(&id, Utc::now(), &success()).is_none());
    }

    #[test]
    fn test_per_check_threshold() {
        let (tracker, store, id) = setup(http_config().with_failure_threshold(1));
        let change = tracker.apply(&id, Utc::now(), &failure()).unwrap();
        assert_eq!(change.new_status, CheckStatus::Down);
        assert_eq!(store.get(&id).unwrap().state.consecutive_failures, 1);
    }

    #[test]
    fn test_stale_result_is_discarded() {
        let (tracker, store, id) = setup(http_config());
        let newer = Utc::now();
        let older = newer - chrono::Duration::seconds(5);

        tracker.apply(&id, newer, &success());
        assert!(tracker.apply(&id, older, &failure()).is_none());

        let state = store.get(&id).unwrap().state;
        assert_eq!(state.status, CheckStatus::Healthy);
        assert_eq!(store.history(&id, 10).len(), 1);
    }

    #[test]
    fn test_result_for_deleted_check_is_discarded() {
        let (tracker, store, id) = setup(http_config());
        store.remove(&id);
        tracker.forget(&id);

        assert!(tracker.apply(&id, Utc::now(), &failure()).is_none());
        assert!(store.get(&id).is_none());
    }

    #[test]
    fn test_history_recorded() {
        let (tracker, store, id) = setup(http_config());
        tracker.apply(&id, Utc::now(), &success());
        tracker.apply(&id, Utc::now(), &failure());

        let history = store.history(&id, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status_code, Some(500));
        assert_eq!(history[1].status_code, Some(200));
    }

    #[test]
    fn test_threshold_edit_rederives_status() {
        let (tracker, store, id) = setup(http_config());
        tracker.apply(&id, Utc::now(), &failure());
        tracker.apply(&id, Utc::now(), &failure());
        assert_eq!(store.get(&id).unwrap().state.status, CheckStatus::Degraded);

        let (check, change) = tracker
            .reconfigure(&id, http_config().with_failure_threshold(2))
            .unwrap();
        assert_eq!(check.state.status, CheckStatus::Down);
        assert_eq!(store.get(&id).unwrap().state.status, CheckStatus::Down);
        let change = change.unwrap();
        assert_eq!(change.old_status, CheckStatus::Degraded);
        assert_eq!(change.new_status, CheckStatus::Down);
        assert_eq!(change.consecutive_failures, 2);

        // Raising it again moves the check back without a new probe
        let (check, change) = tracker
            .reconfigure(&id, http_config().with_failure_threshold(5))
            .unwrap();
        assert_eq!(check.state.status, CheckStatus::Degraded);
        assert_eq!(change.unwrap().new_status, CheckStatus::Degraded);
        assert_eq!(store.history(&id, 10).len(), 2);
    }

    #[test]
    fn test_config_edit_without_status_change() {
        let (tracker, store, id) = setup(http_config());
        let (check, change) = tracker
            .reconfigure(&id, http_config().with_failure_threshold(1))
            .unwrap();
        assert_eq!(check.state.status, CheckStatus::Unknown);
        assert!(change.is_none());

        tracker.apply(&id, Utc::now(), &success());
        let (_, change) = tracker
            .reconfigure(&id, http_config().with_expected_status(204))
            .unwrap();
        assert!(change.is_none());
        assert_eq!(store.get(&id).unwrap().config.expected_status, 204);

        assert!(matches!(
            tracker.reconfigure("nope", http_config()),
            Err(StoreError::CheckNotFound(_))
        ));
    }
}
