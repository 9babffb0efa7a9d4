//! Executes one probe for one check and feeds the tracker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};

use super::config::{CheckConfig, HealthCheck};
use super::probe::{ProbeResult, Prober};
use super::tracker::{HealthChanged, HealthTracker};
use crate::store::{CheckStore, StoreError};

/// Marks a check as having a probe in flight until dropped
#[derive(Debug)]
pub struct InFlightGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Runs probes with a per-check in-flight guard and a global concurrency cap
pub struct CheckRunner {
    store: Arc<dyn CheckStore>,
    prober: Arc<dyn Prober>,
    tracker: Arc<HealthTracker>,
    changes: mpsc::UnboundedSender<HealthChanged>,
    permits: Arc<Semaphore>,
    in_flight: DashMap<String, Arc<AtomicBool>>,
    /// Changes are forwarded only while set; otherwise they are dropped
    publishing: AtomicBool,
}

impl CheckRunner {
    pub fn new(
        store: Arc<dyn CheckStore>,
        prober: Arc<dyn Prober>,
        tracker: Arc<HealthTracker>,
        changes: mpsc::UnboundedSender<HealthChanged>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            prober,
            tracker,
            changes,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: DashMap::new(),
            publishing: AtomicBool::new(true),
        }
    }

    pub fn set_publishing(&self, publishing: bool) {
        self.publishing.store(publishing, Ordering::Release);
    }

    /// Claim the check's in-flight slot, or `None` if a probe is running
    pub fn try_begin(&self, check_id: &str) -> Option<InFlightGuard> {
        let flag = Arc::clone(&self.in_flight.entry(check_id.to_string()).or_default());
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard { flag })
    }

    pub fn is_running(&self, check_id: &str) -> bool {
        self.in_flight
            .get(check_id)
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Probe the check once and apply the result.
    ///
    /// Returns `None` if the check no longer exists.
    pub async fn run(&self, check_id: &str, guard: InFlightGuard) -> Option<ProbeResult> {
        let check = self.store.get(check_id)?;

        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(check_id, "Probe semaphore closed");
                return None;
            }
        };

        let started_at = Utc::now();
        let result = self.prober.probe(&check.config).await;

        tracing::debug!(
            check_id,
            check_type = %check.config.check_type,
            success = result.success,
            latency_ms = result.latency_ms,
            "Probe finished"
        );

        if let Some(change) = self.tracker.apply(check_id, started_at, &result) {
            self.publish(change);
        }

        drop(guard);
        Some(result)
    }

    /// Replace a check's config and publish any status change it causes
    pub fn reconfigure(
        &self,
        check_id: &str,
        config: CheckConfig,
    ) -> Result<HealthCheck, StoreError> {
        let (check, change) = self.tracker.reconfigure(check_id, config)?;
        if let Some(change) = change {
            self.publish(change);
        }
        Ok(check)
    }

    fn publish(&self, change: HealthChanged) {
        if !self.publishing.load(Ordering::Acquire) {
            tracing::debug!(check_id = %change.check_id, "Not publishing, dropping health change");
            return;
        }
        if self.changes.send(change).is_err() {
            tracing::debug!("No listener for health changes");
        }
    }

    /// Drop bookkeeping for a removed check
    pub fn forget(&self, check_id: &str) {
        self.in_flight.remove(check_id);
        self.tracker.forget(check_id);
    }
}
