//! Per-check timer tasks

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::config::HealthCheck;
use super::runner::CheckRunner;

/// Default cap on the random start delay
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_secs(5);

/// Owns one timer task per active check
pub struct Scheduler {
    runner: Arc<CheckRunner>,
    tasks: DashMap<String, JoinHandle<()>>,
    max_jitter: Duration,
}

impl Scheduler {
    pub fn new(runner: Arc<CheckRunner>, max_jitter: Duration) -> Self {
        Self {
            runner,
            tasks: DashMap::new(),
            max_jitter,
        }
    }

    /// Start (or restart) the timer for `check`. Inactive checks are
    /// unscheduled instead.
    pub fn schedule(&self, check: &HealthCheck) {
        if !check.config.is_active {
            self.unschedule(&check.id);
            return;
        }

        let runner = Arc::clone(&self.runner);
        let check_id = check.id.clone();
        let every = check.config.interval;
        let jitter = self.jitter_for(every);

        let handle = tokio::spawn(async move {
            time::sleep(jitter).await;

            let mut ticker = time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                match runner.try_begin(&check_id) {
                    Some(guard) => {
                        let runner = Arc::clone(&runner);
                        let check_id = check_id.clone();
                        tokio::spawn(async move {
                            runner.run(&check_id, guard).await;
                        });
                    }
                    None => {
                        tracing::warn!(
                            check_id = %check_id,
                            "Previous probe still running, skipping tick"
                        );
                    }
                }
            }
        });

        if let Some(previous) = self.tasks.insert(check.id.clone(), handle) {
            previous.abort();
        }

        tracing::debug!(
            check_id = %check.id,
            interval_secs = every.as_secs(),
            jitter_ms = jitter.as_millis() as u64,
            "Check scheduled"
        );
    }

    /// Stop the check's timer. A probe already running is left to finish.
    pub fn unschedule(&self, check_id: &str) -> bool {
        match self.tasks.remove(check_id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::debug!(check_id, "Check unscheduled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, check_id: &str) -> bool {
        self.tasks.contains_key(check_id)
    }

    pub fn scheduled_count(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every timer
    pub fn shutdown(&self) {
        self.tasks.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    fn jitter_for(&self, interval: Duration) -> Duration {
        let cap = (interval / 10).min(self.max_jitter).as_millis() as u64;
        if cap == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
