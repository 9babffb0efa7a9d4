use super::LogStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Background worker that purges old delivery log rows
pub struct LogRetentionWorker {
    logs: Arc<dyn LogStore>,
    retention: Duration,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl LogRetentionWorker {
    pub fn new(logs: Arc<dyn LogStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            logs,
            retention,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                retention_secs = self.retention.as_secs(),
                "Log retention worker started with interval {:?}",
                self.interval
            );

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let purged = run_log_retention(self.logs.as_ref(), self.retention);
                if purged > 0 {
                    tracing::info!("Log retention worker purged {} rows", purged);
                }
            }

            tracing::info!("Log retention worker stopped");
        })
    }

    /// Stop after the current sweep
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Purge terminal rows older than `retention` once
pub fn run_log_retention(logs: &dyn LogStore, retention: Duration) -> usize {
    let retention = chrono::Duration::from_std(retention)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    match chrono::Utc::now().checked_sub_signed(retention) {
        Some(cutoff) => logs.purge_before(cutoff),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{
        ChannelConfig, DeliveryOutcome, Destination, Event, NotificationChannel, NotificationLog,
        Provider,
    };
    use crate::store::MemoryLogStore;

    fn finished_log(age: chrono::Duration, store: &MemoryLogStore) -> String {
        let channel = NotificationChannel::new(
            ChannelConfig::new("ops", Provider::Slack, Destination::webhook("https://example.com/x"))
                .with_event("*"),
        );
        let mut log = NotificationLog::pending(&channel, &Event::new("server.down", "down", "x"));
        log.created_at = chrono::Utc::now() - age;
        let id = log.id.clone();
        store.insert(log).unwrap();
        store.finalize(&id, DeliveryOutcome::success(1)).unwrap();
        id
    }

    #[test]
    fn test_run_log_retention() {
        let store = MemoryLogStore::new();
        let old = finished_log(chrono::Duration::days(40), &store);
        let recent = finished_log(chrono::Duration::days(1), &store);

        let purged = run_log_retention(&store, Duration::from_secs(30 * 24 * 3600));

        assert_eq!(purged, 1);
        assert!(store.get(&old).is_none());
        assert!(store.get(&recent).is_some());
    }

    #[tokio::test]
    async fn test_worker_start_stop() {
        let store = Arc::new(MemoryLogStore::new());
        finished_log(chrono::Duration::days(40), &store);

        let worker = Arc::new(LogRetentionWorker::new(
            store.clone(),
            Duration::from_secs(24 * 3600),
            Duration::from_millis(20),
        ));
        let handle = worker.clone().start();
        assert!(worker.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        worker.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(!worker.is_running());
    }
}
