//! Monitor facade: wires stores, probes, scheduler and dispatcher together
//! and exposes the read model and commands used by the HTTP API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::checks::{
    CheckConfig, CheckRunner, HealthChanged, HealthCheck, HealthTracker, NetworkProber,
    ProbeRecord, ProbeResult, Prober, ProberError, Scheduler, DEFAULT_DOWN_THRESHOLD,
    DEFAULT_MAX_JITTER, DEFAULT_SSL_EXPIRY_DAYS,
};
use crate::notify::{
    ChannelConfig, Destination, DispatchError, Dispatcher, Event, LogStatus, NotificationChannel,
    NotificationLog, ProviderRegistry, ProviderSettings, RetryPolicy,
};
use crate::store::{
    ChannelStore, CheckStore, LogFilter, LogRetentionWorker, LogStats, LogStore,
    MemoryChannelStore, MemoryCheckStore, MemoryLogStore, Page, PageRequest, StoreError,
};
use crate::validation::ValidationError;

/// Placeholder returned in place of webhook secrets
const REDACTED: &str = "***";

/// Engine configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Consecutive failures that mark a check down
    pub down_threshold: u32,
    /// Certificates expiring within this many days fail ssl checks
    pub ssl_expiry_days: i64,
    /// Probe records kept per check
    pub history_limit: usize,
    pub max_concurrent_probes: usize,
    pub max_jitter: Duration,
    pub retry: RetryPolicy,
    /// Age after which finished log rows are purged; zero disables
    pub log_retention: Duration,
    pub retention_sweep_interval: Duration,
    pub providers: ProviderSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            down_threshold: DEFAULT_DOWN_THRESHOLD,
            ssl_expiry_days: DEFAULT_SSL_EXPIRY_DAYS,
            history_limit: 100,
            max_concurrent_probes: 8 * num_cpus::get(),
            max_jitter: DEFAULT_MAX_JITTER,
            retry: RetryPolicy::default(),
            log_retention: Duration::from_secs(30 * 24 * 3600),
            retention_sweep_interval: Duration::from_secs(3600),
            providers: ProviderSettings::default(),
        }
    }
}

impl MonitorConfig {
    pub fn with_down_threshold(mut self, threshold: u32) -> Self {
        self.down_threshold = threshold;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_log_retention(mut self, retention: Duration) -> Self {
        self.log_retention = retention;
        self
    }

    pub fn with_providers(mut self, providers: ProviderSettings) -> Self {
        self.providers = providers;
        self
    }
}

/// Repositories used by the engine
#[derive(Clone)]
pub struct Stores {
    pub checks: Arc<dyn CheckStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub logs: Arc<dyn LogStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            checks: Arc::new(MemoryCheckStore::new()),
            channels: Arc::new(MemoryChannelStore::new()),
            logs: Arc::new(MemoryLogStore::new()),
        }
    }
}

/// Errors returned by monitor commands
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("health check '{0}' not found")]
    CheckNotFound(String),

    #[error("notification channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("notification log '{0}' not found")]
    LogNotFound(String),

    #[error("a probe for health check '{0}' is already running")]
    CheckBusy(String),

    #[error("notification log '{id}' is {status}; only failed notifications can be retried")]
    NotRetryable { id: String, status: LogStatus },

    #[error("storage error: {0}")]
    Store(StoreError),

    #[error("prober setup failed: {0}")]
    Prober(#[from] ProberError),
}

impl From<StoreError> for MonitorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CheckNotFound(id) => MonitorError::CheckNotFound(id),
            StoreError::ChannelNotFound(id) => MonitorError::ChannelNotFound(id),
            StoreError::LogNotFound(id) => MonitorError::LogNotFound(id),
            StoreError::DuplicateName(name) => {
                MonitorError::Validation(ValidationError::DuplicateName(name))
            }
            other => MonitorError::Store(other),
        }
    }
}

impl From<DispatchError> for MonitorError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::LogNotFound(id) => MonitorError::LogNotFound(id),
            DispatchError::ChannelNotFound(id) => MonitorError::ChannelNotFound(id),
            DispatchError::NotRetryable { id, status } => MonitorError::NotRetryable { id, status },
            DispatchError::Store(e) => e.into(),
        }
    }
}

/// One ordered delivery queue per check, so a check's notifications go out
/// in transition order
#[derive(Default)]
struct ChangeQueues {
    queues: DashMap<String, mpsc::UnboundedSender<Event>>,
}

impl ChangeQueues {
    fn push(&self, dispatcher: &Dispatcher, change: &HealthChanged) {
        let queue = self
            .queues
            .entry(change.check_id.clone())
            .or_insert_with(|| spawn_change_queue(dispatcher.clone(), &change.check_id))
            .clone();

        for event in Event::from_health_change(change) {
            if queue.send(event).is_err() {
                tracing::warn!(
                    check_id = %change.check_id,
                    "Notification queue closed, dropping event"
                );
            }
        }
    }

    /// Stop accepting events for `check_id`; queued ones are still delivered
    fn close(&self, check_id: &str) {
        self.queues.remove(check_id);
    }

    fn clear(&self) {
        self.queues.clear();
    }
}

fn spawn_change_queue(dispatcher: Dispatcher, check_id: &str) -> mpsc::UnboundedSender<Event> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let check_id = check_id.to_string();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatcher.dispatch(&event).await;
        }
        tracing::debug!(check_id = %check_id, "Notification queue drained");
    });
    tx
}

struct RetentionHandle {
    worker: Arc<LogRetentionWorker>,
    task: JoinHandle<()>,
}

/// The health-check and notification engine
pub struct Monitor {
    config: MonitorConfig,
    stores: Stores,
    runner: Arc<CheckRunner>,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    started: AtomicBool,
    changes: Mutex<Option<mpsc::UnboundedReceiver<HealthChanged>>>,
    queues: Arc<ChangeQueues>,
    pump: Mutex<Option<JoinHandle<()>>>,
    retention: Mutex<Option<RetentionHandle>>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        stores: Stores,
        prober: Arc<dyn Prober>,
        registry: ProviderRegistry,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let tracker = Arc::new(HealthTracker::new(
            Arc::clone(&stores.checks),
            config.down_threshold,
            config.history_limit,
        ));
        let runner = Arc::new(CheckRunner::new(
            Arc::clone(&stores.checks),
            prober,
            tracker,
            tx,
            config.max_concurrent_probes,
        ));
        // Transitions before start() are not announced
        runner.set_publishing(false);
        let scheduler = Scheduler::new(Arc::clone(&runner), config.max_jitter);
        let dispatcher = Dispatcher::new(
            Arc::clone(&stores.channels),
            Arc::clone(&stores.logs),
            Arc::new(registry),
            config.retry,
        );

        Self {
            config,
            stores,
            runner,
            scheduler,
            dispatcher,
            started: AtomicBool::new(false),
            changes: Mutex::new(Some(rx)),
            queues: Arc::new(ChangeQueues::default()),
            pump: Mutex::new(None),
            retention: Mutex::new(None),
        }
    }

    /// Monitor using the network prober and the built-in provider adapters
    pub fn with_network(config: MonitorConfig, stores: Stores) -> Result<Self, MonitorError> {
        let prober = NetworkProber::new(config.ssl_expiry_days)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("healthwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ProberError::from)?;
        let registry = ProviderRegistry::with_defaults(client, &config.providers);

        Ok(Self::new(config, stores, Arc::new(prober), registry))
    }

    pub fn in_memory(config: MonitorConfig) -> Result<Self, MonitorError> {
        Self::with_network(config, Stores::in_memory())
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Schedule every active check and start background tasks
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(mut rx) = self.changes.lock().take() {
            let dispatcher = self.dispatcher.clone();
            let queues = Arc::clone(&self.queues);
            let pump = tokio::spawn(async move {
                while let Some(change) = rx.recv().await {
                    queues.push(&dispatcher, &change);
                }
            });
            *self.pump.lock() = Some(pump);
            self.runner.set_publishing(true);
        }

        if !self.config.log_retention.is_zero() {
            let worker = Arc::new(LogRetentionWorker::new(
                Arc::clone(&self.stores.logs),
                self.config.log_retention,
                self.config.retention_sweep_interval,
            ));
            let task = Arc::clone(&worker).start();
            *self.retention.lock() = Some(RetentionHandle { worker, task });
        }

        let checks = self.stores.checks.list();
        for check in &checks {
            self.scheduler.schedule(check);
        }

        tracing::info!(
            checks = checks.len(),
            scheduled = self.scheduler.scheduled_count(),
            "Monitor started"
        );
    }

    /// Stop timers and background tasks. Probes already running finish on
    /// their own.
    pub fn shutdown(&self) {
        self.runner.set_publishing(false);
        self.scheduler.shutdown();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        if let Some(retention) = self.retention.lock().take() {
            retention.worker.stop();
            retention.task.abort();
        }
        self.queues.clear();
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("Monitor stopped");
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Health checks
    // ========================================================================

    pub fn create_health_check(&self, config: CheckConfig) -> Result<HealthCheck, MonitorError> {
        config.validate()?;

        let check = HealthCheck::new(config);
        self.stores.checks.insert(check.clone())?;
        if self.is_started() {
            self.scheduler.schedule(&check);
        }

        tracing::info!(check_id = %check.id, name = %check.config.name, "Health check created");
        Ok(check)
    }

    pub fn update_health_check(
        &self,
        id: &str,
        config: CheckConfig,
    ) -> Result<HealthCheck, MonitorError> {
        config.validate()?;

        let check = self.runner.reconfigure(id, config)?;
        if self.is_started() {
            self.scheduler.schedule(&check);
        }

        tracing::info!(check_id = %id, active = check.config.is_active, "Health check updated");
        Ok(check)
    }

    /// Remove a check. A probe already in flight finishes and its result
    /// is discarded.
    pub fn delete_health_check(&self, id: &str) -> Result<HealthCheck, MonitorError> {
        let check = self
            .stores
            .checks
            .remove(id)
            .ok_or_else(|| MonitorError::CheckNotFound(id.to_string()))?;
        self.scheduler.unschedule(id);
        self.runner.forget(id);
        self.queues.close(id);

        tracing::info!(check_id = %id, "Health check deleted");
        Ok(check)
    }

    /// Probe a check immediately, outside its schedule
    pub async fn run_check_now(&self, id: &str) -> Result<ProbeResult, MonitorError> {
        if self.stores.checks.get(id).is_none() {
            return Err(MonitorError::CheckNotFound(id.to_string()));
        }
        let guard = self
            .runner
            .try_begin(id)
            .ok_or_else(|| MonitorError::CheckBusy(id.to_string()))?;

        self.runner
            .run(id, guard)
            .await
            .ok_or_else(|| MonitorError::CheckNotFound(id.to_string()))
    }

    pub fn get_health_check(&self, id: &str) -> Result<HealthCheck, MonitorError> {
        self.stores
            .checks
            .get(id)
            .ok_or_else(|| MonitorError::CheckNotFound(id.to_string()))
    }

    pub fn list_health_checks(&self) -> Vec<HealthCheck> {
        self.stores.checks.list()
    }

    /// Recent probe records, newest first
    pub fn check_results(&self, id: &str, limit: usize) -> Result<Vec<ProbeRecord>, MonitorError> {
        self.get_health_check(id)?;
        Ok(self.stores.checks.history(id, limit))
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.scheduler.is_scheduled(id)
    }

    // ========================================================================
    // Channels
    // ========================================================================

    pub fn create_channel(&self, config: ChannelConfig) -> Result<NotificationChannel, MonitorError> {
        config.validate()?;

        let channel = NotificationChannel::new(config);
        self.stores.channels.insert(channel.clone())?;

        tracing::info!(
            channel_id = %channel.id,
            provider = %channel.config.provider,
            "Notification channel created"
        );
        Ok(channel)
    }

    /// Replace a channel's configuration. A redacted secret keeps the
    /// stored one.
    pub fn edit_channel(
        &self,
        id: &str,
        mut config: ChannelConfig,
    ) -> Result<NotificationChannel, MonitorError> {
        let existing = self
            .stores
            .channels
            .get(id)
            .ok_or_else(|| MonitorError::ChannelNotFound(id.to_string()))?;

        if let (
            Destination::Webhook { secret: new, .. },
            Destination::Webhook { secret: old, .. },
        ) = (&mut config.destination, &existing.config.destination)
        {
            if new.as_deref() == Some(REDACTED) {
                *new = old.clone();
            }
        }
        config.validate()?;

        let channel = NotificationChannel { config, ..existing };
        self.stores.channels.update(channel.clone())?;

        tracing::info!(channel_id = %id, "Notification channel updated");
        Ok(channel)
    }

    pub fn delete_channel(&self, id: &str) -> Result<NotificationChannel, MonitorError> {
        let channel = self
            .stores
            .channels
            .remove(id)
            .ok_or_else(|| MonitorError::ChannelNotFound(id.to_string()))?;

        tracing::info!(channel_id = %id, "Notification channel deleted");
        Ok(channel)
    }

    pub fn toggle_channel(&self, id: &str) -> Result<NotificationChannel, MonitorError> {
        let channel = self.stores.channels.toggle(id)?;
        tracing::info!(channel_id = %id, enabled = channel.config.enabled, "Notification channel toggled");
        Ok(channel)
    }

    pub fn get_channel(&self, id: &str) -> Result<NotificationChannel, MonitorError> {
        self.stores
            .channels
            .get(id)
            .ok_or_else(|| MonitorError::ChannelNotFound(id.to_string()))
    }

    pub fn list_channels(&self) -> Vec<NotificationChannel> {
        self.stores.channels.list()
    }

    pub async fn test_channel(&self, id: &str) -> Result<NotificationLog, MonitorError> {
        Ok(self.dispatcher.test_channel(id).await?)
    }

    // ========================================================================
    // Dispatch and delivery log
    // ========================================================================

    /// Deliver an externally originated event
    pub async fn dispatch(&self, event: Event) -> Result<Vec<NotificationLog>, MonitorError> {
        crate::validation::require("event_type", &event.event_type)?;
        Ok(self.dispatcher.dispatch(&event).await)
    }

    pub async fn retry_notification(&self, log_id: &str) -> Result<NotificationLog, MonitorError> {
        Ok(self.dispatcher.retry_notification(log_id).await?)
    }

    pub fn notification_logs(&self, filter: &LogFilter, page: PageRequest) -> Page<NotificationLog> {
        self.stores.logs.query(filter, page)
    }

    pub fn get_notification_log(&self, id: &str) -> Result<NotificationLog, MonitorError> {
        self.stores
            .logs
            .get(id)
            .ok_or_else(|| MonitorError::LogNotFound(id.to_string()))
    }

    pub fn log_stats(&self) -> LogStats {
        self.stores.logs.stats()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
        if let Some(retention) = self.retention.get_mut().take() {
            retention.worker.stop();
            retention.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{CheckStatus, CheckType, FailureKind, ProbeFailure};
    use crate::notify::Provider;
    use crate::test_support::{serve, webhook_sink};
    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::get, Router};
    use std::sync::atomic::AtomicUsize;
    use tokio_test::assert_ok;

    /// Succeeds after an optional delay; targets containing "fail" fail
    #[derive(Default)]
    struct FakeProber {
        delay: Duration,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Prober for FakeProber {
        async fn probe(&self, check: &CheckConfig) -> ProbeResult {
            self.probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if check.target.contains("fail") {
                ProbeResult::failed(
                    ProbeFailure::new(FailureKind::ConnectionRefused, "refused"),
                    self.delay,
                )
            } else {
                ProbeResult::ok(self.delay)
            }
        }
    }

    fn monitor_with(prober: FakeProber) -> Arc<Monitor> {
        let config = MonitorConfig::default()
            .with_max_jitter(Duration::ZERO)
            .with_log_retention(Duration::ZERO);
        Arc::new(Monitor::new(
            config,
            Stores::in_memory(),
            Arc::new(prober),
            ProviderRegistry::with_defaults(reqwest::Client::new(), &ProviderSettings::default()),
        ))
    }

    fn tcp_check(name: &str, target: &str) -> CheckConfig {
        CheckConfig::new(name, target, CheckType::Tcp)
            .with_interval(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(1))
    }

    async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_http_500_goes_down_and_notifies() {
        let target = serve(Router::new().route(
            "/health",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;
        let (hook, sink) = webhook_sink(StatusCode::OK).await;

        let monitor = Monitor::in_memory(
            MonitorConfig::default().with_log_retention(Duration::ZERO),
        )
        .unwrap();
        monitor.start();

        monitor
            .create_channel(
                ChannelConfig::new("ops", Provider::Webhook, Destination::webhook(hook))
                    .with_event("health.down"),
            )
            .unwrap();

        // Inactive so only manual runs probe it
        let check = monitor
            .create_health_check(
                CheckConfig::new("api", format!("http://{}/health", target), CheckType::Http)
                    .with_timeout(Duration::from_secs(2))
                    .with_active(false),
            )
            .unwrap();

        let mut statuses = vec![monitor.get_health_check(&check.id).unwrap().state.status];
        for _ in 0..3 {
            let result = monitor.run_check_now(&check.id).await.unwrap();
            assert_eq!(result.status_code, Some(500));
            statuses.push(monitor.get_health_check(&check.id).unwrap().state.status);
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

        assert!(eventually(|| monitor.log_stats().success == 1).await);
        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        let body = requests[0].json();
        assert_eq!(body["event"], "health.down");
        assert_eq!(body["data"]["check_id"], check.id.as_str());
        assert_eq!(body["data"]["consecutive_failures"], 3);

        assert_eq!(monitor.check_results(&check.id, 10).unwrap().len(), 3);
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_scheduled_checks_probe_and_stop() {
        let monitor = monitor_with(FakeProber::default());
        monitor.start();

        let check = monitor.create_health_check(tcp_check("db", "db:5432")).unwrap();
        assert!(monitor.is_scheduled(&check.id));
        assert!(
            eventually(|| monitor
                .get_health_check(&check.id)
                .map(|c| c.state.status == CheckStatus::Healthy)
                .unwrap_or(false))
            .await
        );

        let paused = monitor
            .update_health_check(&check.id, tcp_check("db", "db:5432").with_active(false))
            .unwrap();
        assert!(!paused.config.is_active);
        assert_eq!(paused.state.status, CheckStatus::Healthy);
        assert!(!monitor.is_scheduled(&check.id));

        monitor.delete_health_check(&check.id).unwrap();
        assert!(matches!(
            monitor.get_health_check(&check.id),
            Err(MonitorError::CheckNotFound(_))
        ));
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_start_schedules_existing_checks() {
        let monitor = monitor_with(FakeProber::default());
        let active = monitor.create_health_check(tcp_check("a", "a:1")).unwrap();
        let inactive = monitor
            .create_health_check(tcp_check("b", "b:1").with_active(false))
            .unwrap();
        assert!(!monitor.is_scheduled(&active.id));

        monitor.start();
        assert!(monitor.is_scheduled(&active.id));
        assert!(!monitor.is_scheduled(&inactive.id));
        monitor.shutdown();
        assert!(!monitor.is_scheduled(&active.id));
    }

    #[tokio::test]
    async fn test_run_check_now_rejects_concurrent_run() {
        let monitor = monitor_with(FakeProber {
            delay: Duration::from_millis(300),
            ..Default::default()
        });
        let check = monitor.create_health_check(tcp_check("db", "db:5432")).unwrap();

        let first = {
            let monitor = Arc::clone(&monitor);
            let id = check.id.clone();
            tokio::spawn(async move { monitor.run_check_now(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(
            monitor.run_check_now(&check.id).await,
            Err(MonitorError::CheckBusy(_))
        ));
        assert!(first.await.unwrap().unwrap().success);
        assert_ok!(monitor.run_check_now(&check.id).await);
    }

    #[tokio::test]
    async fn test_delete_mid_probe_discards_result() {
        let monitor = monitor_with(FakeProber {
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let check = monitor.create_health_check(tcp_check("db", "fail:5432")).unwrap();

        let probe = {
            let monitor = Arc::clone(&monitor);
            let id = check.id.clone();
            tokio::spawn(async move { monitor.run_check_now(&id).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.delete_health_check(&check.id).unwrap();

        let result = probe.await.unwrap().unwrap();
        assert!(!result.success);
        assert!(monitor.get_health_check(&check.id).is_err());
        assert!(monitor.check_results(&check.id, 10).is_err());
        assert_eq!(monitor.log_stats().total, 0);
    }

    #[tokio::test]
    async fn test_missing_check_errors() {
        let monitor = monitor_with(FakeProber::default());
        assert!(matches!(
            monitor.run_check_now("nope").await,
            Err(MonitorError::CheckNotFound(_))
        ));
        assert!(matches!(
            monitor.delete_health_check("nope"),
            Err(MonitorError::CheckNotFound(_))
        ));
        assert!(matches!(
            monitor.update_health_check("nope", tcp_check("x", "x:1")),
            Err(MonitorError::CheckNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_check_rejected() {
        let monitor = monitor_with(FakeProber::default());
        let err = monitor
            .create_health_check(CheckConfig::new("api", "not a url", CheckType::Http))
            .unwrap_err();
        assert!(matches!(err, MonitorError::Validation(_)));
        assert!(monitor.list_health_checks().is_empty());
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let monitor = monitor_with(FakeProber::default());
        let config = ChannelConfig::new(
            "hooks",
            Provider::Webhook,
            Destination::Webhook {
                url: "https://example.com/hook".to_string(),
                secret: Some("s3cret".to_string()),
            },
        )
        .with_event("deployment.failed");

        let channel = monitor.create_channel(config.clone()).unwrap();
        let duplicate = monitor.create_channel(config.clone()).unwrap_err();
        assert!(matches!(
            duplicate,
            MonitorError::Validation(ValidationError::DuplicateName(_))
        ));

        // Editing with the redacted secret keeps the stored one
        let mut edit = channel.redacted().config;
        edit.events.insert("server.down".to_string());
        let edited = monitor.edit_channel(&channel.id, edit).unwrap();
        assert_eq!(edited.created_at, channel.created_at);
        assert_eq!(
            edited.config.destination,
            Destination::Webhook {
                url: "https://example.com/hook".to_string(),
                secret: Some("s3cret".to_string()),
            }
        );
        assert!(edited.is_subscribed("server.down"));

        let toggled = monitor.toggle_channel(&channel.id).unwrap();
        assert!(!toggled.config.enabled);

        monitor.delete_channel(&channel.id).unwrap();
        assert!(monitor.list_channels().is_empty());
        assert!(matches!(
            monitor.test_channel(&channel.id).await,
            Err(MonitorError::ChannelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_and_retry_through_facade() {
        let (hook, sink) = webhook_sink(StatusCode::SERVICE_UNAVAILABLE).await;
        let config = MonitorConfig::default()
            .with_log_retention(Duration::ZERO)
            .with_retry_policy(RetryPolicy {
                max_retries: 1,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
                attempt_timeout: Duration::from_secs(2),
            });
        let monitor = Monitor::new(
            config,
            Stores::in_memory(),
            Arc::new(FakeProber::default()),
            ProviderRegistry::with_defaults(reqwest::Client::new(), &ProviderSettings::default()),
        );
        monitor
            .create_channel(
                ChannelConfig::new("hooks", Provider::Webhook, Destination::webhook(hook))
                    .with_event("deployment.failed"),
            )
            .unwrap();

        let logs = monitor
            .dispatch(Event::new("deployment.failed", "Deploy failed", "exit 1"))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert_eq!(logs[0].attempts, 2);
        assert_eq!(sink.requests().len(), 2);

        let retried = monitor.retry_notification(&logs[0].id).await.unwrap();
        assert_eq!(retried.retry_of.as_deref(), Some(logs[0].id.as_str()));

        let stats = monitor.log_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.failed, 2);

        let filter = LogFilter {
            search: Some("deploy".to_string()),
            ..Default::default()
        };
        assert_eq!(monitor.notification_logs(&filter, PageRequest::default()).total, 2);
    }

    fn hook_channel(url: String, events: &[&str]) -> ChannelConfig {
        events.iter().fold(
            ChannelConfig::new("hooks", Provider::Webhook, Destination::webhook(url)),
            |config, event| config.with_event(*event),
        )
    }

    #[tokio::test]
    async fn test_threshold_edit_moves_check_down_and_notifies() {
        let (hook, sink) = webhook_sink(StatusCode::OK).await;
        let monitor = monitor_with(FakeProber::default());
        monitor.start();
        monitor
            .create_channel(hook_channel(hook, &["health.down"]))
            .unwrap();

        let check = monitor
            .create_health_check(tcp_check("db", "fail:5432").with_active(false))
            .unwrap();
        monitor.run_check_now(&check.id).await.unwrap();
        monitor.run_check_now(&check.id).await.unwrap();
        assert_eq!(
            monitor.get_health_check(&check.id).unwrap().state.status,
            CheckStatus::Degraded
        );

        let edited = monitor
            .update_health_check(
                &check.id,
                tcp_check("db", "fail:5432")
                    .with_active(false)
                    .with_failure_threshold(2),
            )
            .unwrap();
        assert_eq!(edited.state.status, CheckStatus::Down);
        assert_eq!(edited.state.consecutive_failures, 2);

        assert!(eventually(|| sink.requests().len() == 1).await);
        let body = sink.requests()[0].json();
        assert_eq!(body["event"], "health.down");
        assert_eq!(body["data"]["check_id"], check.id.as_str());
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_changes_before_start_are_not_announced() {
        let (hook, sink) = webhook_sink(StatusCode::OK).await;
        let monitor = monitor_with(FakeProber::default());
        monitor
            .create_channel(hook_channel(hook, &["health.down", "health.recovered"]))
            .unwrap();

        let check = monitor
            .create_health_check(
                tcp_check("db", "fail:5432")
                    .with_active(false)
                    .with_failure_threshold(1),
            )
            .unwrap();
        monitor.run_check_now(&check.id).await.unwrap();
        assert_eq!(
            monitor.get_health_check(&check.id).unwrap().state.status,
            CheckStatus::Down
        );

        monitor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sink.requests().is_empty());
        assert_eq!(monitor.log_stats().total, 0);

        // Transitions after start are delivered
        monitor
            .update_health_check(
                &check.id,
                tcp_check("db", "db:5432")
                    .with_active(false)
                    .with_failure_threshold(1),
            )
            .unwrap();
        monitor.run_check_now(&check.id).await.unwrap();
        assert!(eventually(|| sink.requests().len() == 1).await);
        assert_eq!(sink.requests()[0].json()["event"], "health.recovered");
        monitor.shutdown();
    }

    #[tokio::test]
    async fn test_check_notifications_keep_transition_order() {
        let (hook, sink) = webhook_sink(StatusCode::OK).await;
        let monitor = monitor_with(FakeProber::default());
        monitor.start();
        monitor
            .create_channel(hook_channel(hook, &["health.changed"]))
            .unwrap();

        let check = monitor
            .create_health_check(
                tcp_check("db", "fail:5432")
                    .with_active(false)
                    .with_failure_threshold(2),
            )
            .unwrap();
        monitor.run_check_now(&check.id).await.unwrap();
        monitor.run_check_now(&check.id).await.unwrap();

        assert!(eventually(|| sink.requests().len() == 2).await);
        let statuses: Vec<String> = sink
            .requests()
            .iter()
            .map(|request| request.json()["data"]["new_status"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(statuses, vec!["degraded", "down"]);
        monitor.shutdown();
    }
}
