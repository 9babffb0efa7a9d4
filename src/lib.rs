//! Healthwatch: Health-Check & Notification-Dispatch Engine
//!
//! Periodically probes HTTP, TCP, SSL and ping targets, tracks consecutive
//! failures per check, and fans state changes and external events out to
//! notification channels with retry and per-channel isolation.
//!
//! # Features
//!
//! - **Probes**: HTTP status, TCP connect, TLS certificate expiry, ICMP ping
//! - **State tracking**: `healthy` / `degraded` / `down` with a configurable threshold
//! - **Scheduling**: one timer per check, start jitter, overlap prevention
//! - **Channels**: email (SMTP), Slack, Discord, Teams, signed generic webhooks
//! - **Delivery log**: every dispatch recorded, filterable, manually retryable
//!
//! # Example
//!
//! ```no_run
//! use healthwatch::checks::{CheckConfig, CheckType};
//! use healthwatch::monitor::{Monitor, MonitorConfig};
//! use healthwatch::notify::{ChannelConfig, Destination, Provider};
//!
//! # async fn run() -> Result<(), healthwatch::monitor::MonitorError> {
//! let monitor = Monitor::in_memory(MonitorConfig::default())?;
//! monitor.start();
//!
//! monitor.create_channel(
//!     ChannelConfig::new("ops", Provider::Slack, Destination::webhook("https://hooks.slack.com/services/T/B/X"))
//!         .with_event("health.down"),
//! )?;
//! monitor.create_health_check(CheckConfig::new("api", "https://example.com/health", CheckType::Http))?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod checks;
pub mod monitor;
pub mod notify;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use checks::{CheckConfig, CheckStatus, CheckType, HealthCheck, ProbeResult};
pub use monitor::{Monitor, MonitorConfig, MonitorError};
pub use notify::{ChannelConfig, Destination, Event, NotificationChannel, NotificationLog, Provider};
