//! Healthwatch Server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - HEALTHWATCH_HOST: Bind address (default: 0.0.0.0)
//! - HEALTHWATCH_PORT: Port number (default: 8080)
//! - HEALTHWATCH_DOWN_THRESHOLD: Consecutive failures before a check is down (default: 3)
//! - HEALTHWATCH_SSL_EXPIRY_DAYS: Certificate expiry warning window in days (default: 14)
//! - HEALTHWATCH_MAX_RETRIES: Delivery retries after the first attempt (default: 3)
//! - HEALTHWATCH_LOG_RETENTION_DAYS: Days to keep delivery logs, 0 keeps forever (default: 30)
//! - HEALTHWATCH_SOURCE_NAME: Sender name used in notifications (default: healthwatch)
//! - RUST_LOG: Log level (default: info)
//!
//! Email delivery (enabled when SMTP_HOST and SMTP_FROM are set):
//! - SMTP_HOST, SMTP_PORT (default: 587), SMTP_USERNAME, SMTP_PASSWORD
//! - SMTP_FROM: Sender mailbox
//! - SMTP_TLS: Use TLS (default: true)

use std::time::Duration;

use healthwatch::api::{run_server, ServerConfig};
use healthwatch::monitor::MonitorConfig;
use healthwatch::notify::{ProviderSettings, RetryPolicy, SmtpSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

fn smtp_from_env() -> Option<SmtpSettings> {
    let host = env_var("SMTP_HOST")?;
    let from = env_var("SMTP_FROM")?;

    Some(SmtpSettings {
        host,
        port: env_parse("SMTP_PORT").unwrap_or(587),
        username: env_var("SMTP_USERNAME"),
        password: env_var("SMTP_PASSWORD"),
        from,
        tls: env_parse("SMTP_TLS").unwrap_or(true),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "healthwatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let host = env_var("HEALTHWATCH_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    let port: u16 = env_parse("HEALTHWATCH_PORT").unwrap_or(8080);

    let mut monitor = MonitorConfig::default();
    if let Some(threshold) = env_parse::<u32>("HEALTHWATCH_DOWN_THRESHOLD").filter(|t| *t > 0) {
        monitor.down_threshold = threshold;
    }
    if let Some(days) = env_parse("HEALTHWATCH_SSL_EXPIRY_DAYS") {
        monitor.ssl_expiry_days = days;
    }
    if let Some(retries) = env_parse("HEALTHWATCH_MAX_RETRIES") {
        monitor.retry = RetryPolicy {
            max_retries: retries,
            ..RetryPolicy::default()
        };
    }
    if let Some(days) = env_parse::<u64>("HEALTHWATCH_LOG_RETENTION_DAYS") {
        monitor.log_retention = Duration::from_secs(days * 24 * 3600);
    }
    monitor.providers = ProviderSettings {
        source_name: env_var("HEALTHWATCH_SOURCE_NAME"),
        smtp: smtp_from_env(),
    };

    let config = ServerConfig {
        host,
        port,
        monitor,
    };

    tracing::info!("Healthwatch configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Down threshold: {}", config.monitor.down_threshold);
    tracing::info!("  SSL expiry window: {} days", config.monitor.ssl_expiry_days);
    tracing::info!(
        "  Delivery: {} attempts, {:?} attempt timeout",
        config.monitor.retry.max_attempts(),
        config.monitor.retry.attempt_timeout
    );
    if config.monitor.log_retention.is_zero() {
        tracing::info!("  Log retention: DISABLED");
    } else {
        tracing::info!(
            "  Log retention: {} days",
            config.monitor.log_retention.as_secs() / (24 * 3600)
        );
    }
    match &config.monitor.providers.smtp {
        Some(smtp) => tracing::info!("  SMTP: {}:{}", smtp.host, smtp.port),
        None => tracing::info!("  SMTP: not configured (email channels will fail)"),
    }

    println!(
        r#"
 Healthwatch
 Health Checks & Notification Dispatch
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
