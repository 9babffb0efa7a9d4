//! Fan-out of events to subscribed channels with retry and isolation
//!
//! Each channel is delivered in its own task. A slow, failing or panicking
//! provider only affects its own log row.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;

use super::channel::NotificationChannel;
use super::event::Event;
use super::log::{DeliveryOutcome, LogStatus, NotificationLog};
use super::providers::{DeliveryError, ProviderRegistry};
use crate::store::{ChannelStore, LogStore, StoreError};

/// Retry and timeout settings for deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_backoff`
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Errors from explicit dispatch commands
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("notification log '{0}' not found")]
    LogNotFound(String),

    #[error("notification channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("notification log '{id}' is {status}; only failed notifications can be retried")]
    NotRetryable { id: String, status: LogStatus },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Delivers events through the provider registry and records every attempt
#[derive(Clone)]
pub struct Dispatcher {
    channels: Arc<dyn ChannelStore>,
    logs: Arc<dyn LogStore>,
    registry: Arc<ProviderRegistry>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        channels: Arc<dyn ChannelStore>,
        logs: Arc<dyn LogStore>,
        registry: Arc<ProviderRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channels,
            logs,
            registry,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deliver `event` to every enabled channel subscribed to its type.
    ///
    /// Returns the finalized log rows, one per channel.
    pub async fn dispatch(&self, event: &Event) -> Vec<NotificationLog> {
        let channels = self.channels.subscribers(&event.event_type);
        if channels.is_empty() {
            tracing::debug!(event_type = %event.event_type, "No channels subscribed");
            return Vec::new();
        }

        tracing::info!(
            event_type = %event.event_type,
            channels = channels.len(),
            "Dispatching event"
        );

        let tasks = channels.into_iter().map(|channel| {
            let dispatcher = self.clone();
            let event = event.clone();
            tokio::spawn(async move { dispatcher.deliver(&channel, &event, None).await })
        });

        join_all(tasks)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(Ok(log)) => Some(log),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Failed to record notification");
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, "Delivery task failed");
                    None
                }
            })
            .collect()
    }

    /// Redeliver a failed notification as a new log row
    pub async fn retry_notification(&self, log_id: &str) -> Result<NotificationLog, DispatchError> {
        let original = self
            .logs
            .get(log_id)
            .ok_or_else(|| DispatchError::LogNotFound(log_id.to_string()))?;

        if original.status != LogStatus::Failed {
            return Err(DispatchError::NotRetryable {
                id: original.id,
                status: original.status,
            });
        }

        let channel = self
            .channels
            .get(&original.channel_id)
            .ok_or_else(|| DispatchError::ChannelNotFound(original.channel_id.clone()))?;

        tracing::info!(log_id, channel_id = %channel.id, "Retrying notification");
        let event = original.to_event();
        Ok(self.deliver(&channel, &event, Some(original.id)).await?)
    }

    /// Send a fixed test notification regardless of subscriptions
    pub async fn test_channel(&self, channel_id: &str) -> Result<NotificationLog, DispatchError> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or_else(|| DispatchError::ChannelNotFound(channel_id.to_string()))?;

        let event = Event::test(&channel.config.name);
        Ok(self.deliver(&channel, &event, None).await?)
    }

    async fn deliver(
        &self,
        channel: &NotificationChannel,
        event: &Event,
        retry_of: Option<String>,
    ) -> Result<NotificationLog, StoreError> {
        let mut log = NotificationLog::pending(channel, event);
        if let Some(previous) = retry_of {
            log = log.with_retry_of(previous);
        }
        let log_id = log.id.clone();
        self.logs.insert(log)?;

        let outcome = self.attempt_delivery(channel, event).await;
        self.logs.finalize(&log_id, outcome)
    }

    async fn attempt_delivery(&self, channel: &NotificationChannel, event: &Event) -> DeliveryOutcome {
        let provider = channel.config.provider;
        let Some(adapter) = self.registry.get(provider) else {
            let err = DeliveryError::permanent(format!("no adapter for provider {}", provider));
            tracing::error!(channel_id = %channel.id, error = %err, "Cannot deliver notification");
            return DeliveryOutcome::failed(0, err.to_string());
        };

        let payload = match std::panic::catch_unwind(AssertUnwindSafe(|| adapter.render(event))) {
            Ok(payload) => payload,
            Err(_) => {
                let err = DeliveryError::permanent("payload rendering panicked");
                tracing::error!(channel_id = %channel.id, error = %err, "Cannot deliver notification");
                return DeliveryOutcome::failed(0, err.to_string());
            }
        };

        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let send = AssertUnwindSafe(adapter.send(&channel.config.destination, &payload))
                .catch_unwind();
            let result = match tokio::time::timeout(self.policy.attempt_timeout, send).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(DeliveryError::permanent("provider adapter panicked")),
                Err(_) => Err(DeliveryError::retryable(format!(
                    "attempt timed out after {}ms",
                    self.policy.attempt_timeout.as_millis()
                ))),
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        channel_id = %channel.id,
                        provider = %provider,
                        event_type = %event.event_type,
                        attempt,
                        "Notification delivered"
                    );
                    return DeliveryOutcome::success(attempt);
                }
                Err(err) if err.retryable && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        channel_id = %channel.id,
                        provider = %provider,
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::warn!(
                        channel_id = %channel.id,
                        provider = %provider,
                        attempt,
                        error = %err,
                        "Notification delivery failed"
                    );
                    return DeliveryOutcome::failed(attempt, err.to_string());
                }
            }
        }
    }
}
