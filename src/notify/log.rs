//! Delivery log records

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channel::{NotificationChannel, Provider};
use super::event::{Event, Severity};

/// Delivery status of a log row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LogStatus::Pending)
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What was sent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogPayload {
    pub subject: String,
    pub message: String,
    pub recipient: String,
    #[serde(default)]
    pub severity: Severity,
    /// Event details, kept so the notification can be redelivered
    #[serde(default)]
    pub data: Value,
}

/// One dispatch of one event to one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub provider: Provider,
    pub event_type: String,
    pub status: LogStatus,
    pub payload: LogPayload,
    pub error_message: Option<String>,
    /// Delivery attempts made, including retries
    pub attempts: u32,
    /// Log row this one redelivers
    pub retry_of: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl NotificationLog {
    /// New pending row for delivering `event` through `channel`
    pub fn pending(channel: &NotificationChannel, event: &Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel.id.clone(),
            channel_name: channel.config.name.clone(),
            provider: channel.config.provider,
            event_type: event.event_type.clone(),
            status: LogStatus::Pending,
            payload: LogPayload {
                subject: event.subject.clone(),
                message: event.message.clone(),
                recipient: channel.config.destination.recipient(),
                severity: event.severity,
                data: event.data.clone(),
            },
            error_message: None,
            attempts: 0,
            retry_of: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_retry_of(mut self, log_id: impl Into<String>) -> Self {
        self.retry_of = Some(log_id.into());
        self
    }

    /// Rebuild the event this row delivered
    pub fn to_event(&self) -> Event {
        Event {
            event_type: self.event_type.clone(),
            severity: self.payload.severity,
            subject: self.payload.subject.clone(),
            message: self.payload.message.clone(),
            data: self.payload.data.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Terminal result of a delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub attempts: u32,
}

impl DeliveryOutcome {
    pub fn success(attempts: u32) -> Self {
        Self {
            status: LogStatus::Success,
            error_message: None,
            attempts,
        }
    }

    pub fn failed(attempts: u32, error: impl Into<String>) -> Self {
        Self {
            status: LogStatus::Failed,
            error_message: Some(error.into()),
            attempts,
        }
    }
}
