//! Events that can trigger notifications

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checks::{CheckStatus, HealthChanged};

/// Well-known event type names
pub mod event_types {
    pub const HEALTH_CHANGED: &str = "health.changed";
    pub const HEALTH_DOWN: &str = "health.down";
    pub const HEALTH_RECOVERED: &str = "health.recovered";
    pub const DEPLOYMENT_SUCCESS: &str = "deployment.success";
    pub const DEPLOYMENT_FAILED: &str = "deployment.failed";
    pub const SERVER_DOWN: &str = "server.down";
    pub const CHANNEL_TEST: &str = "channel.test";
}

/// Visual weight of a notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    /// Default severity for a known event type
    pub fn for_event(event_type: &str) -> Self {
        match event_type {
            event_types::DEPLOYMENT_SUCCESS | event_types::HEALTH_RECOVERED => Severity::Success,
            event_types::DEPLOYMENT_FAILED
            | event_types::SERVER_DOWN
            | event_types::HEALTH_DOWN => Severity::Error,
            _ => Severity::Info,
        }
    }

    fn for_status(status: CheckStatus) -> Self {
        match status {
            CheckStatus::Healthy => Severity::Success,
            CheckStatus::Degraded => Severity::Warning,
            CheckStatus::Down => Severity::Error,
            CheckStatus::Unknown => Severity::Info,
        }
    }
}

/// A dispatchable event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: String,
    #[serde(default)]
    pub severity: Severity,
    pub subject: String,
    pub message: String,
    /// Flat key/value details rendered as fields
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let event_type = event_type.into();
        Self {
            severity: Severity::for_event(&event_type),
            event_type,
            subject: subject.into(),
            message: message.into(),
            data: empty_object(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Add a detail field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if !self.data.is_object() {
            self.data = empty_object();
        }
        if let Value::Object(map) = &mut self.data {
            map.insert(key.into(), value.into());
        }
        self
    }

    /// Detail fields as display strings, in key order
    pub fn fields(&self) -> Vec<(String, String)> {
        match &self.data {
            Value::Object(map) => map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Sent by the "test channel" action
    pub fn test(channel_name: &str) -> Self {
        Event::new(
            event_types::CHANNEL_TEST,
            "Test notification",
            format!("This is a test notification for channel '{}'", channel_name),
        )
        .with_field("channel", channel_name)
    }

    /// Events produced by a health status transition.
    ///
    /// Always yields `health.changed`; entering `down` adds `health.down` and
    /// returning to `healthy` from a failing state adds `health.recovered`.
    pub fn from_health_change(change: &HealthChanged) -> Vec<Event> {
        let base = |event_type: &str, subject: String, message: String| {
            let mut event = Event::new(event_type, subject, message)
                .with_field("check_id", change.check_id.as_str())
                .with_field("check", change.check_name.as_str())
                .with_field("target", change.target.as_str())
                .with_field("old_status", change.old_status.as_str())
                .with_field("new_status", change.new_status.as_str())
                .with_field("consecutive_failures", change.consecutive_failures);
            if let Some(error) = &change.error {
                event = event.with_field("error", error.as_str());
            }
            event.timestamp = change.timestamp;
            event
        };

        let mut events = vec![base(
            event_types::HEALTH_CHANGED,
            format!("{} is {}", change.check_name, change.new_status),
            format!(
                "Health check '{}' changed from {} to {}",
                change.check_name, change.old_status, change.new_status
            ),
        )
        .with_severity(Severity::for_status(change.new_status))];

        match change.new_status {
            CheckStatus::Down => events.push(base(
                event_types::HEALTH_DOWN,
                format!("{} is down", change.check_name),
                format!(
                    "{} failed {} consecutive checks",
                    change.target, change.consecutive_failures
                ),
            )),
            CheckStatus::Healthy
                if matches!(change.old_status, CheckStatus::Degraded | CheckStatus::Down) =>
            {
                events.push(base(
                    event_types::HEALTH_RECOVERED,
                    format!("{} recovered", change.check_name),
                    format!("{} is responding again", change.target),
                ))
            }
            _ => {}
        }

        events
    }
}
