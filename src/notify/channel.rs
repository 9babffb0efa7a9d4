//! Notification channel configuration

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validation::{self, ValidationError};

/// Subscribes a channel to every event type
pub const ALL_EVENTS: &str = "*";

/// Delivery provider backing a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Email,
    Slack,
    Discord,
    Teams,
    Webhook,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Email,
        Provider::Slack,
        Provider::Discord,
        Provider::Teams,
        Provider::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Email => "email",
            Provider::Slack => "slack",
            Provider::Discord => "discord",
            Provider::Teams => "teams",
            Provider::Webhook => "webhook",
        }
    }

    /// Whether the provider delivers through an HTTP webhook
    pub fn uses_webhook(&self) -> bool {
        !matches!(self, Provider::Email)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::invalid("provider", format!("unknown provider '{}'", s)))
    }
}

/// Where a channel delivers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Destination {
    Webhook {
        url: String,
        /// HMAC signing secret (generic webhooks only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    Email {
        address: String,
    },
}

impl Destination {
    pub fn webhook(url: impl Into<String>) -> Self {
        Destination::Webhook {
            url: url.into(),
            secret: None,
        }
    }

    pub fn email(address: impl Into<String>) -> Self {
        Destination::Email {
            address: address.into(),
        }
    }

    /// Human-readable recipient recorded in the delivery log
    pub fn recipient(&self) -> String {
        match self {
            Destination::Webhook { url, .. } => redact_url(url),
            Destination::Email { address } => address.clone(),
        }
    }
}

/// Strip query strings and tokens from a webhook URL for display
fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default(),
            if parsed.path().len() > 1 { "/***" } else { "" }
        ),
        Err(_) => "***".to_string(),
    }
}

/// User-editable channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub provider: Provider,
    pub destination: Destination,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Subscribed event types; `*` matches everything
    #[serde(default)]
    pub events: BTreeSet<String>,
}

fn default_enabled() -> bool {
    true
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, provider: Provider, destination: Destination) -> Self {
        Self {
            name: name.into(),
            provider,
            destination,
            enabled: true,
            events: BTreeSet::new(),
        }
    }

    pub fn with_event(mut self, event_type: impl Into<String>) -> Self {
        self.events.insert(event_type.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::require("name", &self.name)?;

        match (&self.destination, self.provider) {
            (Destination::Email { address }, Provider::Email) => {
                validation::require("address", address)?;
                address
                    .trim()
                    .parse::<lettre::Address>()
                    .map_err(|e| ValidationError::invalid("address", e.to_string()))?;
            }
            (Destination::Webhook { url, secret }, provider) if provider.uses_webhook() => {
                validation::http_url("webhook_url", url)?;
                if secret.is_some() && provider != Provider::Webhook {
                    return Err(ValidationError::invalid(
                        "webhook_secret",
                        format!("only supported by the webhook provider, not {}", provider),
                    ));
                }
            }
            (_, provider) => {
                return Err(ValidationError::invalid(
                    "destination",
                    format!("does not match provider {}", provider),
                ))
            }
        }

        if self.events.is_empty() {
            return Err(ValidationError::Missing { field: "events" });
        }
        if let Some(bad) = self
            .events
            .iter()
            .find(|e| e.trim().is_empty() || e.chars().any(char::is_whitespace))
        {
            return Err(ValidationError::invalid(
                "events",
                format!("'{}' is not a valid event type", bad),
            ));
        }

        Ok(())
    }
}

/// A configured notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    #[serde(flatten)]
    pub config: ChannelConfig,
    pub created_at: DateTime<Utc>,
}

impl NotificationChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            created_at: Utc::now(),
        }
    }

    pub fn is_subscribed(&self, event_type: &str) -> bool {
        self.config.events.contains(event_type) || self.config.events.contains(ALL_EVENTS)
    }

    /// Whether this channel should receive `event_type` right now
    pub fn accepts(&self, event_type: &str) -> bool {
        self.config.enabled && self.is_subscribed(event_type)
    }

    /// Copy with secrets masked, for API responses
    pub fn redacted(&self) -> Self {
        let mut channel = self.clone();
        if let Destination::Webhook { secret, .. } = &mut channel.config.destination {
            if secret.is_some() {
                *secret = Some("***".to_string());
            }
        }
        channel
    }
}
