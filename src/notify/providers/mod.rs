//! Provider adapters: render an event for a provider and deliver it

pub mod discord;
pub mod email;
pub mod slack;
pub mod teams;
pub mod webhook;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::channel::{Destination, Provider};
use super::event::Event;

pub use discord::DiscordAdapter;
pub use email::{EmailAdapter, SmtpSettings};
pub use slack::SlackAdapter;
pub use teams::TeamsAdapter;
pub use webhook::{sign, WebhookAdapter, SIGNATURE_HEADER};

/// Name shown as the sender in chat payloads
pub const DEFAULT_SOURCE_NAME: &str = "healthwatch";

/// Provider-specific rendering of an event
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedPayload {
    pub subject: String,
    /// Plain-text body (email)
    pub text: String,
    /// JSON body (webhook-based providers)
    pub body: Value,
}

/// A failed delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryError {
    pub retryable: bool,
    pub message: String,
}

impl DeliveryError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.retryable {
            f.write_str(&self.message)
        } else {
            write!(f, "non-retryable: {}", self.message)
        }
    }
}

impl std::error::Error for DeliveryError {}

/// Delivers events through one provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    fn render(&self, event: &Event) -> RenderedPayload;

    async fn send(
        &self,
        destination: &Destination,
        payload: &RenderedPayload,
    ) -> Result<(), DeliveryError>;
}

/// Settings shared by the built-in adapters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderSettings {
    /// Sender name in chat payloads and the webhook `source` field
    pub source_name: Option<String>,
    pub smtp: Option<SmtpSettings>,
}

impl ProviderSettings {
    pub fn source_name(&self) -> String {
        self.source_name
            .clone()
            .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string())
    }
}

/// Adapters keyed by provider
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    adapters: HashMap<Provider, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with an adapter for every provider
    pub fn with_defaults(client: reqwest::Client, settings: &ProviderSettings) -> Self {
        let source = settings.source_name();
        let mut registry = Self::new();
        registry.register(Arc::new(SlackAdapter::new(client.clone(), &source)));
        registry.register(Arc::new(DiscordAdapter::new(client.clone(), &source)));
        registry.register(Arc::new(TeamsAdapter::new(client.clone(), &source)));
        registry.register(Arc::new(WebhookAdapter::new(client, &source)));
        registry.register(Arc::new(EmailAdapter::new(settings.smtp.clone(), &source)));
        registry
    }

    /// Add or replace the adapter for its provider
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }

    pub fn has(&self, provider: Provider) -> bool {
        self.adapters.contains_key(&provider)
    }
}

/// Convert an event type like `deployment.failed` into a title
pub(crate) fn title_case(event_type: &str) -> String {
    event_type
        .split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// POST a JSON body to a webhook URL, mapping failures to delivery errors
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: Vec<u8>,
    headers: &[(&str, String)],
) -> Result<(), DeliveryError> {
    let url = reqwest::Url::parse(url)
        .map_err(|e| DeliveryError::permanent(format!("invalid webhook URL: {}", e)))?;

    let mut request = client
        .post(url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body);
    for (name, value) in headers {
        request = request.header(*name, value);
    }

    let response = request.send().await.map_err(|e| classify_send_error(&e))?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let detail = response.text().await.unwrap_or_default();
    let detail = detail.trim();
    let message = if detail.is_empty() {
        format!("webhook returned status {}", status)
    } else {
        format!("webhook returned status {}: {}", status, truncate(detail, 200))
    };

    if is_retryable_status(status.as_u16()) {
        Err(DeliveryError::retryable(message))
    } else {
        Err(DeliveryError::permanent(message))
    }
}

/// 5xx, 408 and 429 are worth retrying; other non-2xx codes are not
pub fn is_retryable_status(code: u16) -> bool {
    code >= 500 || code == 408 || code == 429
}

fn classify_send_error(err: &reqwest::Error) -> DeliveryError {
    if err.is_builder() {
        DeliveryError::permanent(format!("invalid request: {}", err))
    } else if err.is_timeout() {
        DeliveryError::retryable(format!("request timed out: {}", err))
    } else {
        DeliveryError::retryable(format!("request failed: {}", err))
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Webhook URL of a chat destination
pub(crate) fn webhook_url(destination: &Destination) -> Result<&str, DeliveryError> {
    match destination {
        Destination::Webhook { url, .. } => Ok(url),
        Destination::Email { .. } => Err(DeliveryError::permanent(
            "destination is not a webhook",
        )),
    }
}
