//! Discord webhook adapter

use async_trait::async_trait;
use serde_json::json;

use super::{post_json, webhook_url, DeliveryError, ProviderAdapter, RenderedPayload};
use crate::notify::channel::{Destination, Provider};
use crate::notify::event::{Event, Severity};

/// Embed colour (decimal RGB) for a severity
pub fn color(severity: Severity) -> u32 {
    match severity {
        Severity::Success => 3066993,
        Severity::Warning => 16753920,
        Severity::Error => 15158332,
        Severity::Info => 3447003,
    }
}

pub struct DiscordAdapter {
    client: reqwest::Client,
    source: String,
}

impl DiscordAdapter {
    pub fn new(client: reqwest::Client, source: &str) -> Self {
        Self {
            client,
            source: source.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for DiscordAdapter {
    fn provider(&self) -> Provider {
        Provider::Discord
    }

    fn render(&self, event: &Event) -> RenderedPayload {
        let fields: Vec<_> = event
            .fields()
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value, "inline": true }))
            .collect();

        let body = json!({
            "username": self.source,
            "embeds": [{
                "title": event.subject,
                "description": event.message,
                "color": color(event.severity),
                "fields": fields,
                "footer": { "text": self.source },
                "timestamp": event.timestamp.to_rfc3339(),
            }],
        });

        RenderedPayload {
            subject: event.subject.clone(),
            text: event.message.clone(),
            body,
        }
    }

    async fn send(
        &self,
        destination: &Destination,
        payload: &RenderedPayload,
    ) -> Result<(), DeliveryError> {
        let url = webhook_url(destination)?;
        let body = serde_json::to_vec(&payload.body)
            .map_err(|e| DeliveryError::permanent(format!("unserializable payload: {}", e)))?;
        post_json(&self.client, url, body, &[]).await
    }
}
