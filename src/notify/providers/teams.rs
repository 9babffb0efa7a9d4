//! Microsoft Teams connector adapter (legacy MessageCard format)

use async_trait::async_trait;
use serde_json::json;

use super::{post_json, webhook_url, DeliveryError, ProviderAdapter, RenderedPayload};
use crate::notify::channel::{Destination, Provider};
use crate::notify::event::{Event, Severity};

fn theme_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Success => "00C853",
        Severity::Warning => "FF9800",
        Severity::Error => "D32F2F",
        Severity::Info => "0076D7",
    }
}

pub struct TeamsAdapter {
    client: reqwest::Client,
    source: String,
}

impl TeamsAdapter {
    pub fn new(client: reqwest::Client, source: &str) -> Self {
        Self {
            client,
            source: source.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for TeamsAdapter {
    fn provider(&self) -> Provider {
        Provider::Teams
    }

    fn render(&self, event: &Event) -> RenderedPayload {
        let facts: Vec<_> = event
            .fields()
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        let body = json!({
            "@type": "MessageCard",
            "@context": "https://schema.org/extensions",
            "themeColor": theme_color(event.severity),
            "summary": event.subject,
            "sections": [{
                "activityTitle": event.subject,
                "activitySubtitle": self.source,
                "text": event.message,
                "facts": facts,
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
