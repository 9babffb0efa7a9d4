//! Slack incoming-webhook adapter

use async_trait::async_trait;
use serde_json::json;

use super::{post_json, webhook_url, DeliveryError, ProviderAdapter, RenderedPayload};
use crate::notify::channel::{Destination, Provider};
use crate::notify::event::{Event, Severity};

/// Attachment colour for a severity
pub fn color(severity: Severity) -> &'static str {
    match severity {
        Severity::Success => "#36a64f",
        Severity::Warning => "#ff9800",
        Severity::Error => "#f44336",
        Severity::Info => "#2196f3",
    }
}

pub struct SlackAdapter {
    client: reqwest::Client,
    source: String,
}

impl SlackAdapter {
    pub fn new(client: reqwest::Client, source: &str) -> Self {
        Self {
            client,
            source: source.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for SlackAdapter {
    fn provider(&self) -> Provider {
        Provider::Slack
    }

    fn render(&self, event: &Event) -> RenderedPayload {
        let fields: Vec<_> = event
            .fields()
            .into_iter()
            .map(|(title, value)| json!({ "title": title, "value": value, "short": true }))
            .collect();

        let body = json!({
            "username": self.source,
            "icon_emoji": ":rotating_light:",
            "text": event.subject,
            "attachments": [{
                "color": color(event.severity),
                "title": event.subject,
                "text": event.message,
                "fields": fields,
                "footer": self.source,
                "ts": event.timestamp.timestamp(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::webhook_sink;
    use axum::http::StatusCode;

    fn adapter() -> SlackAdapter {
        SlackAdapter::new(reqwest::Client::new(), "healthwatch")
    }

    #[test]
    fn test_render_attachment() {
        let event = Event::new("deployment.failed", "Deploy failed: shop", "exit code 1")
            .with_field("branch", "main");
        let payload = adapter().render(&event);

        let attachment = &payload.body["attachments"][0];
        assert_eq!(payload.body["username"], "healthwatch");
        assert_eq!(attachment["color"], "#f44336");
        assert_eq!(attachment["title"], "Deploy failed: shop");
        assert_eq!(attachment["text"], "exit code 1");
        assert_eq!(attachment["fields"][0]["title"], "branch");
        assert_eq!(attachment["fields"][0]["value"], "main");
        assert_eq!(attachment["ts"], event.timestamp.timestamp());
    }

    #[test]
    fn test_colors() {
        assert_eq!(color(Severity::Success), "#36a64f");
        assert_eq!(color(Severity::Warning), "#ff9800");
        assert_eq!(color(Severity::Info), "#2196f3");
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let (url, sink) = webhook_sink(StatusCode::OK).await;
        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "web-1 down", "no response"));

        adapter
            .send(&Destination::webhook(url), &payload)
            .await
            .unwrap();

        let requests = sink.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].json()["attachments"][0]["title"], "web-1 down");
    }

    #[tokio::test]
    async fn test_send_rejects_email_destination() {
        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "x", "y"));
        let err = adapter
            .send(&Destination::email("ops@example.com"), &payload)
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
