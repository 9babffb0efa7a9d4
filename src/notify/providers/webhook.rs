//! Generic JSON webhook adapter with optional HMAC signing

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

use super::{post_json, DeliveryError, ProviderAdapter, RenderedPayload};
use crate::notify::channel::{Destination, Provider};
use crate::notify::event::Event;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the request body
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub struct WebhookAdapter {
    client: reqwest::Client,
    source: String,
}

impl WebhookAdapter {
    pub fn new(client: reqwest::Client, source: &str) -> Self {
        Self {
            client,
            source: source.to_string(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for WebhookAdapter {
    fn provider(&self) -> Provider {
        Provider::Webhook
    }

    fn render(&self, event: &Event) -> RenderedPayload {
        let body = json!({
            "event": event.event_type,
            "timestamp": event.timestamp.to_rfc3339(),
            "source": self.source,
            "severity": event.severity,
            "subject": event.subject,
            "message": event.message,
            "data": event.data,
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
        let Destination::Webhook { url, secret } = destination else {
            return Err(DeliveryError::permanent("destination is not a webhook"));
        };

        let body = serde_json::to_vec(&payload.body)
            .map_err(|e| DeliveryError::permanent(format!("unserializable payload: {}", e)))?;

        let mut headers = Vec::new();
        if let Some(secret) = secret.as_deref().filter(|s| !s.is_empty()) {
            headers.push((SIGNATURE_HEADER, sign(secret, &body)));
        }

        post_json(&self.client, url, body, &headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::webhook_sink;
    use axum::http::StatusCode;

    fn adapter() -> WebhookAdapter {
        WebhookAdapter::new(reqwest::Client::new(), "healthwatch")
    }

    fn signed(url: String, secret: &str) -> Destination {
        Destination::Webhook {
            url,
            secret: Some(secret.to_string()),
        }
    }

    #[test]
    fn test_sign_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            sign("Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_render_envelope() {
        let event = Event::new("deployment.success", "Deployed shop", "v2 live")
            .with_field("project", "shop");
        let payload = adapter().render(&event);

        assert_eq!(payload.body["event"], "deployment.success");
        assert_eq!(payload.body["source"], "healthwatch");
        assert_eq!(payload.body["subject"], "Deployed shop");
        assert_eq!(payload.body["message"], "v2 live");
        assert_eq!(payload.body["data"]["project"], "shop");
        assert!(payload.body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_signature_matches_body() {
        let (url, sink) = webhook_sink(StatusCode::OK).await;
        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "web-1 down", "timeout"));

        adapter.send(&signed(url, "s3cret"), &payload).await.unwrap();

        let requests = sink.requests();
        let signature = requests[0]
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap()
            .to_string();
        assert_eq!(signature, sign("s3cret", &requests[0].body));
        assert_eq!(requests[0].json()["event"], "server.down");
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let (url, sink) = webhook_sink(StatusCode::NO_CONTENT).await;
        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "x", "y"));

        adapter.send(&Destination::webhook(url), &payload).await.unwrap();
        assert!(sink.requests()[0].headers.get(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let (url, _sink) = webhook_sink(StatusCode::BAD_REQUEST).await;
        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "x", "y"));

        let err = adapter
            .send(&Destination::webhook(url), &payload)
            .await
            .unwrap_err();
        assert!(!err.retryable);
        assert!(err.to_string().starts_with("non-retryable:"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "x", "y"));
        let err = adapter
            .send(&Destination::webhook(format!("http://{}/hook", addr)), &payload)
            .await
            .unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_malformed_url_is_permanent() {
        let adapter = adapter();
        let payload = adapter.render(&Event::new("server.down", "x", "y"));
        let err = adapter
            .send(&Destination::webhook("not a url"), &payload)
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
