//! SMTP email adapter

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use serde_json::json;

use super::{title_case, DeliveryError, ProviderAdapter, RenderedPayload};
use crate::notify::channel::{Destination, Provider};
use crate::notify::event::Event;

/// SMTP relay settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. `Alerts <alerts@example.com>`
    pub from: String,
    /// Use STARTTLS/implicit TLS through the relay builder
    #[serde(default = "default_tls")]
    pub tls: bool,
}

fn default_port() -> u16 {
    587
}

fn default_tls() -> bool {
    true
}

pub struct EmailAdapter {
    smtp: Option<SmtpSettings>,
    source: String,
}

impl EmailAdapter {
    pub fn new(smtp: Option<SmtpSettings>, source: &str) -> Self {
        Self {
            smtp,
            source: source.to_string(),
        }
    }

    fn transport(
        &self,
        smtp: &SmtpSettings,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let mut builder = if smtp.tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .map_err(|e| DeliveryError::permanent(format!("invalid SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        }
        .port(smtp.port);

        if let (Some(user), Some(pass)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(builder.build())
    }
}

fn classify_smtp(err: &lettre::transport::smtp::Error) -> DeliveryError {
    let message = format!("SMTP delivery failed: {}", err);
    if err.is_permanent() || err.is_client() {
        DeliveryError::permanent(message)
    } else {
        DeliveryError::retryable(message)
    }
}

#[async_trait]
impl ProviderAdapter for EmailAdapter {
    fn provider(&self) -> Provider {
        Provider::Email
    }

    fn render(&self, event: &Event) -> RenderedPayload {
        let subject = format!("[{}] {}", self.source, event.subject);

        let mut text = format!("{}\n", event.message);
        let fields = event.fields();
        if !fields.is_empty() {
            text.push('\n');
            for (key, value) in fields {
                text.push_str(&format!("{}: {}\n", key, value));
            }
        }
        text.push_str(&format!(
            "\nEvent: {}\nTime: {}\n",
            title_case(&event.event_type),
            event.timestamp.to_rfc3339()
        ));

        RenderedPayload {
            body: json!({ "subject": subject, "text": text }),
            subject,
            text,
        }
    }

    async fn send(
        &self,
        destination: &Destination,
        payload: &RenderedPayload,
    ) -> Result<(), DeliveryError> {
        let Destination::Email { address } = destination else {
            return Err(DeliveryError::permanent("destination is not an email address"));
        };
        let Some(smtp) = &self.smtp else {
            return Err(DeliveryError::permanent("SMTP is not configured"));
        };

        let from: Mailbox = smtp
            .from
            .parse()
            .map_err(|e| DeliveryError::permanent(format!("invalid sender address: {}", e)))?;
        let to: Mailbox = address
            .trim()
            .parse()
            .map_err(|e| DeliveryError::permanent(format!("invalid recipient address: {}", e)))?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(payload.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(payload.text.clone())
            .map_err(|e| DeliveryError::permanent(format!("invalid message: {}", e)))?;

        self.transport(smtp)?
            .send(message)
            .await
            .map_err(|e| classify_smtp(&e))?;

        tracing::debug!(recipient = %address, "Email notification sent");
        Ok(())
    }
}
