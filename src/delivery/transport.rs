//! Outbound mail transport and send-failure classification.

use std::fmt;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::pipeline::types::OutboundMessage;

/// Provider classification of a failed send.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SendErrorCode {
    /// The sending domain is not (yet) verified with the provider.
    MailFromDomainNotVerified,
    Throttling,
    ServiceUnavailable,
    /// Recipient or content permanently refused.
    MessageRejected,
    /// The message could not be built (bad address, bad header).
    InvalidParameterValue,
    Other(String),
}

impl SendErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::MailFromDomainNotVerified => "MailFromDomainNotVerifiedException",
            Self::Throttling => "Throttling",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::MessageRejected => "MessageRejected",
            Self::InvalidParameterValue => "InvalidParameterValue",
            Self::Other(code) => code,
        }
    }
}

impl fmt::Display for SendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed send attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct SendError {
    pub code: SendErrorCode,
    pub message: String,
}

impl SendError {
    pub fn new(code: SendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Something that can send one outbound message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;
}

// ── SMTP ────────────────────────────────────────────────────────────

/// SMTP relay settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Envelope and header From address.
    pub from_address: String,
}

/// Sends mail through an SMTP relay with lettre.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, SendError> {
        let mut builder = SmtpTransport::relay(&settings.host)
            .map_err(|e| {
                SendError::new(
                    SendErrorCode::InvalidParameterValue,
                    format!("SMTP relay error: {e}"),
                )
            })?
            .port(settings.port);

        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(
                user.clone(),
                pass.expose_secret().to_string(),
            ));
        }

        let from = settings.from_address.parse::<Mailbox>().map_err(|e| {
            SendError::new(
                SendErrorCode::InvalidParameterValue,
                format!("Invalid from address: {e}"),
            )
        })?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn build_message(&self, message: &OutboundMessage) -> Result<Message, SendError> {
        let invalid = |what: &str, e: &dyn fmt::Display| {
            SendError::new(SendErrorCode::InvalidParameterValue, format!("{what}: {e}"))
        };

        let to = message
            .recipient
            .parse::<Mailbox>()
            .map_err(|e| invalid("Invalid to address", &e))?;

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.as_str());

        if let Some(reply_to) = &message.reply_to {
            let reply_to = reply_to
                .parse::<Mailbox>()
                .map_err(|e| invalid("Invalid reply-to address", &e))?;
            builder = builder.reply_to(reply_to);
        }

        builder
            .body(message.body.clone())
            .map_err(|e| invalid("Failed to build email", &e))
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let email = self.build_message(message)?;
        let transport = self.transport.clone();

        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .map_err(|e| {
                SendError::new(
                    SendErrorCode::ServiceUnavailable,
                    format!("SMTP task failed: {e}"),
                )
            })?
            .map_err(|e| classify_smtp_error(&e))?;

        debug!(recipient = %message.recipient, "SMTP send accepted");
        Ok(())
    }
}

/// Map an SMTP failure onto a provider error code.
pub fn classify_smtp_error(err: &lettre::transport::smtp::Error) -> SendError {
    let code = match err.status().map(|c| c.to_string()) {
        Some(status) => classify_smtp_status(&status, err.is_transient()),
        None if err.is_timeout() || err.is_transient() => SendErrorCode::ServiceUnavailable,
        None if err.is_permanent() => SendErrorCode::MessageRejected,
        // Connection, TLS, and I/O failures carry no reply code.
        None => SendErrorCode::ServiceUnavailable,
    };
    SendError::new(code, err.to_string())
}

fn classify_smtp_status(status: &str, transient: bool) -> SendErrorCode {
    match status {
        "421" => SendErrorCode::ServiceUnavailable,
        "450" | "451" | "452" => SendErrorCode::Throttling,
        _ if status.starts_with('4') || transient => SendErrorCode::ServiceUnavailable,
        _ if status.starts_with('5') => SendErrorCode::MessageRejected,
        other => SendErrorCode::Other(format!("Smtp{other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailer() -> SmtpMailer {
        SmtpMailer::new(&SmtpSettings {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("relay".into()),
            password: Some(SecretString::from("secret")),
            from_address: "contact@example.com".into(),
        })
        .unwrap()
    }

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_smtp_status("421", true),
            SendErrorCode::ServiceUnavailable
        );
        assert_eq!(classify_smtp_status("450", true), SendErrorCode::Throttling);
        assert_eq!(classify_smtp_status("452", true), SendErrorCode::Throttling);
        assert_eq!(
            classify_smtp_status("454", true),
            SendErrorCode::ServiceUnavailable
        );
        assert_eq!(
            classify_smtp_status("550", false),
            SendErrorCode::MessageRejected
        );
    }

    #[test]
    fn codes_render_as_provider_names() {
        assert_eq!(
            SendErrorCode::MailFromDomainNotVerified.to_string(),
            "MailFromDomainNotVerifiedException"
        );
        let err = SendError::new(SendErrorCode::Throttling, "slow down");
        assert_eq!(err.to_string(), "Throttling: slow down");
    }

    #[test]
    fn builds_message_with_reply_to() {
        let msg = mailer()
            .build_message(&OutboundMessage {
                recipient: "owner@private.example".into(),
                subject: "Fwd: Hello".into(),
                body: "body".into(),
                reply_to: Some("alice-at-example.com@thread.example.com".into()),
            })
            .unwrap();
        let raw = String::from_utf8(msg.formatted()).unwrap();
        assert!(raw.contains("Reply-To: alice-at-example.com@thread.example.com"));
        assert!(raw.contains("From: contact@example.com"));
        assert!(raw.contains("Subject: Fwd: Hello"));
    }

    #[test]
    fn bad_recipient_is_invalid_parameter() {
        let err = mailer()
            .build_message(&OutboundMessage {
                recipient: "not an address".into(),
                subject: "s".into(),
                body: "b".into(),
                reply_to: None,
            })
            .unwrap_err();
        assert_eq!(err.code, SendErrorCode::InvalidParameterValue);
    }
}
