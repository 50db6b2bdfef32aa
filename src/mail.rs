//! Mail dispatcher: forwards finished incident reports to the support mailbox.
//!
//! One message per report: a text/plain body plus, when a screenshot was
//! stored, one base64 `application/octet-stream` attachment. Submission is
//! a blocking STARTTLS session via lettre, run on the blocking pool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::MailConfig;
use crate::conversation::session::IncidentReport;
use crate::error::DeliveryError;

/// A composed email, before transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

impl OutgoingMail {
    /// Subject names severity and reporter; the body is the description as typed.
    pub fn from_report(report: &IncidentReport) -> Self {
        Self {
            subject: format!(
                "[{}] Incidencia de {}",
                report.severity, report.display_name
            ),
            body: report.description.clone(),
            attachment: report.attachment.path().cloned(),
        }
    }
}

/// Delivers a composed email.
#[async_trait]
pub trait MailDispatcher: Send + Sync {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError>;
}

/// SMTP submission with STARTTLS and username/password auth.
pub struct SmtpMailDispatcher {
    config: MailConfig,
}

impl SmtpMailDispatcher {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Compose the message for `mail`, reading the attachment from disk.
    pub async fn build_message(&self, mail: &OutgoingMail) -> Result<Message, DeliveryError> {
        let from = parse_mailbox("from", &self.config.address)?;
        let to = parse_mailbox("to", &self.config.destination)?;

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(mail.body.clone()));

        if let Some(path) = &mail.attachment {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| DeliveryError::Attachment {
                    path: path.display().to_string(),
                    source,
                })?;
            let content_type = ContentType::parse("application/octet-stream")
                .map_err(|e| DeliveryError::Build(e.to_string()))?;
            parts = parts.singlepart(Attachment::new(file_name(path)).body(bytes, content_type));
        }

        Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .multipart(parts)
            .map_err(|e| DeliveryError::Build(e.to_string()))
    }
}

#[async_trait]
impl MailDispatcher for SmtpMailDispatcher {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let email = self.build_message(mail).await?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let creds = Credentials::new(
                config.address.clone(),
                config.password.expose_secret().to_string(),
            );

            let transport = SmtpTransport::starttls_relay(&config.smtp_host)
                .map_err(|e| DeliveryError::Relay(e.to_string()))?
                .port(config.smtp_port)
                .credentials(creds)
                .build();

            transport
                .send(&email)
                .map_err(|e| DeliveryError::Send(e.to_string()))?;
            Ok::<(), DeliveryError>(())
        })
        .await
        .map_err(|e| DeliveryError::Aborted(e.to_string()))??;

        tracing::info!(
            to = %self.config.destination,
            subject = %mail.subject,
            with_attachment = mail.attachment.is_some(),
            "Incident email sent"
        );
        Ok(())
    }
}

fn parse_mailbox(field: &'static str, address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| DeliveryError::InvalidAddress {
            field,
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("captura.jpg")
        .to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::conversation::session::AttachmentRef;
    use crate::conversation::severity::Severity;

    fn config() -> MailConfig {
        MailConfig {
            smtp_host: "smtp.example.com".into(),
            smtp_port: 587,
            address: "bot@example.com".into(),
            destination: "soporte@example.com".into(),
            password: SecretString::from("pass".to_string()),
        }
    }

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).to_string()
    }

    #[test]
    fn mail_from_report() {
        let report = IncidentReport {
            display_name: "Lucía".into(),
            severity: Severity::High,
            attachment: AttachmentRef::Skipped,
            description: "El PC no arranca".into(),
        };
        let mail = OutgoingMail::from_report(&report);
        assert_eq!(mail.subject, "[High] Incidencia de Lucía");
        assert_eq!(mail.body, "El PC no arranca");
        assert!(mail.attachment.is_none());
    }

    #[tokio::test]
    async fn message_without_attachment_is_text_only() {
        let dispatcher = SmtpMailDispatcher::new(config());
        let mail = OutgoingMail {
            subject: "[Low] Incidencia de ana".into(),
            body: "La copia ha fallado".into(),
            attachment: None,
        };

        let raw = formatted(&dispatcher.build_message(&mail).await.unwrap());

        assert!(raw.contains("From: bot@example.com"));
        assert!(raw.contains("To: soporte@example.com"));
        assert!(raw.contains("Subject: [Low] Incidencia de ana"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("La copia ha fallado"));
        assert!(!raw.contains("Content-Disposition: attachment"));
    }

    #[tokio::test]
    async fn message_with_attachment_carries_base64_part() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ana_20240305_090701.jpg");
        std::fs::write(&path, b"\xFF\xD8\xFF\xE0\x00\x10").unwrap();

        let dispatcher = SmtpMailDispatcher::new(config());
        let mail = OutgoingMail {
            subject: "[Critical] Incidencia de ana".into(),
            body: "Pantalla azul".into(),
            attachment: Some(path),
        };

        let raw = formatted(&dispatcher.build_message(&mail).await.unwrap());

        assert!(raw.contains("Content-Disposition: attachment"));
        assert!(raw.contains("ana_20240305_090701.jpg"));
        assert!(raw.contains("application/octet-stream"));
        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        assert!(raw.contains("/9j/4AAQ"));
    }

    #[tokio::test]
    async fn missing_attachment_file_is_a_delivery_error() {
        let dispatcher = SmtpMailDispatcher::new(config());
        let mail = OutgoingMail {
            subject: "s".into(),
            body: "b".into(),
            attachment: Some(PathBuf::from("/nonexistent/shot.jpg")),
        };
        let err = dispatcher.build_message(&mail).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Attachment { .. }));
    }

    #[tokio::test]
    async fn invalid_destination_rejected() {
        let mut cfg = config();
        cfg.destination = "not an address".into();
        let dispatcher = SmtpMailDispatcher::new(cfg);
        let mail = OutgoingMail {
            subject: "s".into(),
            body: "b".into(),
            attachment: None,
        };
        let err = dispatcher.build_message(&mail).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { field: "to", .. }));
    }
}
