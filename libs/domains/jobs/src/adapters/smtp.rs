//! SMTP delivery through lettre. Without TLS it targets local catchers
//! such as Mailpit; with TLS it talks to a real relay.

use async_trait::async_trait;
use core_config::SmtpSettings;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::collaborators::EmailSender;
use crate::error::{DomainError, DomainResult};
use crate::templates::OutgoingEmail;

pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    /// Right-hand side of generated Message-IDs.
    domain: String,
    host: String,
}

impl SmtpEmailSender {
    pub fn new(
        settings: &SmtpSettings,
        from_email: &str,
        from_name: &str,
        timeout: Duration,
    ) -> DomainResult<Self> {
        let from: Mailbox = format!("{} <{}>", from_name, from_email)
            .parse()
            .map_err(|e| DomainError::Provider(format!("invalid sender address: {}", e)))?;
        let domain = from_email
            .split_once('@')
            .map(|(_, d)| d.to_string())
            .unwrap_or_else(|| "localhost".to_string());

        let mut builder = if settings.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| DomainError::Provider(format!("failed to create SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
        }
        .port(settings.port)
        .timeout(Some(timeout));

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
            domain,
            host: settings.host.clone(),
        })
    }

    fn build_message(&self, email: &OutgoingEmail, idempotency_key: &str) -> DomainResult<Message> {
        let to: Mailbox = email.to.parse().map_err(|e| {
            DomainError::Validation(format!("invalid recipient '{}': {}", email.to, e))
        })?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(email.subject.clone())
            .message_id(Some(format!("<{}@{}>", idempotency_key, self.domain)));

        let message = match &email.html {
            Some(html) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(email.text.clone()))
                    .singlepart(SinglePart::html(html.clone())),
            ),
            None => builder.header(ContentType::TEXT_PLAIN).body(email.text.clone()),
        };
        message.map_err(|e| DomainError::Validation(format!("failed to build message: {}", e)))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, email: &OutgoingEmail, idempotency_key: &str) -> DomainResult<String> {
        debug!(to = %email.to, host = %self.host, "Sending email via SMTP");
        let message = self.build_message(email, idempotency_key)?;

        self.transport.send(message).await.map_err(|e| {
            error!(to = %email.to, error = %e, "SMTP send failed");
            if e.is_permanent() {
                DomainError::Rejected(format!("SMTP rejected message: {}", e))
            } else {
                DomainError::Provider(format!("SMTP send failed: {}", e))
            }
        })?;

        let message_id = format!("{}@{}", idempotency_key, self.domain);
        info!(to = %email.to, message_id = %message_id, "Email sent via SMTP");
        Ok(message_id)
    }
}
