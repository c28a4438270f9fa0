//! SMTP transport built on lettre.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use super::{MailTransport, SendOutcome, TransportError};
use crate::config::SmtpSettings;
use crate::render::RenderedEmail;

/// Port on which the relay expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Upper bound for a single SMTP exchange.
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers emails through an authenticated SMTP relay.
pub struct SmtpTransport {
    settings: SmtpSettings,
    recipients: Vec<String>,
}

impl SmtpTransport {
    pub fn new(settings: SmtpSettings, recipients: Vec<String>) -> Self {
        let recipients = recipients
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        Self {
            settings,
            recipients,
        }
    }

    fn build_message(&self, email: &RenderedEmail) -> Result<Message, TransportError> {
        let mut builder = Message::builder()
            .from(parse_mailbox(self.settings.sender())?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_HTML);

        for recipient in &self.recipients {
            builder = builder.to(parse_mailbox(recipient)?);
        }

        Ok(builder.body(email.body.clone())?)
    }

    fn build_mailer(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let host = self.settings.smtp_server.trim();
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(self.settings.smtp_port)
            .timeout(Some(SMTP_TIMEOUT))
            .credentials(Credentials::new(
                self.settings.smtp_username.clone(),
                self.settings.smtp_password.clone(),
            ));

        if self.settings.enable_ssl {
            let params = TlsParameters::new(host.to_string())?;
            // STARTTLS is mandatory: a relay that does not offer the upgrade
            // fails the send before any credentials are written.
            let tls = if self.settings.smtp_port == IMPLICIT_TLS_PORT {
                Tls::Wrapper(params)
            } else {
                Tls::Required(params)
            };
            builder = builder.tls(tls);
        }

        Ok(builder.build())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|source| TransportError::Address {
            address: address.to_string(),
            source,
        })
}

#[async_trait]
impl MailTransport for SmtpTransport {
    fn is_configured(&self) -> bool {
        !self.settings.smtp_server.trim().is_empty()
            && self.settings.smtp_port != 0
            && !self.settings.smtp_username.is_empty()
            && !self.settings.smtp_password.is_empty()
            && !self.recipients.is_empty()
    }

    async fn send(&self, email: &RenderedEmail) -> Result<SendOutcome, TransportError> {
        if !self.is_configured() {
            warn!("Mail delivery is not configured, email not sent");
            return Ok(SendOutcome::NotConfigured);
        }

        let message = self.build_message(email)?;
        let mailer = self.build_mailer()?;

        debug!(
            host = %self.settings.smtp_server,
            port = self.settings.smtp_port,
            tls = self.settings.enable_ssl,
            "Connecting to SMTP relay"
        );
        mailer.send(message).await?;

        info!(recipients = %self.recipients.join(", "), "Exception email sent");
        Ok(SendOutcome::Sent)
    }
}
