//! Mail delivery.
//!
//! A [`MailTransport`] delivers one rendered email to the configured
//! recipients. Delivery is attempted exactly once per call; callers decide
//! what to do with a failure.

mod smtp;

pub use smtp::SmtpTransport;

use async_trait::async_trait;
use thiserror::Error;

use crate::render::RenderedEmail;

/// Outcome of a delivery that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The relay accepted the message.
    Sent,
    /// Delivery settings are incomplete; no connection was attempted.
    NotConfigured,
}

/// Delivery failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid email address '{address}': {source}")]
    Address {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("Failed to build email message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl TransportError {
    /// Whether the failure happened while talking to the relay.
    pub fn is_smtp(&self) -> bool {
        matches!(self, Self::Smtp(_))
    }

    /// Short classification for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Address { .. } => "address",
            Self::Message(_) => "message",
            Self::Smtp(e) if e.is_permanent() => "smtp_permanent",
            Self::Smtp(e) if e.is_transient() => "smtp_transient",
            Self::Smtp(e) if e.is_timeout() => "smtp_timeout",
            Self::Smtp(_) => "smtp",
        }
    }
}

/// Trait for mail transports.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Whether every setting needed for delivery is present.
    fn is_configured(&self) -> bool;

    /// Deliver `email` to all recipients in a single message.
    async fn send(&self, email: &RenderedEmail) -> Result<SendOutcome, TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport used by the aggregator and command tests.

    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Behavior {
        Deliver,
        NotConfigured,
        FailAddress,
    }

    pub struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<RenderedEmail>>>,
        behavior: Behavior,
        delay: Duration,
    }

    impl RecordingTransport {
        pub fn new(behavior: Behavior) -> Self {
            Self {
                sent: Arc::new(Mutex::new(Vec::new())),
                behavior,
                delay: Duration::ZERO,
            }
        }

        /// Simulate a slow relay.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn sent(&self) -> Vec<RenderedEmail> {
            self.sent.lock().clone()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().len()
        }
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        fn is_configured(&self) -> bool {
            self.behavior != Behavior::NotConfigured
        }

        async fn send(&self, email: &RenderedEmail) -> Result<SendOutcome, TransportError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.behavior {
                Behavior::Deliver => {
                    self.sent.lock().push(email.clone());
                    Ok(SendOutcome::Sent)
                }
                Behavior::NotConfigured => Ok(SendOutcome::NotConfigured),
                Behavior::FailAddress => {
                    let source = "not an address"
                        .parse::<lettre::Address>()
                        .expect_err("invalid address must not parse");
                    Err(TransportError::Address {
                        address: "not an address".to_string(),
                        source,
                    })
                }
            }
        }
    }
}
