//! Administrator commands.
//!
//! Each handler returns a typed outcome; [`CommandReply::message`] gives the
//! short text shown to the administrator.

use serde::Serialize;
use tracing::error;

use crate::monitor::{AggregatorStatus, ExceptionMonitor};
use crate::render::TestEmailContext;
use crate::transport::SendOutcome;

/// Something that can be shown to the administrator.
pub trait CommandReply {
    fn message(&self) -> String;
}

/// Result of `exception_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StatusReply {
    NotInitialized,
    Ready(AggregatorStatus),
}

impl CommandReply for StatusReply {
    fn message(&self) -> String {
        match self {
            Self::NotInitialized => "Monitoring service is not initialized.".to_string(),
            Self::Ready(status) => {
                let mut text = String::from("Error monitor status:\n");
                text.push_str(&format!(
                    "• Email settings: {}\n",
                    if status.email_configured {
                        "configured"
                    } else {
                        "not configured"
                    }
                ));
                text.push_str(&format!(
                    "• Emails sent this window: {}/{}\n",
                    status.emails_sent, status.max_emails_per_hour
                ));
                text.push_str(&format!("• Cached exceptions: {}\n", status.cache_size));
                text
            }
        }
    }
}

/// Result of `clear_exception_cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ClearCacheReply {
    NotInitialized,
    Cleared { count: usize },
}

impl CommandReply for ClearCacheReply {
    fn message(&self) -> String {
        match self {
            Self::NotInitialized => "Monitoring service is not initialized.".to_string(),
            Self::Cleared { count } => format!("Cleared {} cached exception record(s).", count),
        }
    }
}

/// Result of `test_error_email`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestEmailReply {
    /// Monitoring disabled or services not built.
    Unavailable,
    Sent,
    NotConfigured,
    SmtpError,
    UnknownError,
}

impl CommandReply for TestEmailReply {
    fn message(&self) -> String {
        match self {
            Self::Unavailable => {
                "Monitoring is disabled or the mail service is not initialized.".to_string()
            }
            Self::Sent => "Test email sent, please check your inbox.".to_string(),
            Self::NotConfigured => {
                "Test email not sent: mail delivery is not configured.".to_string()
            }
            Self::SmtpError => {
                "Test email failed: SMTP service error, check the server logs.".to_string()
            }
            Self::UnknownError => "Test email failed: an unknown error occurred.".to_string(),
        }
    }
}

/// Show quota usage, cache size and whether mail delivery is configured.
pub fn handle_exception_status(monitor: &ExceptionMonitor) -> StatusReply {
    match monitor.aggregator() {
        Some(aggregator) => StatusReply::Ready(aggregator.status()),
        None => StatusReply::NotInitialized,
    }
}

/// Empty the recent-log cache.
pub fn handle_clear_cache(monitor: &ExceptionMonitor) -> ClearCacheReply {
    match monitor.aggregator() {
        Some(aggregator) => ClearCacheReply::Cleared {
            count: aggregator.clear_cache(),
        },
        None => ClearCacheReply::NotInitialized,
    }
}

/// Render and send a test email, bypassing the aggregator and its quota.
pub async fn handle_test_email(monitor: &ExceptionMonitor, ctx: TestEmailContext) -> TestEmailReply {
    if !monitor.is_enabled() {
        return TestEmailReply::Unavailable;
    }
    let Some(services) = monitor.services() else {
        return TestEmailReply::Unavailable;
    };

    let email = match services.renderer.render_test(&ctx) {
        Ok(email) => email,
        Err(e) => {
            error!(error = %e, "Unexpected error while rendering test email");
            return TestEmailReply::UnknownError;
        }
    };

    match services.transport.send(&email).await {
        Ok(SendOutcome::Sent) => TestEmailReply::Sent,
        Ok(SendOutcome::NotConfigured) => TestEmailReply::NotConfigured,
        Err(e) if e.is_smtp() => {
            error!(error_kind = e.kind(), error = %e, "Test email SMTP error");
            TestEmailReply::SmtpError
        }
        Err(e) => {
            error!(error_kind = e.kind(), error = %e, "Unexpected error while sending test email");
            TestEmailReply::UnknownError
        }
    }
}
