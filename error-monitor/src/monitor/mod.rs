//! Exception monitoring.
//!
//! [`ExceptionMonitor`] is the facade the host talks to. It turns host events
//! into [`ExceptionRecord`]s and hands them to the [`ExceptionAggregator`],
//! which owns all batching and rate-limiting state.
//!
//! # Example
//!
//! ```ignore
//! use error_monitor::{ExceptionMonitor, MonitorConfig};
//!
//! let mut monitor = ExceptionMonitor::new(MonitorConfig::load("error-monitor.toml")?);
//! monitor.initialize();
//!
//! monitor.report_error(&event, "Traceback").await;
//!
//! monitor.terminate().await;
//! ```

pub mod aggregator;
pub mod quota;
pub mod record;

pub use aggregator::{AggregatorSettings, AggregatorStatus, ExceptionAggregator};
pub use quota::SendQuota;
pub use record::{ExceptionKind, ExceptionRecord, RecentLogCache};

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::MonitorConfig;
use crate::render::EmailRenderer;
use crate::transport::{MailTransport, SmtpTransport};

/// Accessors the host exposes for an incoming chat message.
pub trait MessageEvent: Send + Sync {
    fn platform_name(&self) -> &str;
    fn sender_name(&self) -> &str;
    fn sender_id(&self) -> &str;
    /// Group the message was posted in, `None` for direct messages.
    fn group_id(&self) -> Option<&str>;
    fn message_str(&self) -> &str;

    /// Error keyword attached to the event by another producer.
    fn reported_error(&self) -> Option<&str> {
        None
    }
}

impl ExceptionRecord {
    /// Normalize a host event into a record stamped with the current time.
    pub fn from_event<E>(event: &E, keyword: &str) -> Self
    where
        E: MessageEvent + ?Sized,
    {
        Self::message(
            event.platform_name(),
            event.sender_name(),
            event.sender_id(),
            event.group_id().map(str::to_string),
            event.message_str(),
            keyword,
        )
    }
}

/// Services built by [`ExceptionMonitor::initialize`].
pub(crate) struct MonitorServices {
    pub(crate) renderer: Arc<EmailRenderer>,
    pub(crate) transport: Arc<dyn MailTransport>,
    pub(crate) aggregator: ExceptionAggregator,
}

/// Host-facing entry point.
pub struct ExceptionMonitor {
    config: MonitorConfig,
    services: Option<MonitorServices>,
}

impl ExceptionMonitor {
    /// Create an uninitialized monitor.
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            services: None,
        }
    }

    /// Build the SMTP transport and the aggregator.
    pub fn initialize(&mut self) {
        let transport = Arc::new(SmtpTransport::new(
            self.config.smtp_settings.clone(),
            self.config.notification_filtering.recipient_emails.clone(),
        ));
        self.initialize_with_transport(transport);
    }

    /// Same as [`initialize`](Self::initialize) with a caller-provided transport.
    ///
    /// Failures are logged and leave the monitor uninitialized.
    pub fn initialize_with_transport(&mut self, transport: Arc<dyn MailTransport>) {
        info!("Initializing error monitor");
        if !self.config.general.enable_monitoring {
            info!("Error monitoring is disabled");
            return;
        }

        let renderer = match EmailRenderer::new() {
            Ok(renderer) => Arc::new(renderer),
            Err(e) => {
                error!(error = %e, "CRITICAL: error monitor initialization failed");
                self.services = None;
                return;
            }
        };

        let settings = AggregatorSettings::from(&self.config.rate_limit_batching);
        let aggregator = ExceptionAggregator::new(settings, renderer.clone(), transport.clone());
        self.services = Some(MonitorServices {
            renderer,
            transport,
            aggregator,
        });
        info!(
            batching = self.config.rate_limit_batching.enable_batching,
            max_emails_per_hour = self.config.rate_limit_batching.max_emails_per_hour,
            "Error monitor initialized"
        );
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.general.enable_monitoring
    }

    pub fn is_initialized(&self) -> bool {
        self.services.is_some()
    }

    pub fn aggregator(&self) -> Option<&ExceptionAggregator> {
        self.services.as_ref().map(|s| &s.aggregator)
    }

    pub(crate) fn services(&self) -> Option<&MonitorServices> {
        self.services.as_ref()
    }

    /// Public reporting API for other producers.
    ///
    /// Ignored when monitoring is disabled or uninitialized, or when
    /// `keyword` is empty.
    pub async fn report_error<E>(&self, event: &E, keyword: &str)
    where
        E: MessageEvent + ?Sized,
    {
        if !self.is_enabled() {
            return;
        }
        let Some(aggregator) = self.aggregator() else {
            return;
        };
        if keyword.is_empty() {
            return;
        }

        info!(platform = %event.platform_name(), keyword, "Received error report");
        aggregator.submit(ExceptionRecord::from_event(event, keyword)).await;
    }

    /// Process an error keyword another producer attached to `event`, if any.
    pub async fn consume_reported_error<E>(&self, event: &E)
    where
        E: MessageEvent + ?Sized,
    {
        let Some(keyword) = event.reported_error().filter(|k| !k.is_empty()) else {
            return;
        };
        debug!("Error report attached to event, processing");

        let Some(aggregator) = self.aggregator() else {
            error!("CRITICAL: exception aggregator missing, error monitor may have failed to initialize");
            return;
        };
        aggregator.submit(ExceptionRecord::from_event(event, keyword)).await;
        info!("Processed error report attached to event");
    }

    /// Stop the aggregator, flushing what it still holds.
    pub async fn terminate(&self) {
        if let Some(aggregator) = self.aggregator() {
            aggregator.shutdown().await;
        }
        info!("Error monitor unloaded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{Behavior, RecordingTransport};

    pub(crate) struct TestEvent {
        pub group_id: Option<String>,
        pub reported_error: Option<String>,
    }

    impl MessageEvent for TestEvent {
        fn platform_name(&self) -> &str {
            "aiocqhttp"
        }

        fn sender_name(&self) -> &str {
            "alice"
        }

        fn sender_id(&self) -> &str {
            "10001"
        }

        fn group_id(&self) -> Option<&str> {
            self.group_id.as_deref()
        }

        fn message_str(&self) -> &str {
            "Traceback (most recent call last): boom"
        }

        fn reported_error(&self) -> Option<&str> {
            self.reported_error.as_deref()
        }
    }

    fn event(reported_error: Option<&str>) -> TestEvent {
        TestEvent {
            group_id: Some("5566".to_string()),
            reported_error: reported_error.map(str::to_string),
        }
    }

    fn immediate_config() -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.rate_limit_batching.enable_batching = false;
        config
    }

    fn monitor(config: MonitorConfig) -> (ExceptionMonitor, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new(Behavior::Deliver));
        let mut monitor = ExceptionMonitor::new(config);
        monitor.initialize_with_transport(transport.clone());
        (monitor, transport)
    }

    #[test]
    fn test_record_from_event() {
        let record = ExceptionRecord::from_event(&event(None), "Traceback");
        assert_eq!(record.kind, ExceptionKind::Message);
        assert_eq!(record.platform, "aiocqhttp");
        assert_eq!(record.sender_name, "alice");
        assert_eq!(record.sender_id, "10001");
        assert_eq!(record.group_id.as_deref(), Some("5566"));
        assert_eq!(record.keyword, "Traceback");
        assert!(record.message.starts_with("Traceback"));
    }

    #[test]
    fn test_disabled_monitor_stays_uninitialized() {
        let mut config = MonitorConfig::default();
        config.general.enable_monitoring = false;
        let (monitor, _) = monitor(config);
        assert!(!monitor.is_initialized());
        assert!(monitor.aggregator().is_none());
    }

    #[tokio::test]
    async fn test_report_error_sends() {
        let (monitor, transport) = monitor(immediate_config());
        monitor.report_error(&event(None), "Traceback").await;
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_report_error_ignores_empty_keyword() {
        let (monitor, transport) = monitor(immediate_config());
        monitor.report_error(&event(None), "").await;
        assert_eq!(transport.sent_count(), 0);
        assert_eq!(monitor.aggregator().unwrap().status().cache_size, 0);
    }

    #[tokio::test]
    async fn test_uninitialized_monitor_ignores_reports() {
        let monitor = ExceptionMonitor::new(immediate_config());
        monitor.report_error(&event(None), "Traceback").await;
        monitor.consume_reported_error(&event(Some("Traceback"))).await;
        monitor.terminate().await;
        assert!(!monitor.is_initialized());
    }

    #[tokio::test]
    async fn test_consume_reported_error() {
        let (monitor, transport) = monitor(immediate_config());

        monitor.consume_reported_error(&event(None)).await;
        assert_eq!(transport.sent_count(), 0);

        monitor.consume_reported_error(&event(Some("KeyError"))).await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("KeyError"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_flushes_pending_batch() {
        let (monitor, transport) = monitor(MonitorConfig::default());

        monitor.report_error(&event(None), "Traceback").await;
        monitor.report_error(&event(None), "Traceback").await;
        assert_eq!(transport.sent_count(), 0);

        monitor.terminate().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("Exception #2"));
    }
}
