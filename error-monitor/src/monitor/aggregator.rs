//! Exception aggregator.
//!
//! The aggregator decides when a report turns into an email:
//! - With batching disabled every report is sent immediately, subject to the
//!   hourly quota, with the recent-log cache as context.
//! - With batching enabled reports are buffered and a single delayed flush is
//!   scheduled; when it fires the buffer is swapped out and summarized in one
//!   email, again subject to the hourly quota.
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await`. Delivery failures are logged and dropped, never retried.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::quota::SendQuota;
use super::record::{ExceptionRecord, RecentLogCache};
use crate::config::RateLimitBatching;
use crate::render::{EmailRenderer, RenderError, RenderedEmail};
use crate::transport::{MailTransport, SendOutcome};

/// Aggregator tuning.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub max_emails_per_hour: u32,
    pub enable_batching: bool,
    pub batch_window: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self::from(&RateLimitBatching::default())
    }
}

impl From<&RateLimitBatching> for AggregatorSettings {
    fn from(config: &RateLimitBatching) -> Self {
        Self {
            max_emails_per_hour: config.max_emails_per_hour,
            enable_batching: config.enable_batching,
            batch_window: Duration::from_secs(config.batch_window_seconds),
        }
    }
}

/// Read-only snapshot for the status command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatorStatus {
    /// Sends counted in the current quota window.
    pub emails_sent: u32,
    pub max_emails_per_hour: u32,
    pub cache_size: usize,
    /// Records waiting for the next flush.
    pub buffered: usize,
    pub batch_scheduled: bool,
    pub email_configured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    /// Shutdown is waiting on scheduled flushes; new reports are buffered
    /// without arming a timer and picked up by the final flush.
    Draining,
    Stopped,
}

struct AggregatorState {
    cache: RecentLogCache,
    buffer: Vec<ExceptionRecord>,
    quota: SendQuota,
    /// A delayed flush is scheduled and has not swapped the buffer yet.
    timer_armed: bool,
    /// Flush tasks that may still be sleeping or sending.
    timer_tasks: Vec<JoinHandle<()>>,
    lifecycle: Lifecycle,
}

struct AggregatorInner {
    settings: AggregatorSettings,
    renderer: Arc<EmailRenderer>,
    transport: Arc<dyn MailTransport>,
    state: Mutex<AggregatorState>,
}

/// Rate-limiting, batching front of the mail pipeline.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct ExceptionAggregator {
    inner: Arc<AggregatorInner>,
}

impl ExceptionAggregator {
    pub fn new(
        settings: AggregatorSettings,
        renderer: Arc<EmailRenderer>,
        transport: Arc<dyn MailTransport>,
    ) -> Self {
        let state = AggregatorState {
            cache: RecentLogCache::new(),
            buffer: Vec::new(),
            quota: SendQuota::new(Instant::now()),
            timer_armed: false,
            timer_tasks: Vec::new(),
            lifecycle: Lifecycle::Running,
        };

        Self {
            inner: Arc::new(AggregatorInner {
                settings,
                renderer,
                transport,
                state: Mutex::new(state),
            }),
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.inner.settings
    }

    /// Accept one record.
    ///
    /// In immediate mode this performs the send (or the drop) before
    /// returning. In batching mode it only buffers the record and, if no flush
    /// is pending, schedules one.
    pub async fn submit(&self, record: ExceptionRecord) {
        if !self.inner.settings.enable_batching {
            self.send_single(record).await;
            return;
        }

        let mut state = self.inner.state.lock();
        match state.lifecycle {
            Lifecycle::Stopped => {
                warn!(keyword = %record.keyword, "Aggregator stopped, exception report dropped");
                return;
            }
            Lifecycle::Draining => {
                debug!("Aggregator draining, report buffered for the final flush");
                state.buffer.push(record);
                return;
            }
            Lifecycle::Running => {}
        }

        state.buffer.push(record);
        if state.timer_armed {
            return;
        }

        state.timer_armed = true;
        state.timer_tasks.retain(|handle| !handle.is_finished());
        let handle = self.spawn_flush_timer();
        state.timer_tasks.push(handle);
        drop(state);

        info!(
            window_secs = self.inner.settings.batch_window.as_secs(),
            "First exception in window, batch timer started"
        );
    }

    fn spawn_flush_timer(&self) -> JoinHandle<()> {
        let aggregator = self.clone();
        let window = self.inner.settings.batch_window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            aggregator.flush().await;
        })
    }

    /// Swap out the buffer and send it as one email if the quota allows.
    async fn flush(&self) {
        self.flush_batch(false).await;
    }

    /// With `final_flush` the aggregator stops in the same critical section
    /// that swaps the buffer, so no report can land behind the last batch.
    async fn flush_batch(&self, final_flush: bool) {
        let batch = {
            let mut state = self.inner.state.lock();
            state.timer_armed = false;
            if final_flush {
                state.lifecycle = Lifecycle::Stopped;
            }
            if state.buffer.is_empty() {
                return;
            }

            let batch = std::mem::take(&mut state.buffer);
            if !state
                .quota
                .try_acquire(self.inner.settings.max_emails_per_hour, Instant::now())
            {
                drop(state);
                warn!(
                    dropped = batch.len(),
                    limit = self.inner.settings.max_emails_per_hour,
                    "Hourly email limit reached, batched exceptions dropped"
                );
                return;
            }
            batch
        };

        info!(count = batch.len(), "Batch window closed, sending summary email");
        let email = self.inner.renderer.render_batch(&batch);
        self.deliver(email, "batch").await;
    }

    async fn send_single(&self, record: ExceptionRecord) {
        let recent_logs = {
            let mut state = self.inner.state.lock();
            if state.lifecycle == Lifecycle::Stopped {
                drop(state);
                warn!(keyword = %record.keyword, "Aggregator stopped, exception report dropped");
                return;
            }

            state.cache.push(record.clone());
            debug!(cache_size = state.cache.len(), "Processing exception");

            if !state
                .quota
                .try_acquire(self.inner.settings.max_emails_per_hour, Instant::now())
            {
                drop(state);
                warn!(
                    limit = self.inner.settings.max_emails_per_hour,
                    "Hourly email limit reached, exception not emailed"
                );
                return;
            }
            state.cache.snapshot()
        };

        let email = self.inner.renderer.render_single(&record, &recent_logs);
        self.deliver(email, "single").await;
    }

    async fn deliver(&self, email: Result<RenderedEmail, RenderError>, kind: &'static str) {
        let email = match email {
            Ok(email) => email,
            Err(e) => {
                error!(kind, error = %e, "Failed to render exception email");
                return;
            }
        };

        match self.inner.transport.send(&email).await {
            Ok(SendOutcome::Sent) => debug!(kind, subject = %email.subject, "Exception email delivered"),
            Ok(SendOutcome::NotConfigured) => {
                warn!(kind, "Mail delivery not configured, exception email skipped")
            }
            Err(e) => error!(
                kind,
                error_kind = e.kind(),
                error = %e,
                "Failed to send exception email, check SMTP settings and connectivity"
            ),
        }
    }

    /// Stop the aggregator.
    ///
    /// Scheduled flushes are awaited, never cancelled. Anything still buffered
    /// afterwards is flushed once inline under the usual quota rule; reports
    /// arriving during that final send are dropped with a warning. Calling
    /// this again is a no-op.
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle == Lifecycle::Stopped {
                debug!("Aggregator already stopped");
                return;
            }
            state.lifecycle = Lifecycle::Draining;
        }
        info!("Stopping exception aggregator");

        loop {
            let handles = std::mem::take(&mut self.inner.state.lock().timer_tasks);
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if !handle.is_finished() {
                    info!("Waiting for the scheduled batch to finish");
                }
                match handle.await {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => {
                        warn!("Batch task was cancelled while waiting for it")
                    }
                    Err(e) => error!(error = %e, "Batch task ended abnormally"),
                }
            }
        }

        let remaining = self.inner.state.lock().buffer.len();
        if remaining > 0 {
            info!(count = remaining, "Flushing remaining exceptions before stopping");
        }
        // Reports submitted from here on hit `Stopped` and are dropped.
        self.flush_batch(true).await;
        info!("Exception aggregator stopped");
    }

    pub fn status(&self) -> AggregatorStatus {
        let state = self.inner.state.lock();
        AggregatorStatus {
            emails_sent: state.quota.count(),
            max_emails_per_hour: self.inner.settings.max_emails_per_hour,
            cache_size: state.cache.len(),
            buffered: state.buffer.len(),
            batch_scheduled: state.timer_armed,
            email_configured: self.inner.transport.is_configured(),
        }
    }

    /// Empty the recent-log cache, returning how many entries were removed.
    ///
    /// The buffer, quota and timer are left alone.
    pub fn clear_cache(&self) -> usize {
        self.inner.state.lock().cache.clear()
    }
}
