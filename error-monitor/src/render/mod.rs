//! HTML email rendering.
//!
//! Templates are embedded at compile time and rendered through minijinja with
//! HTML auto-escaping, so every user-supplied field is escaped on output.

use chrono::Local;
use minijinja::{AutoEscape, Environment, UndefinedBehavior, context};
use serde::Serialize;
use thiserror::Error;

use crate::monitor::record::{ExceptionRecord, TIMESTAMP_FORMAT};

/// Number of cached reports shown in a single-record email.
pub const RECENT_LOG_LIMIT: usize = 5;

/// Characters of each cached message shown in a single-record email.
pub const PREVIEW_CHARS: usize = 100;

const SINGLE_SUBJECT: &str = "[Error Monitor] Message Exception Report";
const BATCH_SUBJECT: &str = "[Error Monitor] Batched Exception Report";
const TEST_SUBJECT: &str = "[Error Monitor] Test Email";

/// Error type for the renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to render template: {0}")]
    Template(#[from] minijinja::Error),
}

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    /// HTML body.
    pub body: String,
}

/// Who triggered a test email.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestEmailContext {
    pub platform: String,
    pub sender_name: String,
    pub sender_id: String,
}

#[derive(Serialize)]
struct RecordView<'a> {
    timestamp: String,
    platform: &'a str,
    source: &'static str,
    sender_name: &'a str,
    sender_id: &'a str,
    group: &'a str,
    keyword: &'a str,
    message: &'a str,
}

impl<'a> From<&'a ExceptionRecord> for RecordView<'a> {
    fn from(record: &'a ExceptionRecord) -> Self {
        Self {
            timestamp: record.formatted_timestamp(),
            platform: &record.platform,
            source: if record.is_group() { "group" } else { "direct" },
            sender_name: &record.sender_name,
            sender_id: &record.sender_id,
            group: record.group_display(),
            keyword: &record.keyword,
            message: &record.message,
        }
    }
}

#[derive(Serialize)]
struct RecentLogView {
    timestamp: String,
    preview: String,
}

impl From<&ExceptionRecord> for RecentLogView {
    fn from(record: &ExceptionRecord) -> Self {
        Self {
            timestamp: record.formatted_timestamp(),
            preview: preview(&record.message),
        }
    }
}

/// Cut `message` to [`PREVIEW_CHARS`] characters, marking the cut with an ellipsis.
fn preview(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Renders the three notification emails.
pub struct EmailRenderer {
    env: Environment<'static>,
}

impl EmailRenderer {
    /// Compile the embedded templates.
    pub fn new() -> Result<Self, RenderError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        env.add_template("base.html", include_str!("templates/base.html"))?;
        env.add_template("single.html", include_str!("templates/single.html"))?;
        env.add_template("batch.html", include_str!("templates/batch.html"))?;
        env.add_template("test.html", include_str!("templates/test.html"))?;
        Ok(Self { env })
    }

    /// Email for one record, with the newest cached reports as context.
    ///
    /// `recent_logs` is oldest-first; the last [`RECENT_LOG_LIMIT`] entries are
    /// shown newest-first.
    pub fn render_single(
        &self,
        record: &ExceptionRecord,
        recent_logs: &[ExceptionRecord],
    ) -> Result<RenderedEmail, RenderError> {
        let recent: Vec<RecentLogView> = recent_logs
            .iter()
            .rev()
            .take(RECENT_LOG_LIMIT)
            .map(RecentLogView::from)
            .collect();

        let body = self.env.get_template("single.html")?.render(context! {
            record => RecordView::from(record),
            recent_logs => recent,
            recent_limit => RECENT_LOG_LIMIT,
        })?;

        Ok(RenderedEmail {
            subject: SINGLE_SUBJECT.to_string(),
            body,
        })
    }

    /// Summary email for a flushed batch, records numbered in order.
    pub fn render_batch(&self, records: &[ExceptionRecord]) -> Result<RenderedEmail, RenderError> {
        let views: Vec<RecordView<'_>> = records.iter().map(RecordView::from).collect();
        let body = self
            .env
            .get_template("batch.html")?
            .render(context! { records => views })?;

        Ok(RenderedEmail {
            subject: BATCH_SUBJECT.to_string(),
            body,
        })
    }

    pub fn render_test(&self, ctx: &TestEmailContext) -> Result<RenderedEmail, RenderError> {
        let body = self.env.get_template("test.html")?.render(context! {
            sent_at => Local::now().format(TIMESTAMP_FORMAT).to_string(),
            platform => &ctx.platform,
            sender_name => &ctx.sender_name,
            sender_id => &ctx.sender_id,
        })?;

        Ok(RenderedEmail {
            subject: TEST_SUBJECT.to_string(),
            body,
        })
    }
}
