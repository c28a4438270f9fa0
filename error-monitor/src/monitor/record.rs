//! Exception records and the recent-log cache.

use std::collections::VecDeque;

use chrono::{DateTime, Local};

/// Placeholder some hosts report instead of omitting the group id.
pub const GROUP_PLACEHOLDER: &str = "N/A";

/// Capacity of [`RecentLogCache`].
pub const RECENT_LOG_CAPACITY: usize = 100;

/// Display format for record timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Message,
}

/// One observed anomaly. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub kind: ExceptionKind,
    pub platform: String,
    pub sender_name: String,
    pub sender_id: String,
    pub group_id: Option<String>,
    pub message: String,
    pub keyword: String,
    pub timestamp: DateTime<Local>,
}

impl ExceptionRecord {
    /// Create a message record stamped with the current local time.
    pub fn message(
        platform: impl Into<String>,
        sender_name: impl Into<String>,
        sender_id: impl Into<String>,
        group_id: Option<String>,
        message: impl Into<String>,
        keyword: impl Into<String>,
    ) -> Self {
        Self {
            kind: ExceptionKind::Message,
            platform: platform.into(),
            sender_name: sender_name.into(),
            sender_id: sender_id.into(),
            group_id,
            message: message.into(),
            keyword: keyword.into(),
            timestamp: truncate_to_seconds(Local::now()),
        }
    }

    /// Whether the record came from a group conversation.
    pub fn is_group(&self) -> bool {
        self.group_id
            .as_deref()
            .is_some_and(|id| !id.is_empty() && id != GROUP_PLACEHOLDER)
    }

    /// Group id for display, `N/A` when absent.
    pub fn group_display(&self) -> &str {
        match self.group_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => GROUP_PLACEHOLDER,
        }
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

fn truncate_to_seconds(ts: DateTime<Local>) -> DateTime<Local> {
    use chrono::Timelike;
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Bounded FIFO of the most recent records, oldest first.
#[derive(Debug, Clone)]
pub struct RecentLogCache {
    entries: VecDeque<ExceptionRecord>,
    capacity: usize,
}

impl RecentLogCache {
    pub fn new() -> Self {
        Self::with_capacity(RECENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn push(&mut self, record: ExceptionRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Oldest-first copy of the cached records.
    pub fn snapshot(&self) -> Vec<ExceptionRecord> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for RecentLogCache {
    fn default() -> Self {
        Self::new()
    }
}
