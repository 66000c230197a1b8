//! User-facing notifications.
//!
//! Notifications are shown one at a time. Anything that arrives while one is
//! on screen waits in a FIFO backlog:
//! - `NotificationQueue`: the single current slot, the backlog and the
//!   auto-dismiss timer
//! - `QueueView`: what a presenter is allowed to see (`current` plus a count)

mod queue;

pub use queue::{NotificationQueue, DEFAULT_DISMISS_AFTER};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NotificationId = Uuid;

/// Visual severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Warning,
    Error,
    /// Also what any unrecognised `type` decodes to.
    #[default]
    #[serde(other)]
    Info,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Info => "info",
            NotificationKind::Success => "success",
            NotificationKind::Warning => "warning",
            NotificationKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub timestamp: DateTime<Utc>,
}

/// Everything needed to enqueue a notification; the id is assigned on enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationInput {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NotificationInput {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
            timestamp: None,
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn into_notification(self) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            title: self.title,
            message: self.message,
            kind: self.kind,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

/// Presenter-facing snapshot: the visible notification and how many wait behind it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueView {
    pub current: Option<Notification>,
    pub backlog_count: usize,
}

impl QueueView {
    /// Number of enqueued notifications that have not been dismissed yet.
    pub fn pending(&self) -> usize {
        self.backlog_count + usize::from(self.current.is_some())
    }

    pub fn is_idle(&self) -> bool {
        self.current.is_none() && self.backlog_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_deserializes_unknown_as_info() {
        let kind: NotificationKind = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(kind, NotificationKind::Success);

        let kind: NotificationKind = serde_json::from_str("\"celebration\"").unwrap();
        assert_eq!(kind, NotificationKind::Info);
        assert_eq!(serde_json::to_string(&kind).unwrap(), "\"info\"");
        assert_eq!(NotificationKind::default(), NotificationKind::Info);
    }

    #[test]
    fn test_input_keeps_explicit_timestamp() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let notification = NotificationInput::warning("Overdue", "Return it")
            .with_timestamp(at)
            .into_notification();

        assert_eq!(notification.timestamp, at);
        assert_eq!(notification.kind, NotificationKind::Warning);
        assert_eq!(notification.kind.as_str(), "warning");
    }

    #[test]
    fn test_view_pending_counts_current() {
        let view = QueueView {
            current: Some(NotificationInput::info("a", "b").into_notification()),
            backlog_count: 2,
        };
        assert_eq!(view.pending(), 3);
        assert!(!view.is_idle());
        assert!(QueueView::default().is_idle());
    }
}
