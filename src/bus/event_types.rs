//! Push event kinds and their payloads.
//!
//! Single source of truth for the wire names (`stock-update`,
//! `borrow-update`, `notification`) and for turning a raw `{event, payload}`
//! pair into a typed [`PushEvent`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::BorrowStatus;
use crate::notify::NotificationKind;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

pub const EVENT_STOCK_UPDATE: &str = "stock-update";
pub const EVENT_BORROW_UPDATE: &str = "borrow-update";
pub const EVENT_NOTIFICATION: &str = "notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    StockUpdate,
    BorrowUpdate,
    Notification,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::StockUpdate,
        EventKind::BorrowUpdate,
        EventKind::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StockUpdate => EVENT_STOCK_UPDATE,
            EventKind::BorrowUpdate => EVENT_BORROW_UPDATE,
            EventKind::Notification => EVENT_NOTIFICATION,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            EVENT_STOCK_UPDATE => Ok(EventKind::StockUpdate),
            EVENT_BORROW_UPDATE => Ok(EventKind::BorrowUpdate),
            EVENT_NOTIFICATION => Ok(EventKind::Notification),
            other => Err(EventError::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockUpdate {
    pub book_id: String,
    pub available_copies: u32,
    pub total_copies: u32,
    pub is_available: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowUpdate {
    pub borrow_id: String,
    pub status: BorrowStatus,
    pub book_id: String,
    pub user_id: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A classified server push. Serializes as the wire envelope
/// `{"event": <kind>, "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum PushEvent {
    StockUpdate(StockUpdate),
    BorrowUpdate(BorrowUpdate),
    Notification(NotificationPayload),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventError {
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),
    #[error("malformed {kind} payload: {reason}")]
    MalformedEvent { kind: String, reason: String },
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PushEvent::StockUpdate(_) => EventKind::StockUpdate,
            PushEvent::BorrowUpdate(_) => EventKind::BorrowUpdate,
            PushEvent::Notification(_) => EventKind::Notification,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PushEvent::StockUpdate(e) => e.timestamp,
            PushEvent::BorrowUpdate(e) => e.timestamp,
            PushEvent::Notification(e) => e.timestamp,
        }
    }

    /// Classify a named message. Unknown names and payloads that do not match
    /// the kind's shape are reported separately so callers can log them
    /// differently.
    pub fn decode(event: &str, payload: Value) -> Result<Self, EventError> {
        let kind: EventKind = event.parse()?;
        let malformed = |e: serde_json::Error| EventError::MalformedEvent {
            kind: kind.to_string(),
            reason: e.to_string(),
        };
        match kind {
            EventKind::StockUpdate => serde_json::from_value(payload)
                .map(PushEvent::StockUpdate)
                .map_err(malformed),
            EventKind::BorrowUpdate => serde_json::from_value(payload)
                .map(PushEvent::BorrowUpdate)
                .map_err(malformed),
            EventKind::Notification => serde_json::from_value(payload)
                .map(PushEvent::Notification)
                .map_err(malformed),
        }
    }

    /// Parse a full `{event, payload}` envelope.
    pub fn from_envelope(raw: &str) -> Result<Self, EventError> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| EventError::InvalidEnvelope(e.to_string()))?;
        Self::decode(&envelope.event, envelope.payload)
    }
}
