//! Request/response shapes of the library REST API.
//!
//! The sync layer never calls the API; these types describe what the
//! data-fetch layer stores in the cache, so cache patches can be checked
//! against real payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub available_copies: u32,
    pub total_copies: u32,
    pub is_available: bool,
}

/// Borrowing lifecycle as reported by the server.
///
/// Parsing is case-insensitive; statuses this client does not know are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BorrowStatus {
    Pending,
    Approved,
    Rejected,
    Borrowed,
    Returned,
    Overdue,
    Other(String),
}

impl From<String> for BorrowStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => BorrowStatus::Pending,
            "approved" => BorrowStatus::Approved,
            "rejected" => BorrowStatus::Rejected,
            "borrowed" => BorrowStatus::Borrowed,
            "returned" => BorrowStatus::Returned,
            "overdue" => BorrowStatus::Overdue,
            _ => BorrowStatus::Other(raw),
        }
    }
}

impl From<BorrowStatus> for String {
    fn from(status: BorrowStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for BorrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BorrowStatus::Pending => write!(f, "pending"),
            BorrowStatus::Approved => write!(f, "approved"),
            BorrowStatus::Rejected => write!(f, "rejected"),
            BorrowStatus::Borrowed => write!(f, "borrowed"),
            BorrowStatus::Returned => write!(f, "returned"),
            BorrowStatus::Overdue => write!(f, "overdue"),
            BorrowStatus::Other(raw) => write!(f, "{raw}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Borrowing {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub status: BorrowStatus,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fine {
    pub id: String,
    pub borrowing_id: String,
    pub user_id: String,
    pub amount: f64,
    pub paid: bool,
    pub created_at: DateTime<Utc>,
}

/// A notification as stored server-side (the inbox list, not the toast queue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: crate::notify::NotificationKind,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_borrow_status_is_case_insensitive() {
        let status: BorrowStatus = serde_json::from_value(json!("APPROVED")).unwrap();
        assert_eq!(status, BorrowStatus::Approved);

        let status: BorrowStatus = serde_json::from_value(json!("lost")).unwrap();
        assert_eq!(status, BorrowStatus::Other("lost".to_string()));
        assert_eq!(serde_json::to_value(&status).unwrap(), json!("lost"));
    }

    #[test]
    fn test_paginated_books_use_camel_case() {
        let page: Paginated<Book> = serde_json::from_value(json!({
            "data": [{
                "id": "b1",
                "title": "Dune",
                "author": "Frank Herbert",
                "availableCopies": 1,
                "totalCopies": 3,
                "isAvailable": true
            }],
            "page": 1,
            "limit": 10,
            "total": 1,
            "totalPages": 1
        }))
        .unwrap();

        assert_eq!(page.total_pages, 1);
        assert_eq!(page.data[0].available_copies, 1);
        assert_eq!(page.data[0].isbn, None);
    }

    #[test]
    fn test_borrowing_optional_dates_default_to_none() {
        let borrowing: Borrowing = serde_json::from_value(json!({
            "id": "br1",
            "bookId": "b1",
            "userId": "u1",
            "status": "borrowed",
            "requestedAt": "2026-03-01T09:00:00Z",
            "dueDate": "2026-03-15T09:00:00Z"
        }))
        .unwrap();

        assert_eq!(borrowing.status, BorrowStatus::Borrowed);
        assert_eq!(borrowing.book_id, "b1");
        assert!(borrowing.due_date.is_some());
        assert_eq!(borrowing.returned_at, None);
    }

    #[test]
    fn test_fine_uses_camel_case() {
        let fine: Fine = serde_json::from_value(json!({
            "id": "f1",
            "borrowingId": "br1",
            "userId": "u1",
            "amount": 2.5,
            "paid": false,
            "createdAt": "2026-03-16T09:00:00Z"
        }))
        .unwrap();

        assert_eq!(fine.borrowing_id, "br1");
        assert_eq!(fine.amount, 2.5);
        assert!(!fine.paid);
    }

    #[test]
    fn test_notification_record_kind_and_read_flag() {
        let record: NotificationRecord = serde_json::from_value(json!({
            "id": "n1",
            "title": "Due soon",
            "message": "Return by Friday",
            "type": "warning",
            "createdAt": "2026-03-14T09:00:00Z"
        }))
        .unwrap();
        assert_eq!(record.kind, crate::notify::NotificationKind::Warning);
        assert!(!record.read);

        let record: NotificationRecord = serde_json::from_value(json!({
            "id": "n2",
            "title": "Hello",
            "message": "",
            "read": true,
            "createdAt": "2026-03-14T09:00:00Z"
        }))
        .unwrap();
        assert_eq!(record.kind, crate::notify::NotificationKind::Info);
        assert!(record.read);
    }
}
