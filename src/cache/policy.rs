//! Maps push events onto cache operations.

use serde_json::{json, Value};
use tracing::debug;

use super::{KeyedCache, QueryKey};
use crate::bus::{PushEvent, StockUpdate};

/// One cache operation derived from an event.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Invalidate { prefix: QueryKey },
    /// Overwrite the stock fields of the matching book wherever it appears
    /// under `prefix`.
    PatchBookStock { prefix: QueryKey, stock: StockUpdate },
}

/// What `apply` touched. Nothing touched is a miss, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub invalidated: usize,
    pub patched: usize,
}

impl SyncOutcome {
    pub fn is_miss(&self) -> bool {
        self.invalidated == 0 && self.patched == 0
    }
}

#[derive(Debug, Clone)]
pub struct CacheSyncPolicy {
    books: QueryKey,
    borrowings: Vec<QueryKey>,
    notifications: QueryKey,
}

impl Default for CacheSyncPolicy {
    fn default() -> Self {
        Self {
            books: QueryKey::root("books"),
            borrowings: vec![
                QueryKey::root("borrowings"),
                QueryKey::path("admin/borrowings"),
            ],
            notifications: QueryKey::root("notifications"),
        }
    }
}

impl CacheSyncPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The operations `event` calls for, in execution order. Pure.
    pub fn plan(&self, event: &PushEvent) -> Vec<CacheOp> {
        match event {
            PushEvent::StockUpdate(stock) => vec![CacheOp::PatchBookStock {
                prefix: self.books.clone(),
                stock: stock.clone(),
            }],
            // Stock changes caused by a borrowing arrive as their own event.
            PushEvent::BorrowUpdate(_) => self
                .borrowings
                .iter()
                .map(|prefix| CacheOp::Invalidate {
                    prefix: prefix.clone(),
                })
                .collect(),
            PushEvent::Notification(_) => vec![CacheOp::Invalidate {
                prefix: self.notifications.clone(),
            }],
        }
    }

    pub fn apply(&self, event: &PushEvent, cache: &dyn KeyedCache) -> SyncOutcome {
        let mut outcome = SyncOutcome::default();
        for op in self.plan(event) {
            match op {
                CacheOp::Invalidate { prefix } => {
                    outcome.invalidated += cache.invalidate(&prefix);
                }
                CacheOp::PatchBookStock { prefix, stock } => {
                    outcome.patched += cache.patch(&prefix, &mut |_, value| {
                        patch_book_stock(value, &stock)
                    });
                }
            }
        }

        if outcome.is_miss() {
            debug!(kind = %event.kind(), "push event matched no cached entries");
        } else {
            debug!(
                kind = %event.kind(),
                invalidated = outcome.invalidated,
                patched = outcome.patched,
                "cache synced"
            );
        }
        outcome
    }

    /// Mark every prefix this policy keeps in sync as stale. Used when push
    /// events were lost, so the next read refetches instead of trusting
    /// patches that may be missing.
    pub fn resync(&self, cache: &dyn KeyedCache) -> SyncOutcome {
        let invalidated = std::iter::once(&self.books)
            .chain(&self.borrowings)
            .chain(std::iter::once(&self.notifications))
            .map(|prefix| cache.invalidate(prefix))
            .sum();
        debug!(invalidated, "cache resynced after missed push events");
        SyncOutcome {
            invalidated,
            patched: 0,
        }
    }
}

/// Patch the book inside one cached value. Accepts a paginated page
/// (`{"data": [...]}`), a bare list, a `{"data": {...}}` wrapper or a single
/// record. Order and membership are never changed.
fn patch_book_stock(value: &mut Value, stock: &StockUpdate) -> bool {
    if let Some(items) = value.as_array_mut() {
        let mut hit = false;
        for item in items {
            hit |= patch_record(item, stock);
        }
        return hit;
    }
    if value
        .get("data")
        .is_some_and(|data| data.is_array() || data.is_object())
    {
        return value
            .get_mut("data")
            .is_some_and(|data| patch_book_stock(data, stock));
    }
    patch_record(value, stock)
}

fn patch_record(record: &mut Value, stock: &StockUpdate) -> bool {
    let Some(fields) = record.as_object_mut() else {
        return false;
    };
    if !fields
        .get("id")
        .is_some_and(|id| id_matches(id, &stock.book_id))
    {
        return false;
    }
    fields.insert("availableCopies".into(), json!(stock.available_copies));
    fields.insert("totalCopies".into(), json!(stock.total_copies));
    fields.insert("isAvailable".into(), json!(stock.is_available));
    true
}

fn id_matches(id: &Value, book_id: &str) -> bool {
    match id {
        Value::String(id) => id == book_id,
        Value::Number(id) => id.to_string() == book_id,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::api::BorrowStatus;
    use crate::bus::{BorrowUpdate, NotificationPayload};
    use crate::cache::{CacheRead, MemoryCache};
    use crate::notify::NotificationKind;

    fn stock(book_id: &str, available: u32) -> PushEvent {
        PushEvent::StockUpdate(StockUpdate {
            book_id: book_id.to_string(),
            available_copies: available,
            total_copies: 3,
            is_available: available > 0,
            timestamp: Utc::now(),
        })
    }

    fn borrow(status: BorrowStatus) -> PushEvent {
        PushEvent::BorrowUpdate(BorrowUpdate {
            borrow_id: "br1".to_string(),
            status,
            book_id: "b1".to_string(),
            user_id: "u1".to_string(),
            timestamp: Utc::now(),
        })
    }

    fn book(id: &str, available: u32) -> Value {
        json!({
            "id": id,
            "title": format!("Book {id}"),
            "author": "Anon",
            "availableCopies": available,
            "totalCopies": 3,
            "isAvailable": available > 0,
        })
    }

    fn page(key_page: u32, books: Vec<Value>) -> (QueryKey, Value) {
        (
            QueryKey::root("books").with(json!({"page": key_page})),
            json!({"data": books, "page": key_page, "limit": 10, "total": 2, "totalPages": 1}),
        )
    }

    fn cache_with_books() -> MemoryCache {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let (key, value) = page(1, vec![book("b1", 3), book("b2", 1)]);
        cache.insert(key, value);
        let (key, value) = page(2, vec![book("b9", 2)]);
        cache.insert(key, value);
        cache.insert(QueryKey::root("books").with("b1"), book("b1", 3));
        cache
    }

    #[test]
    fn test_plan_per_kind() {
        let policy = CacheSyncPolicy::new();
        assert!(matches!(
            policy.plan(&stock("b1", 2)).as_slice(),
            [CacheOp::PatchBookStock { .. }]
        ));

        let prefixes: Vec<String> = policy
            .plan(&borrow(BorrowStatus::Approved))
            .into_iter()
            .map(|op| match op {
                CacheOp::Invalidate { prefix } => prefix.to_string(),
                other => panic!("unexpected op {other:?}"),
            })
            .collect();
        assert_eq!(prefixes, vec![r#"["borrowings"]"#, r#"["admin","borrowings"]"#]);

        let note = PushEvent::Notification(NotificationPayload {
            title: "t".into(),
            message: "m".into(),
            kind: NotificationKind::Info,
            timestamp: Utc::now(),
        });
        assert_eq!(
            policy.plan(&note),
            vec![CacheOp::Invalidate {
                prefix: QueryKey::root("notifications")
            }]
        );
    }

    #[test]
    fn test_stock_update_patches_pages_and_detail() {
        let cache = cache_with_books();
        let outcome = CacheSyncPolicy::new().apply(&stock("b1", 2), &cache);
        assert_eq!(outcome.patched, 2);

        let listed = cache
            .get(&QueryKey::root("books").with(json!({"page": 1})))
            .unwrap();
        assert_eq!(listed["data"][0]["availableCopies"], json!(2));
        assert_eq!(listed["data"][1], book("b2", 1));

        let detail = cache.get(&QueryKey::root("books").with("b1")).unwrap();
        assert_eq!(detail["availableCopies"], json!(2));
        assert_eq!(detail["title"], json!("Book b1"));

        // The page without the book is left exactly as it was.
        let (key, untouched) = page(2, vec![book("b9", 2)]);
        assert_eq!(cache.get(&key).unwrap(), untouched);
    }

    #[test]
    fn test_patch_keeps_order_and_freshness() {
        let cache = cache_with_books();
        let key = QueryKey::root("books").with(json!({"page": 1}));
        CacheSyncPolicy::new().apply(&stock("b2", 0), &cache);

        let listed = cache.get(&key).unwrap();
        let ids: Vec<&str> = listed["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["b1", "b2"]);
        assert_eq!(listed["data"][1]["isAvailable"], json!(false));
        assert!(matches!(cache.read(&key), CacheRead::Fresh(_)));
    }

    #[test]
    fn test_stock_update_is_idempotent() {
        let policy = CacheSyncPolicy::new();
        let once = cache_with_books();
        let twice = cache_with_books();
        let event = stock("b1", 2);

        policy.apply(&event, &once);
        policy.apply(&event, &twice);
        policy.apply(&event, &twice);

        for key in once.keys_under(&QueryKey::root("books")) {
            assert_eq!(once.get(&key), twice.get(&key));
        }
    }

    #[test]
    fn test_last_applied_stock_wins() {
        let cache = cache_with_books();
        let policy = CacheSyncPolicy::new();
        policy.apply(&stock("b1", 1), &cache);
        policy.apply(&stock("b1", 0), &cache);

        let detail = cache.get(&QueryKey::root("books").with("b1")).unwrap();
        assert_eq!(detail["availableCopies"], json!(0));
        assert_eq!(detail["isAvailable"], json!(false));
    }

    #[test]
    fn test_numeric_ids_match() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let key = QueryKey::root("books");
        cache.insert(key.clone(), json!([{"id": 42, "availableCopies": 1}]));

        let outcome = CacheSyncPolicy::new().apply(&stock("42", 5), &cache);
        assert_eq!(outcome.patched, 1);
        assert_eq!(cache.get(&key).unwrap()[0]["availableCopies"], json!(5));
    }

    #[test]
    fn test_unknown_book_is_a_miss() {
        let cache = cache_with_books();
        let before: Vec<_> = cache
            .keys_under(&QueryKey::root("books"))
            .into_iter()
            .map(|k| cache.get(&k))
            .collect();

        let outcome = CacheSyncPolicy::new().apply(&stock("nope", 1), &cache);
        assert!(outcome.is_miss());

        let after: Vec<_> = cache
            .keys_under(&QueryKey::root("books"))
            .into_iter()
            .map(|k| cache.get(&k))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_cache_is_a_miss() {
        let cache = MemoryCache::new(Duration::from_secs(60));
        let policy = CacheSyncPolicy::new();
        assert!(policy.apply(&stock("b1", 1), &cache).is_miss());
        assert!(policy.apply(&borrow(BorrowStatus::Pending), &cache).is_miss());
    }

    #[test]
    fn test_borrow_update_invalidates_borrowings_only() {
        let cache = cache_with_books();
        cache.insert(QueryKey::root("borrowings"), json!({"data": []}));
        cache.insert(
            QueryKey::path("admin/borrowings").with(json!({"status": "pending"})),
            json!({"data": []}),
        );
        cache.insert(QueryKey::root("fines"), json!([]));

        let outcome = CacheSyncPolicy::new().apply(&borrow(BorrowStatus::Returned), &cache);
        assert_eq!(outcome, SyncOutcome { invalidated: 2, patched: 0 });

        assert!(matches!(
            cache.read(&QueryKey::root("borrowings")),
            CacheRead::Stale(_)
        ));
        assert!(matches!(
            cache.read(&QueryKey::path("admin/borrowings").with(json!({"status": "pending"}))),
            CacheRead::Stale(_)
        ));
        assert!(matches!(cache.read(&QueryKey::root("fines")), CacheRead::Fresh(_)));
        let detail = cache.get(&QueryKey::root("books").with("b1")).unwrap();
        assert_eq!(detail, book("b1", 3));
    }

    #[test]
    fn test_resync_marks_every_synced_prefix_stale() {
        let cache = cache_with_books();
        cache.insert(QueryKey::root("borrowings"), json!({"data": []}));
        cache.insert(QueryKey::path("admin/borrowings"), json!({"data": []}));
        cache.insert(QueryKey::root("notifications"), json!({"data": []}));
        cache.insert(QueryKey::root("fines"), json!([]));

        let outcome = CacheSyncPolicy::new().resync(&cache);
        assert_eq!(outcome, SyncOutcome { invalidated: 6, patched: 0 });
        assert!(matches!(
            cache.read(&QueryKey::root("books").with("b1")),
            CacheRead::Stale(_)
        ));
        assert!(matches!(
            cache.read(&QueryKey::root("notifications")),
            CacheRead::Stale(_)
        ));
        assert!(matches!(cache.read(&QueryKey::root("fines")), CacheRead::Fresh(_)));
    }
}
