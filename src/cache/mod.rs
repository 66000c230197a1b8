//! Query-keyed read model shared by the data-fetch layer and the push sync.
//!
//! Keys are ordered lists of JSON segments (`["books", {"page": 1}]`). Every
//! operation that touches more than one entry addresses them by key prefix.

pub mod policy;

use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use policy::{CacheOp, CacheSyncPolicy, SyncOutcome};

// ============================================================================
// Keys
// ============================================================================

/// Structured cache key. Equality and hashing go through the canonical JSON
/// rendering, so object segments compare independent of field order.
#[derive(Clone)]
pub struct QueryKey {
    segments: Vec<Value>,
    canonical: String,
}

impl QueryKey {
    pub fn new(segments: Vec<Value>) -> Self {
        let canonical = Value::Array(segments.clone()).to_string();
        Self {
            segments,
            canonical,
        }
    }

    /// Key made of plain string segments: `"admin/borrowings"` becomes
    /// `["admin", "borrowings"]`.
    pub fn path(path: &str) -> Self {
        Self::new(
            path.split('/')
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        )
    }

    pub fn root(name: &str) -> Self {
        Self::new(vec![Value::String(name.to_string())])
    }

    /// Extend with one more segment.
    pub fn with(mut self, segment: impl Into<Value>) -> Self {
        self.segments.push(segment.into());
        Self::new(self.segments)
    }

    pub fn segments(&self) -> &[Value] {
        &self.segments
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        prefix.segments.len() <= self.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryKey({})", self.canonical)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

// ============================================================================
// Cache contract
// ============================================================================

/// What the sync policy needs from a cache. Both operations return how many
/// entries they touched; zero is not an error.
pub trait KeyedCache: Send + Sync {
    /// Mark every entry under `prefix` stale. Values are kept.
    fn invalidate(&self, prefix: &QueryKey) -> usize;

    /// Run `updater` over every entry under `prefix`. It returns whether it
    /// changed the value.
    fn patch(
        &self,
        prefix: &QueryKey,
        updater: &mut dyn FnMut(&QueryKey, &mut Value) -> bool,
    ) -> usize;
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub fetched_at: Instant,
    pub stale_at: Instant,
}

impl CacheEntry {
    pub fn is_stale(&self) -> bool {
        Instant::now() >= self.stale_at
    }
}

/// Result of a plain cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheRead {
    Fresh(Value),
    /// Still servable, but the next fetch should refresh it.
    Stale(Value),
    Missing,
}

// ============================================================================
// In-memory cache
// ============================================================================

pub struct MemoryCache {
    entries: DashMap<QueryKey, CacheEntry>,
    stale_after: Duration,
}

impl MemoryCache {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            stale_after,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn insert(&self, key: QueryKey, value: Value) {
        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                value,
                fetched_at: now,
                stale_at: now + self.stale_after,
            },
        );
    }

    pub fn get(&self, key: &QueryKey) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn entry(&self, key: &QueryKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn read(&self, key: &QueryKey) -> CacheRead {
        match self.entries.get(key) {
            Some(entry) if entry.is_stale() => CacheRead::Stale(entry.value.clone()),
            Some(entry) => CacheRead::Fresh(entry.value.clone()),
            None => CacheRead::Missing,
        }
    }

    /// Serve `key` from the cache when fresh, otherwise run `fetch` and store
    /// the result. A failed refetch falls back to the stale value if there is
    /// one.
    pub async fn fetch_with<F, Fut, E>(&self, key: QueryKey, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: fmt::Display,
    {
        let stale = match self.read(&key) {
            CacheRead::Fresh(value) => return Ok(value),
            CacheRead::Stale(value) => Some(value),
            CacheRead::Missing => None,
        };

        debug!(key = %key, "fetching cache entry");
        match fetch().await {
            Ok(value) => {
                self.insert(key, value.clone());
                Ok(value)
            }
            Err(err) => match stale {
                Some(value) => {
                    warn!(key = %key, "refetch failed, serving stale entry: {err}");
                    Ok(value)
                }
                None => Err(err),
            },
        }
    }

    pub fn keys_under(&self, prefix: &QueryKey) -> Vec<QueryKey> {
        self.entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn remove(&self, key: &QueryKey) -> Option<Value> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyedCache for MemoryCache {
    fn invalidate(&self, prefix: &QueryKey) -> usize {
        let now = Instant::now();
        let mut count = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.key().starts_with(prefix) {
                // Never push an already-stale deadline back out.
                let cached = entry.value_mut();
                cached.stale_at = cached.stale_at.min(now);
                count += 1;
            }
        }
        count
    }

    fn patch(
        &self,
        prefix: &QueryKey,
        updater: &mut dyn FnMut(&QueryKey, &mut Value) -> bool,
    ) -> usize {
        let mut count = 0;
        for mut entry in self.entries.iter_mut() {
            if !entry.key().starts_with(prefix) {
                continue;
            }
            let key = entry.key().clone();
            if updater(&key, &mut entry.value_mut().value) {
                count += 1;
            }
        }
        count
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.len())
            .field("stale_after", &self.stale_after)
            .finish()
    }
}
