//! Real-time client sync for the library catalogue.
//!
//! Keeps a signed-in client's cached view of books and borrowings current
//! from server pushes, and turns user-relevant pushes into a one-at-a-time
//! notification queue.
//!
//! # Architecture
//!
//! - `channel`: the authenticated push connection (SSE) with reconnect
//! - `bus`: event model and in-process fan-out
//! - `cache`: query-keyed read model and the event-to-cache policy
//! - `notify`: the notification queue
//! - `realtime`: wires the above to the session
//! - `session`, `api`, `config`: identity, REST data shapes, settings

pub mod api;
pub mod bus;
pub mod cache;
pub mod channel;
pub mod config;
pub mod notify;
pub mod realtime;
pub mod session;

#[cfg(test)]
mod testing;

pub use bus::{BusRecvError, EventError, EventKind, PushEvent};
pub use cache::{CacheSyncPolicy, KeyedCache, MemoryCache, QueryKey, SyncOutcome};
pub use channel::transport::{PushTransport, SseTransport, TransportError};
pub use channel::{ChannelHandle, ChannelStatus, EventChannel};
pub use config::{ConfigError, SyncConfig};
pub use notify::{Notification, NotificationInput, NotificationKind, NotificationQueue, QueueView};
pub use realtime::RealtimeSync;
pub use session::{CurrentUser, Role, Session, TokenPair};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{0}")]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Event(#[from] EventError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

const DEFAULT_LOG_FILTER: &str = "shelfsync_lib=debug,info";

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter. Calling it again is a no-op.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
