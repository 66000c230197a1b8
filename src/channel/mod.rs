//! The push connection.
//!
//! `EventChannel` keeps at most one live connection, bound to the access
//! token that opened it:
//! - same token again: no-op
//! - different token: the old connection is closed first
//! - unexpected drop: reconnect with backoff using the held token
//! - `close`: delivery stops immediately, pending reconnects are cancelled
//!
//! Failures never reach callers as errors. They show up as [`ChannelStatus`]
//! changes and log lines; the rest of the client keeps working from cached
//! data.

pub mod transport;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, EventError, Subscription};
use transport::{MessageStream, PushTransport, ReconnectPolicy, TransportError};

// ============================================================================
// Status
// ============================================================================

/// Diagnostic state of the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// Live updates are off; cached data is still served.
    Degraded { reason: String },
    /// The token was refused. No retry until a new token is supplied.
    AuthRejected,
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Idle => write!(f, "idle"),
            ChannelStatus::Connecting => write!(f, "connecting"),
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Reconnecting { attempt, delay_ms } => {
                write!(f, "reconnecting (attempt {attempt}, in {delay_ms}ms)")
            }
            ChannelStatus::Degraded { reason } => write!(f, "degraded: {reason}"),
            ChannelStatus::AuthRejected => write!(f, "auth rejected"),
            ChannelStatus::Closed => write!(f, "closed"),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Identifies one opened connection. Once closed it stays closed; reopening
/// yields a new handle.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    generation: u64,
    closed: Arc<AtomicBool>,
}

impl ChannelHandle {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn closed() -> Self {
        Self {
            generation: 0,
            closed: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> u64 {
        self.generation
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
    }
}

impl Eq for ChannelHandle {}

// ============================================================================
// Channel
// ============================================================================

struct ActiveConnection {
    handle: ChannelHandle,
    token: String,
    token_tx: watch::Sender<Option<String>>,
    task: JoinHandle<()>,
}

pub struct EventChannel {
    transport: Arc<dyn PushTransport>,
    bus: Arc<EventBus>,
    reconnect: ReconnectPolicy,
    active: Mutex<Option<ActiveConnection>>,
    status_tx: Arc<watch::Sender<ChannelStatus>>,
}

impl EventChannel {
    pub fn new(transport: Arc<dyn PushTransport>, reconnect: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Self {
            transport,
            bus: Arc::new(EventBus::new()),
            reconnect,
            active: Mutex::new(None),
            status_tx: Arc::new(status_tx),
        }
    }

    /// Open the connection for `token`. Must be called inside a tokio runtime.
    pub fn open(&self, token: impl Into<String>) -> ChannelHandle {
        let token = token.into();
        if token.trim().is_empty() {
            warn!("refusing to open push channel without an access token");
            return ChannelHandle::closed();
        }

        let mut active = self.lock();
        if let Some(current) = active.as_ref() {
            if current.token == token && current.handle.is_open() && !current.task.is_finished() {
                debug!(handle = current.handle.id(), "push channel already open for this token");
                return current.handle.clone();
            }
        }
        if let Some(previous) = active.take() {
            info!(handle = previous.handle.id(), "replacing push connection");
            self.shutdown(previous);
        }

        let generation = self.bus.begin_generation();
        let handle = ChannelHandle::new(generation);
        let (token_tx, token_rx) = watch::channel(Some(token.clone()));
        let task = tokio::spawn(
            ConnectionTask {
                generation,
                transport: self.transport.clone(),
                bus: self.bus.clone(),
                token_rx,
                status_tx: self.status_tx.clone(),
                reconnect: self.reconnect,
            }
            .run(),
        );
        info!(handle = generation, endpoint = self.transport.endpoint(), "push channel opened");

        *active = Some(ActiveConnection {
            handle: handle.clone(),
            token,
            token_tx,
            task,
        });
        handle
    }

    /// Close `handle`. A stale handle (already replaced or closed) is ignored.
    pub fn close(&self, handle: &ChannelHandle) {
        let mut active = self.lock();
        let matches = active
            .as_ref()
            .is_some_and(|current| current.handle == *handle);
        if matches {
            if let Some(current) = active.take() {
                self.shutdown(current);
            }
        } else {
            handle.mark_closed();
        }
    }

    /// Close whatever connection is open. Returns whether one was.
    pub fn close_current(&self) -> bool {
        match self.lock().take() {
            Some(current) => {
                self.shutdown(current);
                true
            }
            None => false,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.lock().as_ref().is_some_and(|c| c.handle.is_open())
    }

    pub fn status(&self) -> ChannelStatus {
        self.status_tx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    fn shutdown(&self, connection: ActiveConnection) {
        // Delivery stops here, before any network teardown.
        self.bus.end_generation(connection.handle.id());
        connection.handle.mark_closed();
        connection.token_tx.send_replace(None);
        connection.task.abort();
        self.status_tx.send_replace(ChannelStatus::Closed);
        info!(handle = connection.handle.id(), "push channel closed");
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveConnection>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EventChannel {
    fn drop(&mut self) {
        let active = self.active.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = active.take() {
            self.bus.end_generation(connection.handle.id());
            connection.handle.mark_closed();
            connection.task.abort();
        }
    }
}

// ============================================================================
// Connection Task
// ============================================================================

/// Resolves once the held token is cleared or its sender is gone.
async fn token_cleared(rx: &mut watch::Receiver<Option<String>>) {
    loop {
        if rx.borrow_and_update().is_none() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

enum PumpEnd {
    /// The token was cleared or the generation ended.
    Closed,
    /// The connection dropped; reconnect if allowed.
    Dropped(String),
}

struct ConnectionTask {
    generation: u64,
    transport: Arc<dyn PushTransport>,
    bus: Arc<EventBus>,
    token_rx: watch::Receiver<Option<String>>,
    status_tx: Arc<watch::Sender<ChannelStatus>>,
    reconnect: ReconnectPolicy,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        loop {
            // Reconnects always use the token held right now.
            let Some(token) = self.token_rx.borrow().clone() else {
                break;
            };
            if !self.bus.is_live(self.generation) {
                break;
            }

            self.set_status(ChannelStatus::Connecting);
            let transport = self.transport.clone();
            let connected = tokio::select! {
                result = transport.connect(&token) => result,
                _ = token_cleared(&mut self.token_rx) => break,
            };

            match connected {
                Ok(stream) => {
                    attempt = 0;
                    self.set_status(ChannelStatus::Connected);
                    match self.pump(stream).await {
                        PumpEnd::Closed => break,
                        PumpEnd::Dropped(reason) => {
                            warn!(generation = self.generation, "push connection lost: {reason}");
                        }
                    }
                }
                Err(TransportError::AuthRejected { status }) => {
                    warn!(status, "push connection rejected the access token");
                    self.set_status(ChannelStatus::AuthRejected);
                    break;
                }
                Err(err) if !err.is_retryable() => {
                    error!("push connection failed permanently: {err}");
                    self.set_status(ChannelStatus::Degraded {
                        reason: err.to_string(),
                    });
                    break;
                }
                Err(err) => {
                    warn!(attempt, "push connection failed: {err}");
                }
            }

            if self.reconnect.exhausted(attempt) {
                warn!(attempt, "giving up on push connection");
                self.set_status(ChannelStatus::Degraded {
                    reason: format!("reconnect limit of {attempt} attempts reached"),
                });
                break;
            }
            let delay = self.reconnect.delay(attempt);
            attempt += 1;
            self.set_status(ChannelStatus::Reconnecting {
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            debug!(attempt, ?delay, "scheduling push reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = token_cleared(&mut self.token_rx) => break,
            }
        }
        debug!(generation = self.generation, "push connection task finished");
    }

    async fn pump(&mut self, mut stream: MessageStream) -> PumpEnd {
        loop {
            let next = tokio::select! {
                item = stream.next() => item,
                _ = token_cleared(&mut self.token_rx) => return PumpEnd::Closed,
            };
            let message = match next {
                None => return PumpEnd::Dropped("stream ended".to_string()),
                Some(Err(err)) => return PumpEnd::Dropped(err.to_string()),
                Some(Ok(message)) => message,
            };
            match message.decode() {
                Ok(event) => {
                    if self.bus.publish(self.generation, event).is_none() {
                        return PumpEnd::Closed;
                    }
                }
                Err(EventError::UnknownKind(kind)) => {
                    warn!(kind = %kind, "dropping push event of unknown kind");
                }
                Err(err) => {
                    warn!("dropping malformed push event: {err}");
                }
            }
        }
    }

    /// Status writes from a closed generation are discarded so they cannot
    /// overwrite `Closed`.
    fn set_status(&self, status: ChannelStatus) {
        let bus = &self.bus;
        let generation = self.generation;
        self.status_tx.send_if_modified(|current| {
            if !bus.is_live(generation) || *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}
