use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::PushEvent;

const BUS_CAPACITY: usize = 1024;

/// A push event stamped at receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedEvent {
    pub id: String,
    /// Connection generation the event arrived on.
    pub generation: u64,
    pub seq: i64,
    pub received_at: DateTime<Utc>,
    pub event: PushEvent,
}

/// Fan-out of classified push events to any number of subscribers.
///
/// Every connection gets a generation number. Only the live generation may
/// publish, and subscribers discard anything stamped with a generation that
/// is no longer live, so ending a generation stops delivery at once even for
/// events already buffered.
pub struct EventBus {
    tx: broadcast::Sender<ReceivedEvent>,
    seq: AtomicI64,
    next_generation: AtomicU64,
    live: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            tx,
            seq: AtomicI64::new(0),
            next_generation: AtomicU64::new(1),
            live: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start a new generation; any previous one stops delivering.
    pub fn begin_generation(&self) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        self.live.store(generation, Ordering::SeqCst);
        generation
    }

    /// End `generation` if it is still the live one.
    pub fn end_generation(&self, generation: u64) -> bool {
        self.live
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_live(&self, generation: u64) -> bool {
        generation != 0 && self.live.load(Ordering::SeqCst) == generation
    }

    /// Publish an event for `generation`. Returns `None` when that generation
    /// is no longer live and the event was dropped.
    pub fn publish(&self, generation: u64, event: PushEvent) -> Option<ReceivedEvent> {
        if !self.is_live(generation) {
            debug!(generation, kind = %event.kind(), "dropping event from closed connection");
            return None;
        }
        let received = ReceivedEvent {
            id: Uuid::new_v4().to_string(),
            generation,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            received_at: Utc::now(),
            event,
        };
        if self.tx.send(received.clone()).is_err() {
            debug!(seq = received.seq, "no subscribers for push event");
        }
        Some(received)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            live: self.live.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a subscriber got no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusRecvError {
    /// The subscriber fell behind and that many of the oldest events were
    /// overwritten. Receiving can continue; the missed events are gone.
    #[error("subscriber lagged, {0} events were overwritten")]
    Lagged(u64),
    #[error("event bus closed")]
    Closed,
}

/// Receiving side of the bus. Dropping it (or calling `unsubscribe`) cancels
/// delivery.
pub struct Subscription {
    rx: broadcast::Receiver<ReceivedEvent>,
    live: Arc<AtomicU64>,
}

impl Subscription {
    /// Next event from the live connection, in delivery order.
    pub async fn recv(&mut self) -> Result<ReceivedEvent, BusRecvError> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.live.load(Ordering::SeqCst) == event.generation {
                        return Ok(event);
                    }
                    debug!(seq = event.seq, "discarding buffered event from closed connection");
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("push subscriber lagged, {n} events overwritten");
                    return Err(BusRecvError::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusRecvError::Closed),
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `Ok(None)` when nothing
    /// is buffered.
    pub fn try_recv(&mut self) -> Result<Option<ReceivedEvent>, BusRecvError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    if self.live.load(Ordering::SeqCst) == event.generation {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("push subscriber lagged, {n} events overwritten");
                    return Err(BusRecvError::Lagged(n));
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(BusRecvError::Closed),
            }
        }
    }

    pub fn unsubscribe(self) {}
}
