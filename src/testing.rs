//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use serde_json::Value;

use crate::channel::transport::{MessageStream, PushTransport, TransportError, WireMessage};

type Frame = Result<WireMessage, TransportError>;

#[derive(Default)]
struct Script {
    tokens: Vec<String>,
    failures: VecDeque<TransportError>,
    live: Option<mpsc::UnboundedSender<Frame>>,
}

/// In-memory transport. Each successful `connect` hands out a fresh stream
/// that the test feeds with [`push`](Self::push).
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `connect` fails with `err` instead of opening a stream.
    pub fn fail_next(&self, err: TransportError) {
        self.lock().failures.push_back(err);
    }

    pub fn connect_count(&self) -> usize {
        self.lock().tokens.len()
    }

    /// Tokens passed to `connect`, oldest first.
    pub fn tokens(&self) -> Vec<String> {
        self.lock().tokens.clone()
    }

    /// Whether the most recent stream still has a reader.
    pub fn is_connected(&self) -> bool {
        self.lock().live.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Send `payload` as a named frame on the current stream.
    pub fn push(&self, event: &str, payload: Value) -> bool {
        self.push_raw(WireMessage::new(event, payload.to_string()))
    }

    pub fn push_raw(&self, message: WireMessage) -> bool {
        match self.lock().live.as_ref() {
            Some(tx) => tx.unbounded_send(Ok(message)).is_ok(),
            None => false,
        }
    }

    /// End the current stream as if the server hung up.
    pub fn drop_connection(&self) {
        self.lock().live = None;
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl PushTransport for ScriptedTransport {
    async fn connect(&self, access_token: &str) -> Result<MessageStream, TransportError> {
        let mut script = self.lock();
        script.tokens.push(access_token.to_string());
        if let Some(err) = script.failures.pop_front() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded();
        script.live = Some(tx);
        Ok(Box::pin(rx))
    }

    fn endpoint(&self) -> &str {
        "scripted://push"
    }
}

/// Poll `condition` until it holds, yielding to other tasks in between.
/// Works with both real and paused clocks.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..1000 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Let spawned tasks run without advancing far in time.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
