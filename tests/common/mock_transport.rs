//! Mock push transport driven from the test body.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use serde_json::Value;

use shelfsync_lib::channel::transport::{MessageStream, PushTransport, TransportError, WireMessage};

type Frame = Result<WireMessage, TransportError>;

/// Each successful `connect` opens a new in-memory stream; `send` writes to
/// the newest one.
pub struct MockTransport {
    connects: Mutex<Vec<String>>,
    planned_failures: Mutex<VecDeque<TransportError>>,
    stream: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connects: Mutex::new(Vec::new()),
            planned_failures: Mutex::new(VecDeque::new()),
            stream: Mutex::new(None),
        })
    }

    /// Make the next connect attempt fail with `err`.
    pub fn fail_next_connect(&self, err: TransportError) {
        self.planned_failures.lock().unwrap().push_back(err);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().unwrap().len()
    }

    pub fn connect_tokens(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    pub fn send(&self, event: &str, payload: Value) -> bool {
        let frame = WireMessage::new(event, payload.to_string());
        match self.stream.lock().unwrap().as_ref() {
            Some(tx) => tx.unbounded_send(Ok(frame)).is_ok(),
            None => false,
        }
    }

    /// Hang up the current stream from the server side.
    pub fn hang_up(&self) {
        self.stream.lock().unwrap().take();
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn connect(&self, access_token: &str) -> Result<MessageStream, TransportError> {
        self.connects.lock().unwrap().push(access_token.to_string());
        if let Some(err) = self.planned_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded();
        *self.stream.lock().unwrap() = Some(tx);
        Ok(Box::pin(rx))
    }

    fn endpoint(&self) -> &str {
        "mock://notifications"
    }
}
