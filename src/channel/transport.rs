//! Push transports.
//!
//! A transport turns an access token into a stream of named wire messages.
//! `SseTransport` speaks Server-Sent Events over `reqwest`; tests plug in
//! scripted transports through the same trait.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use tracing::{debug, info, trace};

use crate::bus::{EventError, PushEvent};
use crate::config::SyncConfig;

/// SSE event name used when a frame carries a full `{event, payload}` envelope.
pub const ENVELOPE_EVENT: &str = "message";

// ============================================================================
// Transport Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    /// The server refused the token (HTTP 401/403).
    #[error("access token rejected (HTTP {status})")]
    AuthRejected { status: u16 },
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("stream error: {0}")]
    Stream(String),
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    pub fn connection<E: std::fmt::Display>(err: E) -> Self {
        TransportError::Connection(err.to_string())
    }

    /// Whether a reconnect attempt could succeed without caller action.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connection(_) | TransportError::Stream(_) => true,
            TransportError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            TransportError::AuthRejected { .. } | TransportError::InvalidConfig(_) => false,
        }
    }
}

// ============================================================================
// Wire Messages
// ============================================================================

/// One named message as delivered by the transport, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub event: String,
    pub data: String,
}

impl WireMessage {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Classify the message. Frames named `message` carry the whole envelope
    /// in `data`; any other name is the event kind and `data` is the payload.
    pub fn decode(&self) -> Result<PushEvent, EventError> {
        if self.event.is_empty() || self.event == ENVELOPE_EVENT {
            return PushEvent::from_envelope(&self.data);
        }
        let payload: serde_json::Value =
            serde_json::from_str(&self.data).map_err(|e| EventError::MalformedEvent {
                kind: self.event.clone(),
                reason: e.to_string(),
            })?;
        PushEvent::decode(&self.event, payload)
    }
}

pub type MessageStream = Pin<Box<dyn Stream<Item = Result<WireMessage, TransportError>> + Send>>;

// ============================================================================
// Transport Trait
// ============================================================================

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open one authenticated connection. The stream ends when the server
    /// drops the connection.
    async fn connect(&self, access_token: &str) -> Result<MessageStream, TransportError>;

    /// Where this transport connects, for logs.
    fn endpoint(&self) -> &str;
}

// ============================================================================
// Reconnect Policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl From<&SyncConfig> for ReconnectPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            base_delay: config.reconnect_base(),
            max_delay: config.reconnect_max(),
            max_attempts: config.max_reconnect_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Exponential backoff: `base * 2^attempt`, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(16));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

// ============================================================================
// SSE Decoding
// ============================================================================

/// Longest partial line the decoder buffers while waiting for its newline.
pub const MAX_SSE_LINE_BYTES: usize = 1024 * 1024;

/// Incremental Server-Sent Events decoder. Chunks may split lines or even
/// UTF-8 sequences; only complete lines are interpreted.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and collect every message it completes. Fails once an
    /// unterminated line outgrows [`MAX_SSE_LINE_BYTES`]; the stream is then
    /// unusable and should be dropped.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<WireMessage>, TransportError> {
        self.pending.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
            if let Some(message) = self.process_line(line) {
                messages.push(message);
            }
        }
        if self.pending.len() > MAX_SSE_LINE_BYTES {
            let buffered = self.pending.len();
            self.pending.clear();
            return Err(TransportError::Stream(format!(
                "SSE line exceeds {MAX_SSE_LINE_BYTES} bytes ({buffered} buffered without a newline)"
            )));
        }
        Ok(messages)
    }

    fn process_line(&mut self, line: &str) -> Option<WireMessage> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // Keepalive comment.
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" | "retry" => {}
            other => trace!("ignoring unknown SSE field: {other}"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<WireMessage> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(WireMessage {
            event: event.unwrap_or_else(|| ENVELOPE_EVENT.to_string()),
            data,
        })
    }
}

// ============================================================================
// SSE Transport
// ============================================================================

/// Server-Sent Events over HTTP, authenticated with a bearer token.
pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl SseTransport {
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        Self::with_endpoint(config.endpoint(), config.connect_timeout())
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(TransportError::InvalidConfig(format!(
                "push endpoint must be http(s): {endpoint}"
            )));
        }
        // No overall request timeout: the stream is meant to stay open.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn connect(&self, access_token: &str) -> Result<MessageStream, TransportError> {
        debug!("connecting to push stream at {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| TransportError::connection(format!("failed to reach push endpoint: {e}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TransportError::AuthRejected {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message,
            });
        }

        info!("connected to push stream at {}", self.endpoint);

        let mut decoder = SseDecoder::new();
        let stream = response.bytes_stream().flat_map(move |chunk| {
            let items: Vec<Result<WireMessage, TransportError>> = match chunk {
                Ok(bytes) => match decoder.feed(&bytes) {
                    Ok(messages) => messages.into_iter().map(Ok).collect(),
                    Err(err) => vec![Err(err)],
                },
                Err(e) => vec![Err(TransportError::Stream(e.to_string()))],
            };
            futures::stream::iter(items)
        });
        Ok(Box::pin(stream))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

// ============================================================================
// Tests
// ============================================================================
