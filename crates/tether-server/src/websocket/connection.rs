//! Per-client connection state and outbound frame channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_rpc::protocol::{CallResponse, Envelope, ResponseBatch};

use crate::engine::ResultSink;
use crate::liveness::ProbeTransport;

/// A frame queued for the connection's writer task.
pub enum Outbound {
    /// A serialized envelope to send as a text frame.
    Frame(Arc<String>),
    /// Close the socket with a normal-closure code and this reason.
    Close(String),
}

/// A connected bridge client.
///
/// Everything that wants to talk to the client goes through the bounded
/// outbound channel; the writer task owns the socket. The connection
/// doubles as the [`ResultSink`] for its async calls and the
/// [`ProbeTransport`] for its liveness record.
pub struct ClientConnection {
    /// Unique connection id.
    pub id: String,
    tx: mpsc::Sender<Outbound>,
    /// When the connection was established.
    pub connected_at: Instant,
    dropped_frames: AtomicU64,
}

impl ClientConnection {
    /// Create a connection around the writer task's channel.
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            id: id.into(),
            tx,
            connected_at: Instant::now(),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Queue a pre-serialized frame. Returns `false` (and counts a drop)
    /// if the channel is full or closed.
    pub fn send_frame(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(Outbound::Frame(frame)).is_ok() {
            true
        } else {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue an envelope.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match tether_rpc::frame::encode_text(envelope) {
            Ok(json) => self.send_frame(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Ask the writer task to close the socket.
    pub fn request_close(&self, reason: &str) -> bool {
        self.tx.try_send(Outbound::Close(reason.to_owned())).is_ok()
    }

    /// Whether the writer task is still reachable.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Frames dropped because the outbound channel was full or closed.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl ResultSink for ClientConnection {
    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn deliver(&self, response: CallResponse) -> bool {
        let batch = ResponseBatch {
            responses: vec![response],
        };
        match serde_json::to_value(&batch) {
            Ok(payload) => self.send_envelope(&Envelope::data(payload)),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ProbeTransport for ClientConnection {
    fn is_open(&self) -> bool {
        ClientConnection::is_open(self)
    }

    async fn send_ping(&self) -> bool {
        self.send_envelope(&Envelope::ping())
    }

    async fn close(&self, reason: &str) -> bool {
        self.request_close(reason)
    }
}
