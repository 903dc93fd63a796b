//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use tandem_session::{ConnectionSocket, Response, SocketError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Encoded message waiting for the write task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// JSON in a text frame.
    Text(String),
    /// JSON in a binary frame.
    Binary(Vec<u8>),
}

impl Outbound {
    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A connected WebSocket client.
///
/// Sends never block: a full queue drops the message and counts it.
pub struct ClientConnection {
    id: String,
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    closed: AtomicBool,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection writing into `tx`.
    pub fn new(id: impl Into<String>, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            closed: AtomicBool::new(false),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Stop accepting sends.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    fn enqueue(&self, message: Outbound) -> Result<usize, SocketError> {
        let len = message.len();
        match self.tx.try_send(message) {
            Ok(()) => Ok(len),
            Err(TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                Err(SocketError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.close();
                Err(SocketError::Closed)
            }
        }
    }
}

#[async_trait]
impl ConnectionSocket for ClientConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.tx.is_closed()
    }

    async fn send(
        &self,
        response: &Response,
        binary: bool,
        _compression: bool,
    ) -> Result<usize, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        let message = if binary {
            Outbound::Binary(serde_json::to_vec(response)?)
        } else {
            Outbound::Text(serde_json::to_string(response)?)
        };
        self.enqueue(message)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
