//! Bounded outbound queue feeding the session writer.
//!
//! Producers (handlers, the session's own pong replies) never touch the
//! transport. They enqueue serialized frames here and the single writer
//! drains them in order. A full queue applies backpressure; once the session
//! shuts down every send fails fast with [`Error::QueueClosed`].

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Cloneable sending half of the session's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Outbox {
    /// Create the queue. The receiver belongs to the session writer.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Serialize `message` and enqueue it, waiting for room if the queue is
    /// full.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), Error> {
        let text = serde_json::to_string(message).map_err(|e| Error::Protocol(e.to_string()))?;
        self.send_text(text).await
    }

    pub async fn send_text(&self, text: String) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::QueueClosed);
        }
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(Error::QueueClosed),
            sent = self.tx.send(text) => sent.map_err(|_| Error::QueueClosed),
        }
    }

    /// Enqueue without waiting. Fails when the queue is full or closed.
    pub fn try_send<T: Serialize>(&self, message: &T) -> Result<(), Error> {
        if self.closed.is_cancelled() {
            return Err(Error::QueueClosed);
        }
        let text = serde_json::to_string(message).map_err(|e| Error::Protocol(e.to_string()))?;
        self.tx.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::QueueClosed,
        })
    }

    /// Fail all pending and future sends.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
