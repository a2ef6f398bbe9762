//! The signaling channel to one browser, split into its two directions.
//!
//! Inbound is a [`SignalingChannel`]: a finite, ordered sequence of text
//! frames owned by the session task.  Outbound is a [`ChannelSender`]: a
//! bounded queue drained by a single writer task, so only one write is ever
//! in flight on the underlying transport.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Outbound frames a session may queue before `send` starts waiting.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// The channel is closed; the frame was not queued.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("signaling channel closed")]
pub struct ChannelClosed;

/// The inbound side failed (as opposed to closing cleanly).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("transport error: {0}")]
    Transport(String),
}

/// Inbound text frames from the browser.
#[async_trait]
pub trait SignalingChannel: Send {
    /// Next text frame.  `Ok(None)` once the peer has closed the channel.
    async fn receive(&mut self) -> Result<Option<String>, ChannelError>;
}

/// Queues text frames for the connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<String>,
    send_timeout: Duration,
}

impl ChannelSender {
    /// Wraps the producer end of an outbound queue.
    pub fn new(tx: mpsc::Sender<String>, send_timeout: Duration) -> Self {
        Self { tx, send_timeout }
    }

    /// Queues one frame.
    ///
    /// Fails with [`ChannelClosed`] when the writer is gone, or when the queue
    /// stays full for longer than the send timeout.
    pub async fn send(&self, frame: String) -> Result<(), ChannelClosed> {
        match timeout(self.send_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => {
                debug!("outbound frame dropped: writer closed");
                Err(ChannelClosed)
            }
            Err(_) => {
                warn!(
                    "outbound queue stalled for {:?}; treating channel as closed",
                    self.send_timeout
                );
                Err(ChannelClosed)
            }
        }
    }

    /// `true` once the writer has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates an outbound queue: the session's sender and the writer's receiver.
pub fn outbound_queue(send_timeout: Duration) -> (ChannelSender, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    (ChannelSender::new(tx, send_timeout), rx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
