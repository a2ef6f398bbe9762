//! WebSocket adapter for the signaling channel.
//!
//! The upgraded socket is split in two.  The read half becomes a
//! [`WsInbound`] owned by the session task; the write half is moved into a
//! dedicated writer task fed by the session's [`ChannelSender`].  When every
//! sender is dropped the writer sends a close frame and exits.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::application::channel::{outbound_queue, ChannelError, ChannelSender, SignalingChannel};

/// Read half of a browser WebSocket.
pub struct WsInbound {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl SignalingChannel for WsInbound {
    async fn receive(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(data))) => {
                    warn!(len = data.len(), "binary frame ignored");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    trace!("control frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "browser sent close");
                    return Ok(None);
                }
                Some(Err(e)) => return Err(ChannelError::Transport(e.to_string())),
                None => return Ok(None),
            }
        }
    }
}

/// Splits `socket` into the session's inbound channel, its outbound sender
/// and the writer task that owns the write half.
pub fn split_socket(
    socket: WebSocket,
    send_timeout: Duration,
) -> (WsInbound, ChannelSender, JoinHandle<()>) {
    let (sink, stream) = socket.split();
    let (sender, frames) = outbound_queue(send_timeout);
    let writer = tokio::spawn(write_frames(sink, frames));
    (WsInbound { stream }, sender, writer)
}

async fn write_frames(mut sink: SplitSink<WebSocket, Message>, mut frames: mpsc::Receiver<String>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(Message::Text(frame)).await {
            debug!("websocket write failed: {e}");
            return;
        }
    }
    // All senders gone: the session is over.
    if let Err(e) = sink.close().await {
        trace!("websocket close failed: {e}");
    }
}
