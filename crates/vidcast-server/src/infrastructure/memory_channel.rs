//! In-process signaling channel.
//!
//! Pairs a [`MemoryInbound`] and [`ChannelSender`] for a session with a
//! [`BrowserEnd`] that plays the browser.  Used by the session tests, and
//! handy for driving a session without a network.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::channel::{outbound_queue, ChannelError, ChannelSender, SignalingChannel};

enum Inbound {
    Frame(String),
    Fail(String),
}

/// Session side of an in-memory channel.
pub struct MemoryInbound {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl SignalingChannel for MemoryInbound {
    async fn receive(&mut self) -> Result<Option<String>, ChannelError> {
        match self.rx.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Fail(reason)) => Err(ChannelError::Transport(reason)),
            None => Ok(None),
        }
    }
}

/// Browser side of an in-memory channel.
pub struct BrowserEnd {
    to_session: Option<mpsc::UnboundedSender<Inbound>>,
    from_session: Option<mpsc::Receiver<String>>,
}

impl BrowserEnd {
    /// Delivers a text frame to the session.  Ignored after [`BrowserEnd::hang_up`].
    pub fn send(&self, frame: impl Into<String>) {
        if let Some(tx) = &self.to_session {
            let _ = tx.send(Inbound::Frame(frame.into()));
        }
    }

    /// Makes the session's next `receive` fail with a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        if let Some(tx) = &self.to_session {
            let _ = tx.send(Inbound::Fail(reason.into()));
        }
    }

    /// Ends the inbound sequence: the session sees a clean close.
    pub fn hang_up(&mut self) {
        self.to_session = None;
    }

    /// Stops reading: further session sends fail with `ChannelClosed`.
    pub fn stop_reading(&mut self) {
        self.from_session = None;
    }

    /// Next frame the session sent, or `None` once it has let go of the channel.
    pub async fn recv(&mut self) -> Option<String> {
        match self.from_session.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// A frame already queued by the session, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_session.as_mut().and_then(|rx| rx.try_recv().ok())
    }
}

/// Creates a connected in-memory channel.
pub fn memory_channel(send_timeout: Duration) -> (MemoryInbound, ChannelSender, BrowserEnd) {
    let (to_session, rx) = mpsc::unbounded_channel();
    let (sender, from_session) = outbound_queue(send_timeout);
    (
        MemoryInbound { rx },
        sender,
        BrowserEnd {
            to_session: Some(to_session),
            from_session: Some(from_session),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel::ChannelClosed;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        // Arrange
        let (mut inbound, sender, mut browser) = memory_channel(Duration::from_secs(1));

        // Act
        browser.send("hello");
        sender.send("world".into()).await.unwrap();

        // Assert
        assert_eq!(inbound.receive().await, Ok(Some("hello".to_string())));
        assert_eq!(browser.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_hang_up_is_clean_close_and_fail_is_transport_error() {
        let (mut inbound, _sender, mut browser) = memory_channel(Duration::from_secs(1));

        browser.fail("reset by peer");
        browser.hang_up();

        assert_eq!(
            inbound.receive().await,
            Err(ChannelError::Transport("reset by peer".into()))
        );
        assert_eq!(inbound.receive().await, Ok(None));
    }

    #[tokio::test]
    async fn test_send_after_stop_reading_is_channel_closed() {
        let (_inbound, sender, mut browser) = memory_channel(Duration::from_secs(1));

        browser.stop_reading();

        assert_eq!(sender.send("late".into()).await, Err(ChannelClosed));
    }
}
