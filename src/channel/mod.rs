//! Byte channel abstraction.
//!
//! [`Channel`] is the uniform contract every transport in this crate is
//! built on: a fire-and-forget `send` and a blocking `recv`. A
//! [`crate::peer::PeerSession`] implements it over a WebRTC data channel;
//! [`LoopbackChannel`] implements it in-process, for tests.
//!
//! # Architecture
//!
//! ```text
//! Channel (trait)
//!     │
//!     ├── PeerSession      — real transport, backed by the data channel
//!     └── LoopbackChannel  — paired in-process queues, for tests
//! ```

pub mod dispatcher;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Errors raised by [`Channel`] operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel's peer has gone away; the send could not be delivered.
    #[error("channel closed")]
    Closed,
}

/// A bidirectional, message-preserving byte channel.
///
/// `send` does not wait for delivery; `recv` blocks until a message arrives
/// or the channel closes. Implementors must preserve message boundaries —
/// callers above this trait (AEAD framing, the dispatcher) rely on it.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send `bytes` as a single message.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the peer has disconnected.
    async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError>;

    /// Receive the next message, or `None` once the channel is closed and
    /// drained.
    async fn recv(&mut self) -> Option<Vec<u8>>;
}

/// An in-process loopback channel, for tests.
///
/// [`LoopbackChannel::pair`] creates two ends such that each `send` on one
/// end asynchronously enqueues into the other's receive queue.
#[derive(Debug)]
pub struct LoopbackChannel {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl LoopbackChannel {
    /// Create a connected pair of loopback channels, each with the given
    /// queue capacity.
    #[must_use]
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(capacity);
        let (tx_b, rx_b) = mpsc::channel(capacity);
        (
            Self { tx: tx_a, rx: rx_b },
            Self { tx: tx_b, rx: rx_a },
        )
    }
}

#[async_trait]
impl Channel for LoopbackChannel {
    async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_pair_delivers_in_order() {
        let (a, mut b) = LoopbackChannel::pair(8);
        a.send(b"first").await.unwrap();
        a.send(b"second").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"first");
        assert_eq!(b.recv().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_loopback_pair_is_bidirectional() {
        let (mut a, b) = LoopbackChannel::pair(8);
        b.send(b"reply").await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"reply");
    }

    #[tokio::test]
    async fn test_loopback_recv_returns_none_after_peer_drop() {
        let (a, mut b) = LoopbackChannel::pair(8);
        drop(a);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn test_loopback_send_fails_after_peer_drop() {
        let (a, b) = LoopbackChannel::pair(8);
        drop(b);
        assert_eq!(a.send(b"hi").await, Err(ChannelError::Closed));
    }
}
