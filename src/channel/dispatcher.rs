//! Byte-tag multiplexer.
//!
//! Two [`Dispatcher`]s share one underlying [`Channel`], distinguished by a
//! one-byte tag prefix (`0x00`/`0x01`). A single task owns the underlying
//! channel outright: it's the only thing that ever calls `recv`/`send` on
//! it, so nothing ever blocks waiting for a lock the task itself is
//! holding while parked on an empty channel. Inbound frames are peeled and
//! routed to the matching dispatcher's inbound queue; outbound frames from
//! either dispatcher arrive pre-tagged on a shared queue the same task
//! drains.
//!
//! Termination is unusual enough to restate: an empty frame, or a frame
//! tagged outside `{0x00, 0x01}`, ends the demux task and that frame is
//! **not** delivered to either dispatcher. A close request does the same
//! thing on demand. Either way, termination closes both dispatchers'
//! inbound queues; closing twice is a no-op.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::{Channel, ChannelError};

const TAG_ZERO: u8 = 0x00;
const TAG_ONE: u8 = 0x01;

/// Errors raised by [`Dispatcher::send`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The underlying channel rejected the send.
    #[error("underlying channel closed")]
    ChannelClosed,
}

impl From<ChannelError> for DispatchError {
    fn from(_: ChannelError) -> Self {
        Self::ChannelClosed
    }
}

/// One logical sub-channel of a dual-dispatched physical [`Channel`].
pub struct Dispatcher<C> {
    tag: u8,
    out_tx: mpsc::Sender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    reclaim: Arc<Mutex<Option<oneshot::Receiver<C>>>>,
}

impl<C> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl<C: Channel + 'static> Dispatcher<C> {
    /// Enqueue `tag || payload` for the demux task to transmit on the
    /// underlying channel.
    ///
    /// Returns as soon as the frame is queued, not once it is actually
    /// written — the demux task is the only thing that ever touches the
    /// underlying channel, so this never contends with it for a lock.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ChannelClosed`] if the demux task has
    /// already terminated.
    pub async fn send(&self, payload: &[u8]) -> Result<(), DispatchError> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(self.tag);
        frame.extend_from_slice(payload);
        self.out_tx
            .send(frame)
            .await
            .map_err(|_| DispatchError::ChannelClosed)
    }

    /// Receive the next payload routed to this sub-channel.
    ///
    /// Returns `None` once the demux task has terminated and this
    /// dispatcher's queue is drained.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Reclaim the underlying channel for direct (untagged) use, once the
    /// demux task has terminated — e.g. after a close request.
    ///
    /// Returns `None` if the demux task is still running, or if the
    /// channel was already reclaimed by a prior call (on either
    /// dispatcher of the pair — only one caller gets it back).
    pub async fn reclaim_underlying(&self) -> Option<C> {
        let mut slot = self.reclaim.lock().await;
        match slot.as_mut()?.try_recv() {
            Ok(channel) => {
                *slot = None;
                Some(channel)
            }
            Err(_) => None,
        }
    }
}

/// Split one physical [`Channel`] into two tag-dispatched sub-channels.
///
/// Spawns the demultiplex task, which takes ownership of `underlying` for
/// its whole lifetime: it alone calls `recv`/`send` on it, selecting
/// across the underlying channel's inbound frames, the shared outbound
/// queue fed by [`Dispatcher::send`], and `close_requests`. On
/// termination the underlying channel is hand back via a one-shot,
/// retrievable through [`Dispatcher::reclaim_underlying`].
///
/// The demux task processes one inbound frame to completion — including
/// waiting for a full dispatcher queue to drain — before reading the next;
/// a slow reader on one sub-channel therefore blocks the other. This is an
/// accepted property, not a bug.
#[must_use]
pub fn dual_dispatch<C: Channel + 'static>(
    mut underlying: C,
    mut close_requests: mpsc::Receiver<()>,
) -> (Dispatcher<C>, Dispatcher<C>) {
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(32);
    let (tx0, rx0) = mpsc::channel(32);
    let (tx1, rx1) = mpsc::channel(32);
    let (reclaim_tx, reclaim_rx) = oneshot::channel();
    let reclaim = Arc::new(Mutex::new(Some(reclaim_rx)));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                frame = underlying.recv() => {
                    match frame {
                        Some(frame) if frame.is_empty() => {
                            log::info!("dispatcher: empty frame, terminating demux");
                            break;
                        }
                        Some(frame) => {
                            let tag = frame[0];
                            let payload = frame[1..].to_vec();
                            match tag {
                                TAG_ZERO => {
                                    if tx0.send(payload).await.is_err() {
                                        break;
                                    }
                                }
                                TAG_ONE => {
                                    if tx1.send(payload).await.is_err() {
                                        break;
                                    }
                                }
                                other => {
                                    log::warn!(
                                        "dispatcher: unknown tag {other:#x}, terminating demux"
                                    );
                                    break;
                                }
                            }
                        }
                        None => {
                            log::info!("dispatcher: underlying channel closed");
                            break;
                        }
                    }
                }
                Some(frame) = out_rx.recv() => {
                    if underlying.send(&frame).await.is_err() {
                        log::warn!("dispatcher: underlying send failed, terminating demux");
                        break;
                    }
                }
                _ = close_requests.recv() => {
                    log::info!("dispatcher: close requested, terminating demux");
                    break;
                }
            }
        }
        // Dropping tx0/tx1 here closes both dispatchers' queues. A second
        // close request racing the already-finished task is a no-op since
        // nothing is left to terminate.
        let _ = reclaim_tx.send(underlying);
    });

    (
        Dispatcher {
            tag: TAG_ZERO,
            out_tx: out_tx.clone(),
            inbound_rx: Mutex::new(rx0),
            reclaim: Arc::clone(&reclaim),
        },
        Dispatcher {
            tag: TAG_ONE,
            out_tx,
            inbound_rx: Mutex::new(rx1),
            reclaim,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::LoopbackChannel;

    #[tokio::test]
    async fn test_dispatcher_isolation_and_order() {
        let (a, b) = LoopbackChannel::pair(32);
        let (_close_tx_a, close_rx_a) = mpsc::channel(1);
        let (_close_tx_b, close_rx_b) = mpsc::channel(1);
        let (d0a, d1a) = dual_dispatch(a, close_rx_a);
        let (d0b, d1b) = dual_dispatch(b, close_rx_b);

        d0a.send(b"A1").await.unwrap();
        d0a.send(b"A2").await.unwrap();
        d1a.send(b"B1").await.unwrap();

        assert_eq!(d0b.recv().await.unwrap(), b"A1");
        assert_eq!(d0b.recv().await.unwrap(), b"A2");
        assert_eq!(d1b.recv().await.unwrap(), b"B1");
    }

    #[tokio::test]
    async fn test_dispatcher_duplex() {
        let (a, b) = LoopbackChannel::pair(32);
        let (_close_tx_a, close_rx_a) = mpsc::channel(1);
        let (_close_tx_b, close_rx_b) = mpsc::channel(1);
        let (d0a, d1a) = dual_dispatch(a, close_rx_a);
        let (d0b, d1b) = dual_dispatch(b, close_rx_b);

        d0a.send(b"A").await.unwrap();
        assert_eq!(d0b.recv().await.unwrap(), b"A");

        // Before the fix this hung: the demux task servicing `b` would
        // still be parked mid-recv holding the only handle to the
        // underlying channel, so this send (which needs that same
        // channel) could never go through.
        d1b.send(b"B").await.unwrap();
        assert_eq!(d1a.recv().await.unwrap(), b"B");
    }

    #[tokio::test]
    async fn test_unknown_tag_terminates_demux_and_is_not_delivered() {
        let (a, b) = LoopbackChannel::pair(32);
        let (_close_tx, close_rx) = mpsc::channel(1);
        let (d0, d1) = dual_dispatch(b, close_rx);

        a.send(&[0xff, 1, 2, 3]).await.unwrap();

        assert_eq!(d0.recv().await, None);
        assert_eq!(d1.recv().await, None);
    }

    #[tokio::test]
    async fn test_empty_frame_terminates_demux() {
        let (a, b) = LoopbackChannel::pair(32);
        let (_close_tx, close_rx) = mpsc::channel(1);
        let (d0, d1) = dual_dispatch(b, close_rx);

        a.send(&[]).await.unwrap();

        assert_eq!(d0.recv().await, None);
        assert_eq!(d1.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_request_terminates_demux() {
        let (_a, b) = LoopbackChannel::pair(32);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (d0, d1) = dual_dispatch(b, close_rx);

        close_tx.send(()).await.unwrap();

        assert_eq!(d0.recv().await, None);
        assert_eq!(d1.recv().await, None);
    }

    #[tokio::test]
    async fn test_underlying_channel_usable_directly_after_close() {
        let (a, b) = LoopbackChannel::pair(32);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (d0, d1) = dual_dispatch(b, close_rx);

        close_tx.send(()).await.unwrap();
        assert_eq!(d0.recv().await, None);
        assert_eq!(d1.recv().await, None);

        // The demux task has exited and handed the channel back; it is
        // free for non-dispatched traffic.
        let mut underlying = d0.reclaim_underlying().await.unwrap();
        a.send(b"raw").await.unwrap();
        assert_eq!(underlying.recv().await.unwrap(), b"raw");
    }

    #[tokio::test]
    async fn test_reclaim_before_termination_returns_none() {
        let (_a, b) = LoopbackChannel::pair(32);
        let (_close_tx, close_rx) = mpsc::channel(1);
        let (d0, _d1) = dual_dispatch(b, close_rx);

        assert!(d0.reclaim_underlying().await.is_none());
    }

    #[tokio::test]
    async fn test_double_close_is_a_no_op() {
        let (_a, b) = LoopbackChannel::pair(32);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (d0, _d1) = dual_dispatch(b, close_rx);

        close_tx.send(()).await.unwrap();
        assert_eq!(d0.recv().await, None);
        // A second close request has nowhere to go once the task has
        // already exited, but must not panic.
        drop(close_tx);
    }
}
