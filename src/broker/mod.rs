//! Rendezvous broker.
//!
//! Pairs two anonymous websocket clients that present the same opaque
//! session key, holds the lonely first arrival for a bounded window, and
//! relays raw frames between the pair once both sides are present.
//!
//! The pool mutex guards only the lookup-then-mutate decision; the
//! offerer's socket is never stored in the map itself, so the broker never
//! blocks on I/O while holding it. Once an answerer claims a slot, the
//! offerer's (writer, reader) pair crosses over via a one-shot handoff
//! channel instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Hold window for a lonely offerer before the broker gives up on it.
pub const HOLD_TIMEOUT: Duration = Duration::from_secs(10);

/// Text the broker writes back on key collision.
pub const KO_SLOT_ALLOCATED: &str = "KO: slot already allocated";
/// Text the broker writes to a lonely offerer whose hold window elapsed.
pub const FATAL_TIMEOUT: &str = "Fatal: timeout";

type OffererHandoff = oneshot::Receiver<(WsWriter, WsReader)>;

/// One pending or active key slot.
struct ConnectionPair {
    /// Receives the offerer's socket once an answerer claims the slot.
    handoff_rx: Option<OffererHandoff>,
    /// Set once an answerer has claimed the slot, so a third arrival is
    /// rejected rather than overwriting it.
    answerer_present: bool,
    /// Lets the answerer cancel the offerer's hold timer.
    stop_tx: Option<oneshot::Sender<()>>,
}

/// Key → pair map, guarded by a single mutex.
///
/// The lookup-then-mutate sequence in [`BrokerPool::handle_connection`] is
/// a single critical section: the mutex is held across the decision and
/// mutation, then released before any blocking I/O.
pub struct BrokerPool {
    pairs: Mutex<HashMap<String, ConnectionPair>>,
    hold_timeout: Duration,
}

enum Decision {
    BecomeOfferer {
        stop_rx: oneshot::Receiver<()>,
        handoff_tx: oneshot::Sender<(WsWriter, WsReader)>,
    },
    BecomeAnswerer(OffererHandoff),
    Reject,
}

impl BrokerPool {
    /// Create an empty pool using [`HOLD_TIMEOUT`] as the hold window.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_hold_timeout(HOLD_TIMEOUT)
    }

    /// Create an empty pool with a caller-chosen hold window.
    #[must_use]
    pub fn with_hold_timeout(hold_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            pairs: Mutex::new(HashMap::new()),
            hold_timeout,
        })
    }

    /// Handle one accepted websocket connection end to end: read the
    /// session key, assign a role, and either hold, pair, or reject.
    pub async fn handle_connection(self: &Arc<Self>, stream: ws::WsStream) {
        let (mut writer, mut reader) = ws::split(stream);

        let key = match reader.recv().await {
            Some(Ok(WsMessage::Text(key))) => key,
            _ => {
                log::warn!("broker: connection dropped before sending a key");
                return;
            }
        };

        let decision = {
            let mut pairs = self.pairs.lock().await;
            match pairs.get_mut(&key) {
                None => {
                    let (stop_tx, stop_rx) = oneshot::channel();
                    let (handoff_tx, handoff_rx) = oneshot::channel();
                    pairs.insert(
                        key.clone(),
                        ConnectionPair {
                            handoff_rx: Some(handoff_rx),
                            answerer_present: false,
                            stop_tx: Some(stop_tx),
                        },
                    );
                    Decision::BecomeOfferer { stop_rx, handoff_tx }
                }
                Some(pair) if !pair.answerer_present => {
                    if let Some(stop_tx) = pair.stop_tx.take() {
                        let _ = stop_tx.send(());
                    }
                    pair.answerer_present = true;
                    let handoff_rx = pair
                        .handoff_rx
                        .take()
                        .expect("handoff receiver is stored before the slot is reachable");
                    Decision::BecomeAnswerer(handoff_rx)
                }
                Some(_) => Decision::Reject,
            }
        };

        match decision {
            Decision::Reject => {
                log::info!("broker: key {key:?} already allocated, rejecting");
                let _ = writer.send_text(KO_SLOT_ALLOCATED).await;
                let _ = writer.close().await;
            }
            Decision::BecomeOfferer { stop_rx, handoff_tx } => {
                self.hold_offerer(key, writer, reader, stop_rx, handoff_tx)
                    .await;
            }
            Decision::BecomeAnswerer(handoff_rx) => {
                let (mut offerer_writer, offerer_reader) = match handoff_rx.await {
                    Ok(pair) => pair,
                    Err(_) => {
                        log::warn!("broker: offerer vanished before handoff for key {key:?}");
                        self.pairs.lock().await.remove(&key);
                        return;
                    }
                };
                log::info!("broker: key {key:?} paired");
                if writer.send_text("ANSWER").await.is_err()
                    || offerer_writer.send_text("Ready").await.is_err()
                    || writer.send_text("Ready").await.is_err()
                {
                    self.pairs.lock().await.remove(&key);
                    return;
                }
                relay(offerer_writer, offerer_reader, writer, reader).await;
                self.pairs.lock().await.remove(&key);
                log::info!("broker: key {key:?} released");
            }
        }
    }

    /// Write `OFFER`, then wait for either a stop signal (an answerer
    /// claimed the slot — hand the socket off and return) or the hold
    /// timeout (write `Fatal: timeout`, close, and free the slot).
    async fn hold_offerer(
        self: &Arc<Self>,
        key: String,
        mut writer: WsWriter,
        reader: WsReader,
        stop_rx: oneshot::Receiver<()>,
        handoff_tx: oneshot::Sender<(WsWriter, WsReader)>,
    ) {
        if writer.send_text("OFFER").await.is_err() {
            self.pairs.lock().await.remove(&key);
            return;
        }

        tokio::select! {
            _ = stop_rx => {
                let _ = handoff_tx.send((writer, reader));
            }
            () = tokio::time::sleep(self.hold_timeout) => {
                self.pairs.lock().await.remove(&key);
                log::info!("broker: key {key:?} timed out waiting for an answerer");
                let _ = writer.send_text(FATAL_TIMEOUT).await;
                let _ = writer.close().await;
            }
        }
    }
}

/// Binary-transparent relay between the two paired sockets.
///
/// Each direction runs independently, but the two are raced rather than
/// joined: as soon as either one ends (read or write error, clean close),
/// the other is dropped and both sockets are explicitly closed. Joining
/// instead would leave the still-open side parked on a `recv` that will
/// never resolve once its peer has gone quiet.
async fn relay(
    mut offerer_writer: WsWriter,
    mut offerer_reader: WsReader,
    mut answerer_writer: WsWriter,
    mut answerer_reader: WsReader,
) {
    let offerer_to_answerer = async {
        loop {
            match offerer_reader.recv().await {
                Some(Ok(msg)) => {
                    if forward(&mut answerer_writer, msg).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    };
    let answerer_to_offerer = async {
        loop {
            match answerer_reader.recv().await {
                Some(Ok(msg)) => {
                    if forward(&mut offerer_writer, msg).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    };

    tokio::select! {
        () = offerer_to_answerer => {}
        () = answerer_to_offerer => {}
    }

    log::debug!("broker: relay ending, closing both sockets");
    let _ = offerer_writer.close().await;
    let _ = answerer_writer.close().await;
}

async fn forward(writer: &mut WsWriter, msg: WsMessage) -> Result<(), ()> {
    match msg {
        WsMessage::Text(text) => writer.send_text(&text).await.map_err(|_| ()),
        WsMessage::Binary(data) => writer.send_binary(&data).await.map_err(|_| ()),
        WsMessage::Ping(data) => writer.send_pong(data).await.map_err(|_| ()),
        WsMessage::Pong(_) => Ok(()),
        WsMessage::Close { .. } => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_timeout_is_ten_seconds() {
        assert_eq!(HOLD_TIMEOUT, Duration::from_secs(10));
    }

    #[test]
    fn test_ko_message_text() {
        assert_eq!(KO_SLOT_ALLOCATED, "KO: slot already allocated");
    }
}
