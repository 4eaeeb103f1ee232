//! Peer session: rendezvous handshake, WebRTC negotiation, and the
//! ingress/egress/state queues an application actually talks to.
//!
//! One task pumps the signaling socket, one forwards local ICE candidates,
//! one observes connection-state transitions, and a pair drains the
//! egress queue / enqueues inbound data-channel messages once the channel
//! opens.

pub mod signaling;
pub mod transport;

use std::sync::Arc;

use async_trait::async_trait;
use rustrtc::{DataChannelEvent, PeerConnectionEvent, PeerConnectionState};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelError};
use crate::config::Settings;
use crate::ws::{self, WsMessage, WsReader, WsWriter};
use signaling::SignalingMessage;
use transport::{PeerTransport, TransportError};

/// Which side of the SDP exchange this session plays.
///
/// Assigned by the broker: the first client to present a given key is the
/// offerer, the second the answerer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the SDP offer first.
    Offerer,
    /// Responds with the SDP answer.
    Answerer,
}

/// Errors raised while establishing or running a [`PeerSession`].
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// Dialing the broker, or the rendezvous handshake, failed.
    #[error("rendezvous error: {0}")]
    Rendezvous(String),
    /// The peer transport could not be configured or negotiated.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// An established (or establishing) peer-to-peer session.
///
/// Implements [`Channel`]: `send` enqueues onto the egress queue, `recv`
/// dequeues from the ingress queue. Connection-state transitions are
/// available separately via [`PeerSession::recv_state`].
pub struct PeerSession {
    role: Role,
    egress_tx: mpsc::Sender<Vec<u8>>,
    ingress_rx: mpsc::Receiver<Vec<u8>>,
    state_rx: Mutex<mpsc::Receiver<PeerConnectionState>>,
    signaling_writer: Arc<Mutex<WsWriter>>,
    transport: Arc<PeerTransport>,
    closed: Mutex<bool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Establish a session: rendezvous handshake, transport setup, and
    /// role-specific kickoff. Returns once the offer/answer exchange has
    /// been kicked off — data-channel readiness is observed via
    /// [`PeerSession::recv_state`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Rendezvous`] if dialing the broker or the
    /// role handshake fails, or [`SessionError::Transport`] if the peer
    /// transport cannot be configured or negotiation fails.
    pub async fn connect(settings: Settings) -> Result<Self, SessionError> {
        let (role, writer, reader) = rendezvous_connect(&settings).await?;
        let signaling_writer = Arc::new(Mutex::new(writer));
        let transport = Arc::new(PeerTransport::new(&settings.stun, settings.turn.as_deref())?);

        let (state_tx, state_rx) = mpsc::channel(8);
        let (ingress_tx, ingress_rx) = mpsc::channel(settings.buffer_size.get());
        let (egress_tx, egress_rx) = mpsc::channel(settings.buffer_size.get());

        let tasks = Arc::new(Mutex::new(Vec::new()));
        tasks.lock().await.push(spawn_ice_forwarder(
            Arc::clone(&transport),
            Arc::clone(&signaling_writer),
        ));
        tasks
            .lock()
            .await
            .push(spawn_state_observer(Arc::clone(&transport), state_tx));
        tasks.lock().await.push(spawn_signaling_loop(
            reader,
            Arc::clone(&transport),
            Arc::clone(&signaling_writer),
        ));

        match role {
            Role::Offerer => {
                let sdp = transport.create_offer().await?;
                send_signaling(&signaling_writer, &SignalingMessage::Offer { sdp })
                    .await
                    .map_err(SessionError::Rendezvous)?;
                tasks
                    .lock()
                    .await
                    .extend(spawn_queue_plumbing(Arc::clone(&transport), egress_rx, ingress_tx));
            }
            Role::Answerer => {
                tasks.lock().await.push(spawn_answerer_kickoff(
                    Arc::clone(&transport),
                    egress_rx,
                    ingress_tx,
                    Arc::clone(&tasks),
                ));
            }
        }

        Ok(Self {
            role,
            egress_tx,
            ingress_rx,
            state_rx: Mutex::new(state_rx),
            signaling_writer,
            transport,
            closed: Mutex::new(false),
            tasks,
        })
    }

    /// Which role the broker assigned this session.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Receive the next connection-state transition.
    ///
    /// Returns `None` once the state observer task has ended (the
    /// transport closed).
    pub async fn recv_state(&self) -> Option<PeerConnectionState> {
        self.state_rx.lock().await.recv().await
    }

    /// Idempotently tear the session down.
    ///
    /// Order: mark closed, stop all pump tasks (which stops further
    /// ingress/egress queue activity), close the signaling socket, then
    /// drop the peer transport.
    pub async fn close(&self) {
        let mut guard = self.closed.lock().await;
        if *guard {
            return;
        }
        *guard = true;
        drop(guard);

        log::info!("peer session: closing");
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        let _ = self.signaling_writer.lock().await.close().await;
        // `self.transport`'s last reference drops with `self`, tearing
        // down the ICE/DTLS/SCTP transport.
    }
}

#[async_trait]
impl Channel for PeerSession {
    async fn send(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        self.egress_tx
            .send(bytes.to_vec())
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.ingress_rx.recv().await
    }
}

async fn rendezvous_connect(
    settings: &Settings,
) -> Result<(Role, WsWriter, WsReader), SessionError> {
    let (mut writer, mut reader) = ws::connect(&settings.signaling, &[])
        .await
        .map_err(|e| SessionError::Rendezvous(e.to_string()))?;

    writer
        .send_text(&settings.key)
        .await
        .map_err(|e| SessionError::Rendezvous(e.to_string()))?;

    let role = match reader.recv().await {
        Some(Ok(WsMessage::Text(t))) if t == "OFFER" => Role::Offerer,
        Some(Ok(WsMessage::Text(t))) if t == "ANSWER" => Role::Answerer,
        Some(Ok(WsMessage::Text(t))) => {
            return Err(SessionError::Rendezvous(format!("unexpected role token: {t}")))
        }
        Some(Err(e)) => return Err(SessionError::Rendezvous(e.to_string())),
        _ => return Err(SessionError::Rendezvous("rendezvous socket closed".to_string())),
    };

    match reader.recv().await {
        Some(Ok(WsMessage::Text(t))) if t == "Ready" => {}
        Some(Ok(WsMessage::Text(t))) => {
            return Err(SessionError::Rendezvous(format!("expected Ready, got: {t}")))
        }
        Some(Err(e)) => return Err(SessionError::Rendezvous(e.to_string())),
        _ => return Err(SessionError::Rendezvous("rendezvous socket closed".to_string())),
    }

    Ok((role, writer, reader))
}

async fn send_signaling(
    writer: &Arc<Mutex<WsWriter>>,
    msg: &SignalingMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    writer
        .lock()
        .await
        .send_text(&json)
        .await
        .map_err(|e| e.to_string())
}

fn spawn_ice_forwarder(
    transport: Arc<PeerTransport>,
    writer: Arc<Mutex<WsWriter>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut candidates = transport.subscribe_ice_candidates();
        loop {
            match candidates.recv().await {
                Ok(candidate) => {
                    let msg = SignalingMessage::Candidate {
                        ice: candidate.to_sdp_string(),
                    };
                    if send_signaling(&writer, &msg).await.is_err() {
                        log::warn!("ice forwarder: signaling write failed, stopping");
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::debug!("ice forwarder: lagged, dropped {n} candidates");
                }
            }
        }
    })
}

fn spawn_state_observer(
    transport: Arc<PeerTransport>,
    state_tx: mpsc::Sender<PeerConnectionState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut states = transport.subscribe_peer_state();
        loop {
            if states.changed().await.is_err() {
                break;
            }
            let state = states.borrow().clone();
            log::info!("peer session: state -> {state:?}");
            if state_tx.send(state).await.is_err() {
                break;
            }
        }
    })
}

fn spawn_signaling_loop(
    mut reader: WsReader,
    transport: Arc<PeerTransport>,
    writer: Arc<Mutex<WsWriter>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match reader.recv().await {
                Some(Ok(WsMessage::Text(text))) => {
                    match serde_json::from_str::<SignalingMessage>(&text) {
                        Ok(SignalingMessage::Offer { sdp }) => {
                            match transport.accept_offer(&sdp).await {
                                Ok(answer_sdp) => {
                                    let msg = SignalingMessage::Answer { sdp: answer_sdp };
                                    if send_signaling(&writer, &msg).await.is_err() {
                                        log::warn!("signaling loop: failed to send answer");
                                        break;
                                    }
                                }
                                Err(e) => log::warn!("signaling loop: bad offer: {e}"),
                            }
                        }
                        Ok(SignalingMessage::Answer { sdp }) => {
                            if let Err(e) = transport.accept_answer(&sdp).await {
                                log::warn!("signaling loop: bad answer: {e}");
                            }
                        }
                        Ok(SignalingMessage::Candidate { ice }) => {
                            if let Err(e) = transport.add_ice_candidate(&ice).await {
                                log::warn!("signaling loop: bad candidate: {e}");
                            }
                        }
                        Err(_) => {
                            log::debug!("signaling loop: ignoring unrecognized message");
                        }
                    }
                }
                Some(Ok(_)) => {
                    // Binary/ping/pong frames carry no signaling content.
                }
                Some(Err(e)) => {
                    log::info!("signaling loop: read error, terminating: {e}");
                    break;
                }
                None => {
                    log::info!("signaling loop: socket closed, terminating");
                    break;
                }
            }
        }
    })
}

/// Answerer path: wait for the remote-opened data channel, then start the
/// queue plumbing around it.
fn spawn_answerer_kickoff(
    transport: Arc<PeerTransport>,
    egress_rx: mpsc::Receiver<Vec<u8>>,
    ingress_tx: mpsc::Sender<Vec<u8>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match transport.next_event().await {
                Some(PeerConnectionEvent::DataChannel(dc)) => {
                    transport.set_data_channel(dc).await;
                    let pumps = spawn_queue_plumbing(Arc::clone(&transport), egress_rx, ingress_tx);
                    tasks.lock().await.extend(pumps);
                    return;
                }
                Some(PeerConnectionEvent::Track(_)) => {
                    log::debug!("peer session: ignoring media track event");
                }
                None => {
                    log::info!("peer session: transport closed before data channel arrived");
                    return;
                }
            }
        }
    })
}

/// Spawn the egress-drain and ingress-enqueue pumps once a data channel is
/// available.
fn spawn_queue_plumbing(
    transport: Arc<PeerTransport>,
    mut egress_rx: mpsc::Receiver<Vec<u8>>,
    ingress_tx: mpsc::Sender<Vec<u8>>,
) -> Vec<JoinHandle<()>> {
    let egress_transport = Arc::clone(&transport);
    let egress_task = tokio::spawn(async move {
        while let Some(bytes) = egress_rx.recv().await {
            if let Err(e) = egress_transport.send_data(&bytes).await {
                log::warn!("egress pump: send failed, stopping: {e}");
                break;
            }
        }
    });

    let ingress_task = tokio::spawn(async move {
        loop {
            match transport.next_data_channel_event().await {
                Some(DataChannelEvent::Message(bytes)) => {
                    if ingress_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
                Some(DataChannelEvent::Open) => {
                    log::info!("peer session: data channel open");
                }
                Some(DataChannelEvent::Close) | None => {
                    log::info!("peer session: data channel closed");
                    break;
                }
            }
        }
    });

    vec![egress_task, ingress_task]
}
