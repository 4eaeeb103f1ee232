//! Peer-to-peer transport, backed by `rustrtc`.
//!
//! Thin wrapper around `rustrtc::PeerConnection` exposing only what
//! [`crate::peer::PeerSession`] needs: SDP offer/answer creation, ICE
//! candidate exchange, and a data channel.

use std::sync::Arc;

use rustrtc::{
    DataChannelEvent, IceCandidate, PeerConnection, PeerConnectionEvent, PeerConnectionState,
    RtcConfiguration, SdpType, SessionDescription,
};
use tokio::sync::{broadcast, watch, Mutex};

/// Errors raised while driving the peer transport.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// The remote or local SDP could not be parsed or applied.
    #[error("SDP negotiation failed: {0}")]
    Sdp(String),
    /// An ICE candidate could not be parsed or applied.
    #[error("ICE candidate rejected: {0}")]
    Candidate(String),
    /// No data channel is open yet.
    #[error("data channel not open")]
    NoDataChannel,
    /// The underlying transport rejected a send.
    #[error("data channel send failed: {0}")]
    Send(String),
}

/// Label used for the single data channel this crate opens per session.
pub const DATA_CHANNEL_LABEL: &str = "data";

/// Wraps one `rustrtc::PeerConnection` plus the data channel handle that
/// arrives once negotiation completes.
pub struct PeerTransport {
    pc: PeerConnection,
    data_channel: Mutex<Option<Arc<rustrtc::DataChannel>>>,
}

impl std::fmt::Debug for PeerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerTransport").finish_non_exhaustive()
    }
}

impl PeerTransport {
    /// Configure a new peer connection with the given STUN/TURN servers.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the underlying transport rejects the
    /// ICE server configuration.
    pub fn new(stun: &[String], turn: Option<&str>) -> Result<Self, TransportError> {
        let mut ice_servers = stun.to_vec();
        if let Some(turn) = turn {
            ice_servers.push(turn.to_string());
        }
        let pc = PeerConnection::new(RtcConfiguration {
            ice_servers,
            ..Default::default()
        })
        .map_err(|e| TransportError::Sdp(e.to_string()))?;
        Ok(Self {
            pc,
            data_channel: Mutex::new(None),
        })
    }

    /// Subscribe to locally gathered ICE candidates.
    pub fn subscribe_ice_candidates(&self) -> broadcast::Receiver<IceCandidate> {
        self.pc.subscribe_ice_candidates()
    }

    /// Subscribe to connection state transitions.
    pub fn subscribe_peer_state(&self) -> watch::Receiver<PeerConnectionState> {
        self.pc.subscribe_peer_state()
    }

    /// Offerer kickoff: open the data channel, create the offer, and set it
    /// as the local description. Returns the serialized offer SDP.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Sdp`] if offer creation or application
    /// fails.
    pub async fn create_offer(&self) -> Result<String, TransportError> {
        let dc = self
            .pc
            .create_data_channel(DATA_CHANNEL_LABEL)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        *self.data_channel.lock().await = Some(dc);

        let offer = self
            .pc
            .create_offer()
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        self.pc
            .set_local_description(offer.clone())
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        Ok(offer.to_sdp_string())
    }

    /// Answerer path: apply the remote offer and create the answer SDP.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Sdp`] if the offer cannot be parsed or
    /// applied, or answer creation fails.
    pub async fn accept_offer(&self, sdp: &str) -> Result<String, TransportError> {
        let offer = SessionDescription::parse(SdpType::Offer, sdp)
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;

        let answer = self
            .pc
            .create_answer()
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        self.pc
            .set_local_description(answer.clone())
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        Ok(answer.to_sdp_string())
    }

    /// Offerer path: apply the remote answer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Sdp`] if the answer cannot be parsed or
    /// applied.
    pub async fn accept_answer(&self, sdp: &str) -> Result<(), TransportError> {
        let answer = SessionDescription::parse(SdpType::Answer, sdp)
            .map_err(|e| TransportError::Sdp(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Sdp(e.to_string()))
    }

    /// Apply a remote ICE candidate.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Candidate`] if the candidate cannot be
    /// parsed or applied.
    pub async fn add_ice_candidate(&self, ice: &str) -> Result<(), TransportError> {
        let candidate =
            IceCandidate::from_sdp(ice).map_err(|e| TransportError::Candidate(e.to_string()))?;
        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    /// Wait for the next top-level peer connection event (answerer path:
    /// this is how the remote-opened data channel arrives).
    pub async fn next_event(&self) -> Option<PeerConnectionEvent> {
        self.pc.recv().await
    }

    /// Record the data channel handle delivered via [`Self::next_event`]
    /// (answerer path — the offerer already stashed it in
    /// [`Self::create_offer`]).
    pub async fn set_data_channel(&self, dc: Arc<rustrtc::DataChannel>) {
        *self.data_channel.lock().await = Some(dc);
    }

    /// Send bytes on the open data channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NoDataChannel`] if the channel has not
    /// opened yet, or [`TransportError::Send`] if the underlying send
    /// fails.
    pub async fn send_data(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let dc = self
            .data_channel
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NoDataChannel)?;
        self.pc
            .send_data(dc.id, bytes)
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    /// Wait for the next event on the data channel (message, open, close).
    ///
    /// Returns `None` if no data channel has been established yet or the
    /// channel has closed.
    ///
    /// Clones the channel handle out of the mutex before awaiting on it, so
    /// this never holds the lock across the wait — otherwise a quiet
    /// channel would let this sit on `recv` indefinitely and starve
    /// [`Self::send_data`] of the same lock.
    pub async fn next_data_channel_event(&self) -> Option<DataChannelEvent> {
        let dc = self.data_channel.lock().await.clone()?;
        dc.recv().await
    }
}
