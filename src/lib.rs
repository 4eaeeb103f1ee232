//! Rendezvous-brokered peer-to-peer byte channel.
//!
//! Two peers who share an out-of-band session key find each other through a
//! small [`broker`] server, negotiate a WebRTC data channel over the
//! broker's relay, and then exchange bytes directly. Two optional layers sit
//! on top of the raw channel: [`aead`] (per-frame authenticated encryption)
//! and [`channel::dispatcher`] (a one-byte-tag multiplexer presenting two
//! logical sub-channels on one physical one).
//!
//! # Architecture
//!
//! ```text
//! caller -> egress queue -> [dispatcher] -> [AEAD] -> PeerSession -> ICE/DTLS/SCTP -> peer
//!        <- ingress queue <- [dispatcher] <- [AEAD] <- PeerSession <- ICE/DTLS/SCTP <- peer
//! ```
//!
//! `broker` relays only the signaling handshake; once the data channel is
//! open, bytes travel peer-to-peer.

pub mod aead;
pub mod broker;
pub mod channel;
pub mod config;
pub mod peer;
pub mod ws;

pub use aead::{AeadChannel, AeadContext, AeadError};
pub use channel::dispatcher::{DispatchError, Dispatcher};
pub use channel::{Channel, ChannelError, LoopbackChannel};
pub use config::{ConfigError, Settings};
pub use peer::{PeerSession, Role, SessionError};
