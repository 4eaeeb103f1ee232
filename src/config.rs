//! Client settings.
//!
//! `Settings` carries everything a [`crate::peer::PeerSession`] needs to
//! start: the rendezvous URL, ICE server lists, the shared session key, and
//! queue capacity. Validation happens once, at construction, and fails
//! synchronously — nothing is spawned on a bad config.

use std::num::NonZeroUsize;

/// Errors raised while constructing [`Settings`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `buffer_size` was zero.
    #[error("buffer_size must be at least 1")]
    ZeroBufferSize,
    /// `signaling` was empty.
    #[error("signaling URL must not be empty")]
    EmptySignalingUrl,
    /// `key` was empty.
    #[error("session key must not be empty")]
    EmptyKey,
}

/// Settings for a [`crate::peer::PeerSession`].
///
/// Built via [`Settings::new`], which validates every field synchronously.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base websocket URL of the rendezvous broker (e.g. `ws://host:port`).
    pub signaling: String,
    /// STUN server URLs.
    pub stun: Vec<String>,
    /// Optional TURN server URL.
    pub turn: Option<String>,
    /// Shared session key both peers present to the broker.
    pub key: String,
    /// Capacity of the ingress and egress queues.
    pub buffer_size: NonZeroUsize,
}

impl Settings {
    /// Construct settings, validating every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `signaling` or `key` is empty, or
    /// `buffer_size` is zero.
    pub fn new(
        signaling: impl Into<String>,
        stun: Vec<String>,
        turn: Option<String>,
        key: impl Into<String>,
        buffer_size: usize,
    ) -> Result<Self, ConfigError> {
        let signaling = signaling.into();
        let key = key.into();

        if signaling.is_empty() {
            return Err(ConfigError::EmptySignalingUrl);
        }
        if key.is_empty() {
            return Err(ConfigError::EmptyKey);
        }
        let buffer_size =
            NonZeroUsize::new(buffer_size).ok_or(ConfigError::ZeroBufferSize)?;

        Ok(Self {
            signaling,
            stun,
            turn,
            key,
            buffer_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_valid_settings() {
        let settings = Settings::new(
            "ws://localhost:9090",
            vec!["stun:stun.l.google.com:19302".to_string()],
            None,
            "ab",
            32,
        )
        .unwrap();
        assert_eq!(settings.signaling, "ws://localhost:9090");
        assert_eq!(settings.buffer_size.get(), 32);
    }

    #[test]
    fn test_new_rejects_zero_buffer_size() {
        let err = Settings::new("ws://localhost:9090", vec![], None, "ab", 0).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBufferSize);
    }

    #[test]
    fn test_new_rejects_empty_signaling_url() {
        let err = Settings::new("", vec![], None, "ab", 32).unwrap_err();
        assert_eq!(err, ConfigError::EmptySignalingUrl);
    }

    #[test]
    fn test_new_rejects_empty_key() {
        let err = Settings::new("ws://localhost:9090", vec![], None, "", 32).unwrap_err();
        assert_eq!(err, ConfigError::EmptyKey);
    }
}
