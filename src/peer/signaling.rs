//! Signaling JSON messages exchanged over the relayed rendezvous link.
//!
//! Wire shapes: `{"type":"offer","sdp":"..."}`, `{"type":"answer","sdp":"..."}`,
//! `{"type":"candidate","ice":"..."}`. Unknown `type` values deserialize
//! into nothing recognized by [`SignalingMessage`] and are ignored by the
//! signaling loop.

use serde::{Deserialize, Serialize};

/// A message exchanged over the relayed signaling link.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// An SDP offer.
    Offer {
        /// Serialized session description.
        sdp: String,
    },
    /// An SDP answer.
    Answer {
        /// Serialized session description.
        sdp: String,
    },
    /// An ICE candidate.
    Candidate {
        /// Candidate string.
        ice: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_serializes_to_spec_shape() {
        let msg = SignalingMessage::Offer {
            sdp: "v=0...".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0...");
    }

    #[test]
    fn test_candidate_round_trips() {
        let msg = SignalingMessage::Candidate {
            ice: "candidate:1 1 UDP ...".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: SignalingMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            SignalingMessage::Candidate { ice } => assert_eq!(ice, "candidate:1 1 UDP ..."),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_fails_to_deserialize_into_signaling_message() {
        let raw = r#"{"type":"bogus","whatever":1}"#;
        assert!(serde_json::from_str::<SignalingMessage>(raw).is_err());
    }

    #[test]
    fn test_answer_parses_from_spec_shape() {
        let raw = r#"{"type":"answer","sdp":"v=0..."}"#;
        let parsed: SignalingMessage = serde_json::from_str(raw).unwrap();
        match parsed {
            SignalingMessage::Answer { sdp } => assert_eq!(sdp, "v=0..."),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
