//! The six application messages and their framed encoding (§4.5).
//!
//! Each `Message` is one application frame; `encode`/`decode` delegate the
//! byte layout to `postcard`, a compact binary codec built on `serde` — the
//! "known-tag, known-fields, callback-based variable-length decode" codec
//! the design doc asks for in place of the original protobuf schema
//! (`tweak-pickle/src/autogen/tweak.pb.h`). `Variant`'s `#[derive(Serialize,
//! Deserialize)]` (in `variant.rs`) gives every arm, including the ten
//! vector types, its own wire encoding for free.

use serde::{Deserialize, Serialize};

use crate::model::TweakId;
use crate::variant::Variant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    // Client -> server
    Subscribe { uri_patterns: String },
    AnnounceFeatures { features_json: String },

    // Server -> client
    AddItem {
        id: TweakId,
        uri: String,
        description: String,
        meta: String,
        default_value: Variant,
        current_value: Variant,
    },
    RemoveItem { id: TweakId },

    // Either direction
    ChangeItem { id: TweakId, value: Variant },
}

#[derive(Debug)]
pub struct DecodeError(pub postcard::Error);

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wire codec parse error: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

pub fn encode(message: &Message) -> Vec<u8> {
    postcard::to_allocvec(message).expect("Message encoding is infallible for owned values")
}

/// Decode a single application frame. Parse failures are the caller's to
/// log and drop per §7 ("Codec parse errors are logged and drop the
/// frame.") — this function itself just reports the error.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    postcard::from_bytes(bytes).map_err(DecodeError)
}

/// §4.5 feature negotiation: a small JSON object, currently just
/// `{"vectors": bool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    pub vectors: bool,
}

impl Features {
    /// What this crate supports: every variant type, including vectors.
    pub const fn supported() -> Features {
        Features { vectors: true }
    }

    /// The set assumed about a peer before any `AnnounceFeatures` has been
    /// received from it (§4.7.1 "reset the peer's feature set to the
    /// minimal set").
    pub const fn minimal() -> Features {
        Features { vectors: false }
    }

    pub fn to_json(self) -> String {
        serde_json::to_string(&self).expect("Features serialization is infallible")
    }

    /// Parse a remote's `features_json`. A malformed document degrades the
    /// remote to `minimal()` rather than erroring (§4.5 point 3).
    pub fn from_json(json: &str) -> Features {
        serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "malformed AnnounceFeatures json, degrading peer to minimal feature set");
            Features::minimal()
        })
    }

    /// Whether a value of this type may be sent to a peer advertising
    /// `self` as its feature set (§4.5 point 2: vector items and their
    /// updates are withheld from peers that don't support vectors).
    pub fn supports(self, value: &Variant) -> bool {
        !value.is_vector() || self.vectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_every_message_shape() {
        let messages = vec![
            Message::Subscribe { uri_patterns: "*".into() },
            Message::AnnounceFeatures { features_json: Features::supported().to_json() },
            Message::AddItem {
                id: 7,
                uri: "/a/b".into(),
                description: "desc".into(),
                meta: "".into(),
                default_value: Variant::F64(1.0),
                current_value: Variant::F64(2.5),
            },
            Message::ChangeItem { id: 7, value: Variant::VecU8(vec![1, 2, 3]) },
            Message::RemoveItem { id: 7 },
        ];
        for message in messages {
            let bytes = encode(&message);
            let decoded = decode(&bytes).unwrap();
            assert_eq!(format!("{decoded:?}"), format!("{message:?}"));
        }
    }

    #[test]
    fn decode_garbage_is_an_error() {
        assert!(decode(&[0xff, 0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn features_round_trip_json() {
        let f = Features { vectors: true };
        assert_eq!(Features::from_json(&f.to_json()), f);
    }

    #[test]
    fn malformed_features_json_degrades_to_minimal() {
        assert_eq!(Features::from_json("not json"), Features::minimal());
    }

    #[test]
    fn minimal_peer_rejects_vectors_accepts_scalars() {
        let minimal = Features::minimal();
        assert!(!minimal.supports(&Variant::VecU8(vec![1])));
        assert!(minimal.supports(&Variant::F64(1.0)));
    }
}
