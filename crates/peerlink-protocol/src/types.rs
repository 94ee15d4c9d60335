//! Signaling message types for PeerLink's wire format.
//!
//! Every frame on the coordinator WebSocket is a JSON object with a
//! `type` discriminator. Messages are split by direction:
//! [`ClientMessage`] flows endpoint → coordinator, [`ServerMessage`]
//! flows coordinator → endpoint. Several types (`offer`, `message`,
//! `public-post`, ...) exist in both, with the addressing field flipped
//! from `to` to `from` by the coordinator.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A self-declared peer identity.
///
/// PeerLink does not authenticate ids: whatever string an endpoint sends
/// in `register` is its id. The derived `Ord` (byte-wise lexicographic
/// on the string) is the total order both endpoints use to decide who is
/// polite during glare, so it must never depend on locale or case folding.
///
/// `#[serde(transparent)]` makes `PeerId("a1")` serialize as `"a1"`.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a raw id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the empty id, which `register` rejects.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Default display name for peers that register without one, matching
    /// the `User_<first 8 chars>` convention of the existing clients.
    pub fn default_display_name(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("User_{prefix}")
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One entry of the `peer-list` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSummary {
    pub id: PeerId,
    #[serde(rename = "displayName")]
    pub display_name: String,
}

// ---------------------------------------------------------------------------
// Negotiation addressing
// ---------------------------------------------------------------------------

/// The three negotiation message families the coordinator forwards
/// without looking inside their payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationKind {
    Offer,
    Answer,
    IceCandidate,
}

impl fmt::Display for NegotiationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
            Self::IceCandidate => write!(f, "ice-candidate"),
        }
    }
}

/// Why a relayed message could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    /// The target has no live registration on the coordinator.
    Offline,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => write!(f, "offline"),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint → coordinator
// ---------------------------------------------------------------------------

/// Frames an endpoint sends to the coordinator.
///
/// `#[serde(tag = "type", rename_all = "kebab-case")]` produces
/// `{"type": "ice-candidate", "to": "b2", "payload": {...}}`.
/// Negotiation payloads accept the legacy `data` key as an alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claim (or reclaim) an identity on this connection.
    Register {
        id: PeerId,
        #[serde(
            rename = "displayName",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        display_name: Option<String>,
    },

    Offer {
        to: PeerId,
        #[serde(alias = "data")]
        payload: Value,
    },

    Answer {
        to: PeerId,
        #[serde(alias = "data")]
        payload: Value,
    },

    IceCandidate {
        to: PeerId,
        #[serde(alias = "data")]
        payload: Value,
    },

    /// Relay fallback for an application message.
    Message {
        to: PeerId,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Fan-out to every other registered peer.
    PublicPost {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Ask whether a peer is currently registered.
    GetPeerInfo { id: PeerId },
}

impl ClientMessage {
    /// Builds the outbound negotiation frame of the given kind.
    pub fn negotiation(kind: NegotiationKind, to: PeerId, payload: Value) -> Self {
        match kind {
            NegotiationKind::Offer => Self::Offer { to, payload },
            NegotiationKind::Answer => Self::Answer { to, payload },
            NegotiationKind::IceCandidate => Self::IceCandidate { to, payload },
        }
    }

    /// Returns the kebab-case `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Message { .. } => "message",
            Self::PublicPost { .. } => "public-post",
            Self::GetPeerInfo { .. } => "get-peer-info",
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator → endpoint
// ---------------------------------------------------------------------------

/// Frames the coordinator sends to endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Snapshot sent in reply to `register`, excluding the registrant.
    PeerList { peers: Vec<PeerSummary> },

    /// An id was registered for the first time (no live record existed).
    PeerJoined {
        id: PeerId,
        #[serde(rename = "displayName")]
        display_name: String,
    },

    /// An id's registration was removed.
    PeerLeft { id: PeerId },

    Offer {
        from: PeerId,
        #[serde(alias = "data")]
        payload: Value,
    },

    Answer {
        from: PeerId,
        #[serde(alias = "data")]
        payload: Value,
    },

    IceCandidate {
        from: PeerId,
        #[serde(alias = "data")]
        payload: Value,
    },

    /// A relayed application message.
    Message {
        from: PeerId,
        content: String,
        timestamp: u64,
    },

    /// A relay attempt could not be delivered.
    MessageFailed { to: PeerId, reason: FailureReason },

    PublicPost {
        from: PeerId,
        content: String,
        timestamp: u64,
    },

    /// Reply to `get-peer-info`.
    PeerInfo {
        id: PeerId,
        #[serde(
            rename = "displayName",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        display_name: Option<String>,
        online: bool,
    },

    /// Generic failure notice (unreachable negotiation target, protocol
    /// violation, unregistered sender).
    Error { message: String },
}

impl ServerMessage {
    /// Builds the inbound negotiation frame of the given kind.
    pub fn negotiation(kind: NegotiationKind, from: PeerId, payload: Value) -> Self {
        match kind {
            NegotiationKind::Offer => Self::Offer { from, payload },
            NegotiationKind::Answer => Self::Answer { from, payload },
            NegotiationKind::IceCandidate => Self::IceCandidate { from, payload },
        }
    }

    /// Returns the kebab-case `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerList { .. } => "peer-list",
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Message { .. } => "message",
            Self::MessageFailed { .. } => "message-failed",
            Self::PublicPost { .. } => "public-post",
            Self::PeerInfo { .. } => "peer-info",
            Self::Error { .. } => "error",
        }
    }
}

/// Milliseconds since the Unix epoch, used for message timestamps.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! The browser clients parse these frames by hand, so the JSON shape
    //! (tag names, camelCase fields, omitted optionals) is the contract.

    use serde_json::json;

    use super::*;

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&PeerId::from("a1")).unwrap();
        assert_eq!(json, "\"a1\"");
    }

    #[test]
    fn test_peer_id_order_is_lexicographic() {
        assert!(PeerId::from("a1") < PeerId::from("b2"));
        assert!(PeerId::from("B") < PeerId::from("a"));
        assert!(PeerId::from("abc") < PeerId::from("abcd"));
    }

    #[test]
    fn test_default_display_name_uses_first_eight_chars() {
        let id = PeerId::from("3f2a9c1e-77aa-4b0c");
        assert_eq!(id.default_display_name(), "User_3f2a9c1e");
        assert_eq!(PeerId::from("x").default_display_name(), "User_x");
    }

    #[test]
    fn test_register_json_format() {
        let msg = ClientMessage::Register {
            id: PeerId::from("a1"),
            display_name: Some("Alice".into()),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "register", "id": "a1", "displayName": "Alice"})
        );
    }

    #[test]
    fn test_register_without_display_name_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"register","id":"x"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Register {
                id: PeerId::from("x"),
                display_name: None,
            }
        );
    }

    #[test]
    fn test_ice_candidate_tag_is_kebab_case() {
        let msg = ClientMessage::IceCandidate {
            to: PeerId::from("b2"),
            payload: json!({"candidate": "c1"}),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["to"], "b2");
        assert_eq!(value["payload"]["candidate"], "c1");
    }

    #[test]
    fn test_negotiation_accepts_legacy_data_key() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"offer","to":"b2","data":{"type":"offer","sdp":"v=0"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Offer { to, payload } => {
                assert_eq!(to, PeerId::from("b2"));
                assert_eq!(payload["sdp"], "v=0");
            }
            other => panic!("expected Offer, got {other:?}"),
        }
    }

    #[test]
    fn test_negotiation_constructors_match_kind() {
        let c = ClientMessage::negotiation(
            NegotiationKind::Answer,
            PeerId::from("z"),
            json!(null),
        );
        assert_eq!(c.kind(), "answer");
        let s = ServerMessage::negotiation(
            NegotiationKind::IceCandidate,
            PeerId::from("z"),
            json!(null),
        );
        assert_eq!(s.kind(), "ice-candidate");
        assert_eq!(NegotiationKind::IceCandidate.to_string(), "ice-candidate");
    }

    #[test]
    fn test_client_message_without_timestamp_omits_field() {
        let msg = ClientMessage::Message {
            to: PeerId::from("z"),
            content: "hello".into(),
            timestamp: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "message", "to": "z", "content": "hello"}));
    }

    #[test]
    fn test_peer_list_json_format() {
        let msg = ServerMessage::PeerList {
            peers: vec![PeerSummary {
                id: PeerId::from("b2"),
                display_name: "Bob".into(),
            }],
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "peer-list", "peers": [{"id": "b2", "displayName": "Bob"}]})
        );
    }

    #[test]
    fn test_peer_joined_json_format() {
        let msg = ServerMessage::PeerJoined {
            id: PeerId::from("x"),
            display_name: "X".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "peer-joined", "id": "x", "displayName": "X"})
        );
    }

    #[test]
    fn test_message_failed_json_format() {
        let msg = ServerMessage::MessageFailed {
            to: PeerId::from("z"),
            reason: FailureReason::Offline,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "message-failed", "to": "z", "reason": "offline"})
        );
    }

    #[test]
    fn test_peer_info_json_format() {
        let msg = ServerMessage::PeerInfo {
            id: PeerId::from("z"),
            display_name: None,
            online: false,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "peer-info", "id": "z", "online": false}));
    }

    #[test]
    fn test_error_json_format() {
        let msg = ServerMessage::Error {
            message: "peer z is not reachable".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "error", "message": "peer z is not reachable"})
        );
    }

    #[test]
    fn test_public_post_parses_with_ignored_from() {
        // Older clients include `from`; the coordinator uses the
        // registered id instead, so the extra key must be tolerated.
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"public-post","from":"spoof","content":"hi","timestamp":5}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::PublicPost {
                content: "hi".into(),
                timestamp: Some(5),
            }
        );
    }
}
