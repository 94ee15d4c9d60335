//! Payloads carried inside `offer`, `answer` and `ice-candidate` frames.
//!
//! The coordinator treats these as opaque `serde_json::Value`s. Endpoints
//! convert them with [`SessionDescription::to_payload`] /
//! [`SessionDescription::from_payload`] and the equivalent candidate
//! helpers. Field names match what browsers produce from
//! `RTCSessionDescription.toJSON()` and `RTCIceCandidate.toJSON()`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Which side of the exchange a description came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A session description as exchanged during negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Converts to the opaque payload value forwarded by the coordinator.
    pub fn to_payload(&self) -> Result<Value, ProtocolError> {
        serde_json::to_value(self).map_err(ProtocolError::Encode)
    }

    /// Parses a forwarded payload.
    ///
    /// # Errors
    /// `ProtocolError::Decode` if the value is not a description.
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(payload).map_err(ProtocolError::Decode)
    }
}

/// A connectivity candidate.
///
/// Optional fields are omitted from the JSON when absent, which is what
/// browsers send for end-of-candidates markers and mDNS candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// A candidate with only the candidate line set.
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn to_payload(&self) -> Result<Value, ProtocolError> {
        serde_json::to_value(self).map_err(ProtocolError::Encode)
    }

    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(payload).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_session_description_json_format() {
        let value = SessionDescription::offer("v=0").to_payload().unwrap();
        assert_eq!(value, json!({"type": "offer", "sdp": "v=0"}));
    }

    #[test]
    fn test_session_description_from_browser_payload() {
        let desc = SessionDescription::from_payload(
            json!({"type": "answer", "sdp": "v=0\r\n"}),
        )
        .unwrap();
        assert_eq!(desc.kind, SdpKind::Answer);
        assert_eq!(desc.sdp, "v=0\r\n");
    }

    #[test]
    fn test_session_description_rejects_unknown_kind() {
        let err = SessionDescription::from_payload(json!({"type": "pranswer", "sdp": ""}))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_candidate_omits_absent_fields() {
        let value = IceCandidate::new("candidate:1").to_payload().unwrap();
        assert_eq!(value, json!({"candidate": "candidate:1"}));
    }

    #[test]
    fn test_candidate_parses_browser_shape() {
        let candidate = IceCandidate::from_payload(json!({
            "candidate": "candidate:842163049 1 udp 1677729535 1.2.3.4 5 typ srflx",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": "abcd"
        }))
        .unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));
    }
}
