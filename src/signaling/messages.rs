//! Wire message catalog for the signaling WebSocket. JSON objects, `type`
//! discriminator, one line of text per frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Role;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WirePeerInfo {
    #[serde(rename = "peerId")]
    pub peer_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptionWire {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidateWire {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
}

/// A signaling frame. Outbound variants are constructed by the client;
/// inbound variants are decoded from server frames. `webrtc_offer`,
/// `webrtc_answer`, and `webrtc_ice_candidate` are bidirectional: the client
/// sets `target_peer_id` when sending and reads `from_peer_id` when
/// receiving.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    /// inbound
    AuthChallenge { nonce: String, timestamp: i64 },
    /// outbound
    Auth {
        role: Role,
        proof: String,
        #[serde(rename = "defaultFields", skip_serializing_if = "Option::is_none")]
        default_fields: Option<Value>,
    },
    /// inbound
    AuthSuccess {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    /// inbound
    Error { message: String },
    /// outbound
    PeerDiscovery {},
    /// inbound
    PeerList { peers: Vec<WirePeerInfo> },
    /// inbound
    PeerJoined {
        #[serde(rename = "peerId")]
        peer_id: String,
        role: Role,
    },
    /// inbound
    PeerDisconnected {
        #[serde(rename = "peerId")]
        peer_id: String,
    },
    /// bidirectional
    WebrtcOffer {
        #[serde(rename = "targetPeerId", skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<String>,
        #[serde(rename = "fromPeerId", skip_serializing_if = "Option::is_none")]
        from_peer_id: Option<String>,
        offer: SessionDescriptionWire,
    },
    /// bidirectional
    WebrtcAnswer {
        #[serde(rename = "targetPeerId", skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<String>,
        #[serde(rename = "fromPeerId", skip_serializing_if = "Option::is_none")]
        from_peer_id: Option<String>,
        answer: SessionDescriptionWire,
    },
    /// bidirectional
    WebrtcIceCandidate {
        #[serde(rename = "targetPeerId", skip_serializing_if = "Option::is_none")]
        target_peer_id: Option<String>,
        #[serde(rename = "fromPeerId", skip_serializing_if = "Option::is_none")]
        from_peer_id: Option<String>,
        candidate: IceCandidateWire,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_challenge_round_trips() {
        let json = r#"{"type":"auth_challenge","nonce":"abc","timestamp":1700000000}"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(
            msg,
            SignalingMessage::AuthChallenge { ref nonce, timestamp }
                if nonce == "abc" && timestamp == 1700000000
        ));
    }

    #[test]
    fn ice_candidate_uses_camel_case_wire_fields() {
        let msg = SignalingMessage::WebrtcIceCandidate {
            target_peer_id: Some("p2".into()),
            from_peer_id: None,
            candidate: IceCandidateWire {
                candidate: "candidate:1 1 UDP".into(),
                sdp_mline_index: Some(0),
                sdp_mid: Some("0".into()),
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"targetPeerId\":\"p2\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
        assert!(json.contains("\"sdpMid\":\"0\""));
        assert!(!json.contains("fromPeerId"));
    }

    #[test]
    fn auth_outbound_encodes_role_and_proof() {
        let msg = SignalingMessage::Auth {
            role: Role::Appender,
            proof: "deadbeef".into(),
            default_fields: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"auth\""));
        assert!(json.contains("\"role\":\"appender\""));
        assert!(json.contains("\"proof\":\"deadbeef\""));
    }
}
