//! Fixed ICE and data-channel configuration for the RTC connection manager.

use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;

/// Data channel label used for every peer connection.
pub const DATA_CHANNEL_LABEL: &str = "logs";

/// Builds the fixed STUN-only ICE configuration. No TURN relay is used.
pub fn ice_servers() -> Vec<RTCIceServer> {
    vec![
        RTCIceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            ..Default::default()
        },
        RTCIceServer {
            urls: vec!["stun:stun1.l.google.com:19302".to_string()],
            ..Default::default()
        },
    ]
}

pub fn rtc_configuration() -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(),
        ..Default::default()
    }
}
