pub mod client;
pub mod messages;

pub use client::{signaling_url, SignalingClient, MAX_RECONNECT_ATTEMPTS};
pub use messages::{IceCandidateWire, SessionDescriptionWire, SignalingMessage, WirePeerInfo};
