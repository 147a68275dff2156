use thiserror::Error;

/// Malformed connection string. Fatal to `connect`.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid protocol")]
    InvalidProtocol,
    #[error("missing or invalid role (expected 'appender' or 'reader')")]
    InvalidRole,
    #[error("missing key")]
    MissingKey,
    #[error("missing host")]
    MissingHost,
    #[error("malformed connection string: {0}")]
    Malformed(#[from] url::ParseError),
}

/// Signaling socket and handshake failures.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to decode signaling message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server rejected connection: {0}")]
    Rejected(String),
    #[error("signaling channel closed before handshake completed")]
    ChannelClosed,
    #[error("invalid hex key: {0}")]
    InvalidKey(#[from] hex::FromHexError),
}

/// Per-connection RTC failures. Never propagated to the caller; only logged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("webrtc error: {0}")]
    Rtc(#[from] webrtc::Error),
    #[error("failed to apply session description: {0}")]
    Sdp(String),
    #[error("data channel send failed: {0}")]
    Send(String),
}

/// A registered handler panicked or returned an error. Caught and logged; other handlers unaffected.
#[derive(Debug, Error)]
#[error("observer handler failed: {0}")]
pub struct ObserverError(pub String);
