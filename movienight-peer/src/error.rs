use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("WebRTC error: {0}")]
    WebRtc(String),

    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    #[error("Invalid ICE candidate: {0}")]
    InvalidIceCandidate(String),

    #[error("Malformed signaling payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The outbound signaling queue is gone
    #[error("Signaling channel closed")]
    SignalingClosed,
}

impl From<webrtc::Error> for PeerError {
    fn from(e: webrtc::Error) -> Self {
        Self::WebRtc(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
