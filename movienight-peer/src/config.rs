use serde::Deserialize;

/// Peer connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// STUN/TURN URLs handed to every new link
    pub ice_servers: Vec<String>,
    /// Capacity of the link event queue feeding the session loop
    pub event_buffer: usize,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            event_buffer: 256,
        }
    }
}
