//! Client-side peer session
//!
//! Turns signaling pushes from the relay into a full mesh of direct media
//! links, one per remote participant:
//! - `PeerSession` owns the peer map and reacts to `ServerMessage`s
//! - `PeerConnector` / `PeerLink` separate the mesh logic from the WebRTC stack
//! - `LocalMedia` holds the local tracks shared by every link

pub mod config;
pub mod connector;
pub mod error;
pub mod media;
pub mod rtc;
pub mod session;

pub use config::PeerConfig;
pub use connector::{LinkEvent, LinkEventSender, LinkId, LinkState, PeerConnector, PeerLink};
pub use error::{PeerError, Result};
pub use media::{LocalMedia, MediaKind, MediaTrack};
pub use rtc::{WebRtcConnector, WebRtcLink};
pub use session::{PeerSession, SessionCommand, SessionEvent};
