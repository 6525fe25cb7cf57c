//! Seam between the mesh logic and the WebRTC stack

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use movienight_proto::{IceCandidate, ParticipantId, SessionDescription};
use tokio::sync::mpsc;

use crate::{media::LocalMedia, MediaKind, Result};

/// Connection state of one link, as reported by the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One link instance. A replacement link to the same participant gets a
/// new id, so events still in flight from the old one can be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Something a link noticed on its own, delivered to the session loop
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Trickle ICE: a local candidate to send to `remote`
    LocalCandidate {
        link: LinkId,
        remote: ParticipantId,
        candidate: IceCandidate,
    },
    StateChanged {
        link: LinkId,
        remote: ParticipantId,
        state: LinkState,
    },
    RemoteTrack {
        link: LinkId,
        remote: ParticipantId,
        kind: MediaKind,
        track_id: String,
    },
}

impl LinkEvent {
    /// Link that raised the event
    #[must_use]
    pub const fn link(&self) -> LinkId {
        match self {
            Self::LocalCandidate { link, .. }
            | Self::StateChanged { link, .. }
            | Self::RemoteTrack { link, .. } => *link,
        }
    }

    #[must_use]
    pub const fn remote(&self) -> &ParticipantId {
        match self {
            Self::LocalCandidate { remote, .. }
            | Self::StateChanged { remote, .. }
            | Self::RemoteTrack { remote, .. } => remote,
        }
    }
}

pub type LinkEventSender = mpsc::Sender<LinkEvent>;

/// Creates links to remote participants with the local media attached
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Every event the new link raises must carry `link`
    async fn connect(
        &self,
        link: LinkId,
        remote: &ParticipantId,
        media: &LocalMedia,
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>>;
}

/// One direct media link to one remote participant
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Create an offer and install it as the local description
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Apply a remote offer and return the local answer
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()>;

    /// Apply a remote candidate. Candidates that arrive before the remote
    /// description are held until it is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}
