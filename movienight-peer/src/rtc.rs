//! `webrtc`-crate implementation of the connector seam

use std::sync::Arc;

use async_trait::async_trait;
use movienight_proto::{IceCandidate, ParticipantId, SdpType, SessionDescription};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::connector::{LinkEvent, LinkEventSender, LinkId, LinkState, PeerConnector, PeerLink};
use crate::media::{LocalMedia, MediaKind};
use crate::{PeerConfig, PeerError, Result};

impl From<RTCPeerConnectionState> for LinkState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::New,
        }
    }
}

/// Builds `RTCPeerConnection`s with default codecs and interceptors
pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    pub fn new(config: &PeerConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        Ok(Self { api, ice_servers })
    }

    /// Open a link to `remote` with every local track attached
    pub async fn open(
        &self,
        link: LinkId,
        remote: &ParticipantId,
        media: &LocalMedia,
        events: LinkEventSender,
    ) -> Result<WebRtcLink> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(RTCConfiguration {
                    ice_servers: self.ice_servers.clone(),
                    ..Default::default()
                })
                .await?,
        );

        for track in media.tracks() {
            let sender = pc
                .add_track(track.track() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            // RTCP has to be read for the interceptors to run
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        install_callbacks(&pc, link, remote, events);

        debug!(remote = %remote, link = %link, "Peer connection created");

        Ok(WebRtcLink {
            id: link,
            remote: remote.clone(),
            pc,
            pending: Mutex::new(Vec::new()),
        })
    }
}

fn install_callbacks(
    pc: &RTCPeerConnection,
    link: LinkId,
    remote: &ParticipantId,
    events: LinkEventSender,
) {
    let tx = events.clone();
    let peer = remote.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let peer = peer.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx
                        .send(LinkEvent::LocalCandidate {
                            link,
                            remote: peer,
                            candidate: IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_m_line_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            },
                        })
                        .await;
                }
                Err(e) => warn!(remote = %peer, error = %e, "Failed to serialize local candidate"),
            }
        })
    }));

    let tx = events.clone();
    let peer = remote.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        let peer = peer.clone();
        info!(remote = %peer, link = %link, state = %state, "Peer connection state changed");
        Box::pin(async move {
            let _ = tx
                .send(LinkEvent::StateChanged {
                    link,
                    remote: peer,
                    state: state.into(),
                })
                .await;
        })
    }));

    let peer = remote.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let tx = events.clone();
            let peer = peer.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    RTPCodecType::Video => MediaKind::Video,
                    _ => return,
                };
                let _ = tx
                    .send(LinkEvent::RemoteTrack {
                        link,
                        remote: peer,
                        kind,
                        track_id: track.id().to_string(),
                    })
                    .await;
            })
        },
    ));
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(
        &self,
        link: LinkId,
        remote: &ParticipantId,
        media: &LocalMedia,
        events: LinkEventSender,
    ) -> Result<Arc<dyn PeerLink>> {
        Ok(Arc::new(self.open(link, remote, media, events).await?))
    }
}

/// One `RTCPeerConnection` to one remote participant
pub struct WebRtcLink {
    id: LinkId,
    remote: ParticipantId,
    pc: Arc<RTCPeerConnection>,
    /// Remote candidates received before the remote description
    pending: Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcLink {
    #[must_use]
    pub const fn id(&self) -> LinkId {
        self.id
    }

    #[must_use]
    pub const fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    #[must_use]
    pub fn pending_candidates(&self) -> usize {
        self.pending.lock().len()
    }

    async fn set_remote(&self, desc: SessionDescription, expected: SdpType) -> Result<()> {
        if desc.sdp_type != expected {
            return Err(PeerError::InvalidSdp(format!(
                "expected {}, got {}",
                expected.as_str(),
                desc.sdp_type.as_str()
            )));
        }

        let rtc = match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
            SdpType::Rollback => {
                return Err(PeerError::InvalidSdp("rollback is not supported".to_string()))
            }
        }
        .map_err(|e| PeerError::InvalidSdp(e.to_string()))?;

        self.pc
            .set_remote_description(rtc)
            .await
            .map_err(|e| PeerError::InvalidSdp(e.to_string()))?;

        self.flush_pending().await;
        Ok(())
    }

    async fn flush_pending(&self) {
        let queued = std::mem::take(&mut *self.pending.lock());
        for init in queued {
            if let Err(e) = self.pc.add_ice_candidate(init).await {
                warn!(remote = %self.remote, error = %e, "Queued ICE candidate rejected");
            }
        }
    }
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        self.set_remote(offer, SdpType::Offer).await?;

        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
        self.set_remote(answer, SdpType::Answer).await
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };

        if self.pc.remote_description().await.is_none() {
            self.pending.lock().push(init);
            return Ok(());
        }

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| PeerError::InvalidIceCandidate(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connector() -> WebRtcConnector {
        WebRtcConnector::new(&PeerConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        })
        .unwrap()
    }

    fn host_candidate() -> IceCandidate {
        IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 192.168.1.2 50000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn test_candidates_before_remote_description_are_queued() {
        let (tx, _rx) = mpsc::channel(16);
        let media = LocalMedia::new("alice");
        let link = connector()
            .open(LinkId(0), &ParticipantId::from("bob"), &media, tx)
            .await
            .unwrap();

        link.add_ice_candidate(host_candidate()).await.unwrap();
        link.add_ice_candidate(host_candidate()).await.unwrap();
        assert_eq!(link.pending_candidates(), 2);

        link.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_offer_answer_between_two_links() {
        let connector = connector();
        let (tx, _rx) = mpsc::channel(64);
        let alice_media = LocalMedia::new("alice");
        let bob_media = LocalMedia::new("bob");

        let alice_to_bob = connector
            .open(LinkId(0), &ParticipantId::from("bob"), &alice_media, tx.clone())
            .await
            .unwrap();
        let bob_to_alice = connector
            .open(LinkId(1), &ParticipantId::from("alice"), &bob_media, tx)
            .await
            .unwrap();

        // a candidate racing ahead of the offer
        bob_to_alice.add_ice_candidate(host_candidate()).await.unwrap();
        assert_eq!(bob_to_alice.pending_candidates(), 1);

        let offer = alice_to_bob.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));

        let answer = bob_to_alice.accept_offer(offer).await.unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
        assert_eq!(bob_to_alice.pending_candidates(), 0);

        alice_to_bob.accept_answer(answer).await.unwrap();

        alice_to_bob.close().await.unwrap();
        bob_to_alice.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_answer_in_place_of_offer_is_rejected() {
        let (tx, _rx) = mpsc::channel(16);
        let media = LocalMedia::new("alice");
        let link = connector()
            .open(LinkId(0), &ParticipantId::from("bob"), &media, tx)
            .await
            .unwrap();

        let err = link
            .accept_offer(SessionDescription::answer("v=0\r\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::InvalidSdp(_)));

        link.close().await.unwrap();
    }
}
