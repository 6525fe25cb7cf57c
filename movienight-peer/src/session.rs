//! Mesh manager for one local participant
//!
//! Every change to the peer map happens inside a single `&mut self` call
//! driven by one event loop, so link creation on `user-connected` and
//! teardown on `user-disconnected` for the same participant can never
//! interleave.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use movienight_proto::{
    ClientMessage, IceCandidate, ParticipantId, RoomId, RoomView, ServerMessage, SessionDescription,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connector::{LinkEvent, LinkEventSender, LinkId, LinkState, PeerConnector, PeerLink};
use crate::media::{LocalMedia, MediaKind};
use crate::{PeerConfig, PeerError, Result};

/// What the application sees
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PeerJoined(ParticipantId),
    PeerLeft(ParticipantId),
    PeerStateChanged {
        participant: ParticipantId,
        state: LinkState,
    },
    RemoteTrack {
        participant: ParticipantId,
        kind: MediaKind,
        track_id: String,
    },
    RoomUpdated {
        room_id: RoomId,
        participants: Vec<ParticipantId>,
    },
    RoomStartingSoon {
        room_id: RoomId,
        message: String,
        start_time: DateTime<Utc>,
    },
    /// Cue to enter the watch screen, whichever state the room went live in
    RoomStarted {
        room: Box<RoomView>,
        message: String,
    },
    RoomFinished {
        room_id: RoomId,
        message: String,
    },
    Chat {
        sender: ParticipantId,
        message: String,
        sent_at: DateTime<Utc>,
    },
}

/// Requests from the application while the loop is running
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    JoinRoom(RoomId),
    /// The signaling transport came back; announce the room again
    Reconnected,
}

enum Next {
    Server(Option<ServerMessage>),
    Command(SessionCommand),
    Link(LinkEvent),
}

/// Current link to one remote participant
struct Peer {
    id: LinkId,
    link: Arc<dyn PeerLink>,
}

pub struct PeerSession {
    local: ParticipantId,
    connector: Arc<dyn PeerConnector>,
    media: Arc<LocalMedia>,
    peers: HashMap<ParticipantId, Peer>,
    next_link: u64,
    /// Last room announced on the signaling channel
    room: Option<RoomId>,
    outbound: mpsc::Sender<ClientMessage>,
    events: mpsc::Sender<SessionEvent>,
    link_tx: LinkEventSender,
    link_rx: mpsc::Receiver<LinkEvent>,
}

impl PeerSession {
    pub fn new(
        local: ParticipantId,
        connector: Arc<dyn PeerConnector>,
        media: Arc<LocalMedia>,
        config: &PeerConfig,
        outbound: mpsc::Sender<ClientMessage>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let (link_tx, link_rx) = mpsc::channel(config.event_buffer.max(1));
        Self {
            local,
            connector,
            media,
            peers: HashMap::new(),
            next_link: 0,
            room: None,
            outbound,
            events,
            link_tx,
            link_rx,
        }
    }

    #[must_use]
    pub const fn local(&self) -> &ParticipantId {
        &self.local
    }

    #[must_use]
    pub const fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    #[must_use]
    pub fn has_peer(&self, participant: &ParticipantId) -> bool {
        self.peers.contains_key(participant)
    }

    #[must_use]
    pub fn peer_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn set_audio_enabled(&self, enabled: bool) {
        self.media.audio().set_enabled(enabled);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.media.video().set_enabled(enabled);
    }

    /// Announce the room subscription. A repeat for the current room is
    /// skipped; switching rooms tears down every link first.
    pub async fn join_room(&mut self, room_id: RoomId) -> Result<bool> {
        if self.room.as_ref() == Some(&room_id) {
            debug!(room_id = %room_id, "Already announced in room, skipping");
            return Ok(false);
        }

        if self.room.is_some() {
            self.close_all().await;
        }

        self.announce(room_id.clone()).await?;
        self.room = Some(room_id);
        Ok(true)
    }

    /// Re-announce after the signaling transport was re-established.
    /// The relay keeps no memory of subscriptions across connections.
    pub async fn reconnected(&mut self) -> Result<bool> {
        let Some(room_id) = self.room.clone() else {
            return Ok(false);
        };
        info!(room_id = %room_id, "Signaling reconnected, re-announcing room");
        self.announce(room_id).await?;
        Ok(true)
    }

    /// Apply one pushed message
    pub async fn handle(&mut self, msg: ServerMessage) -> Result<()> {
        let event = msg.event_type();
        match msg {
            ServerMessage::UserConnected { participant_id } => {
                self.on_user_connected(participant_id).await
            }
            ServerMessage::UserDisconnected { participant_id } => {
                self.on_user_disconnected(&participant_id).await;
                Ok(())
            }
            ServerMessage::Offer { target, sdp, sender } if target == self.local => {
                self.on_offer(sender, sdp).await
            }
            ServerMessage::Answer { target, sdp, sender } if target == self.local => {
                self.on_answer(&sender, sdp).await
            }
            ServerMessage::IceCandidate {
                target,
                candidate,
                sender,
            } if target == self.local => self.on_remote_candidate(&sender, candidate).await,
            ServerMessage::Offer { .. } | ServerMessage::Answer { .. } | ServerMessage::IceCandidate { .. } => {
                debug!(event, "Signal addressed to another participant, ignored");
                Ok(())
            }
            ServerMessage::ChatMessage {
                sender,
                message,
                sent_at,
                ..
            } => {
                self.emit(SessionEvent::Chat {
                    sender,
                    message,
                    sent_at,
                })
                .await;
                Ok(())
            }
            ServerMessage::RoomUpdated {
                room_id,
                participants,
            } => {
                self.emit(SessionEvent::RoomUpdated {
                    room_id,
                    participants,
                })
                .await;
                Ok(())
            }
            ServerMessage::RoomStartingSoon {
                room_id,
                message,
                start_time,
            } => {
                self.emit(SessionEvent::RoomStartingSoon {
                    room_id,
                    message,
                    start_time,
                })
                .await;
                Ok(())
            }
            ServerMessage::RoomStarted { message, room, .. } => {
                self.emit(SessionEvent::RoomStarted { room, message }).await;
                Ok(())
            }
            ServerMessage::RoomFinished { room_id, message } => {
                self.emit(SessionEvent::RoomFinished { room_id, message }).await;
                Ok(())
            }
        }
    }

    /// Apply one event raised by a link. Events from a link that has since
    /// been closed or replaced are dropped.
    pub async fn handle_link_event(&mut self, event: LinkEvent) -> Result<()> {
        let current = self
            .peers
            .get(event.remote())
            .is_some_and(|peer| peer.id == event.link());
        if !current {
            debug!(
                remote = %event.remote(),
                link = %event.link(),
                "Event from a link that is gone, dropped"
            );
            return Ok(());
        }

        match event {
            LinkEvent::LocalCandidate {
                remote, candidate, ..
            } => {
                let candidate = serde_json::to_value(candidate)?;
                self.send(ClientMessage::IceCandidate {
                    target: remote,
                    candidate,
                })
                .await
            }
            LinkEvent::StateChanged { remote, state, .. } => {
                self.emit(SessionEvent::PeerStateChanged {
                    participant: remote,
                    state,
                })
                .await;
                Ok(())
            }
            LinkEvent::RemoteTrack {
                remote,
                kind,
                track_id,
                ..
            } => {
                self.emit(SessionEvent::RemoteTrack {
                    participant: remote,
                    kind,
                    track_id,
                })
                .await;
                Ok(())
            }
        }
    }

    /// Drive the session until `inbound` closes, then close every link.
    ///
    /// A failure on one message is logged and the loop carries on; losing
    /// the outbound signaling queue ends it.
    pub async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<ServerMessage>,
        mut commands: mpsc::Receiver<SessionCommand>,
    ) {
        loop {
            let next = tokio::select! {
                msg = inbound.recv() => Next::Server(msg),
                Some(cmd) = commands.recv() => Next::Command(cmd),
                Some(event) = self.link_rx.recv() => Next::Link(event),
            };

            let result = match next {
                Next::Server(None) => break,
                Next::Server(Some(msg)) => {
                    let event = msg.event_type();
                    self.handle(msg).await.map_err(|e| (event, e))
                }
                Next::Command(SessionCommand::JoinRoom(room_id)) => {
                    self.join_room(room_id).await.map(drop).map_err(|e| ("join-room", e))
                }
                Next::Command(SessionCommand::Reconnected) => {
                    self.reconnected().await.map(drop).map_err(|e| ("reconnected", e))
                }
                Next::Link(event) => self.handle_link_event(event).await.map_err(|e| ("link", e)),
            };

            match result {
                Ok(()) => {}
                Err((_, PeerError::SignalingClosed)) => {
                    warn!("Signaling channel closed, stopping peer session");
                    break;
                }
                Err((event, e)) => warn!(event, error = %e, "Failed to handle peer session event"),
            }
        }

        self.close_all().await;
    }

    /// Tear down every link
    pub async fn close_all(&mut self) {
        for (remote, peer) in self.peers.drain() {
            if let Err(e) = peer.link.close().await {
                debug!(remote = %remote, error = %e, "Error closing peer link");
            }
        }
    }

    async fn on_user_connected(&mut self, remote: ParticipantId) -> Result<()> {
        if remote == self.local {
            return Ok(());
        }
        if self.peers.contains_key(&remote) {
            debug!(remote = %remote, "Peer already linked, duplicate announcement ignored");
            return Ok(());
        }

        let (id, link) = self.open_link(&remote).await?;
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                let _ = link.close().await;
                return Err(e);
            }
        };

        self.peers.insert(remote.clone(), Peer { id, link });
        info!(remote = %remote, "Offering to new peer");

        self.send(ClientMessage::Offer {
            target: remote.clone(),
            sdp: serde_json::to_value(offer)?,
        })
        .await?;
        self.emit(SessionEvent::PeerJoined(remote)).await;
        Ok(())
    }

    async fn on_offer(&mut self, remote: ParticipantId, sdp: Value) -> Result<()> {
        let offer: SessionDescription = serde_json::from_value(sdp)?;

        let replaced = match self.peers.remove(&remote) {
            Some(old) => {
                debug!(remote = %remote, link = %old.id, "Renegotiation from peer, replacing link");
                let _ = old.link.close().await;
                true
            }
            None => false,
        };

        let (id, link) = self.open_link(&remote).await?;
        let answer = match link.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                let _ = link.close().await;
                if replaced {
                    self.emit(SessionEvent::PeerLeft(remote)).await;
                }
                return Err(e);
            }
        };

        self.peers.insert(remote.clone(), Peer { id, link });

        self.send(ClientMessage::Answer {
            target: remote.clone(),
            sdp: serde_json::to_value(answer)?,
        })
        .await?;
        if !replaced {
            self.emit(SessionEvent::PeerJoined(remote)).await;
        }
        Ok(())
    }

    async fn on_answer(&self, remote: &ParticipantId, sdp: Value) -> Result<()> {
        let Some(peer) = self.peers.get(remote) else {
            debug!(remote = %remote, "Answer from unknown peer, dropped");
            return Ok(());
        };
        let answer: SessionDescription = serde_json::from_value(sdp)?;
        peer.link.accept_answer(answer).await
    }

    async fn on_remote_candidate(&self, remote: &ParticipantId, candidate: Value) -> Result<()> {
        let Some(peer) = self.peers.get(remote) else {
            debug!(remote = %remote, "Candidate from unknown peer, dropped");
            return Ok(());
        };
        let candidate: IceCandidate = serde_json::from_value(candidate)?;
        peer.link.add_ice_candidate(candidate).await
    }

    async fn on_user_disconnected(&mut self, remote: &ParticipantId) {
        let Some(peer) = self.peers.remove(remote) else {
            return;
        };
        if let Err(e) = peer.link.close().await {
            debug!(remote = %remote, error = %e, "Error closing peer link");
        }
        info!(remote = %remote, "Peer left, link closed");
        self.emit(SessionEvent::PeerLeft(remote.clone())).await;
    }

    async fn open_link(&mut self, remote: &ParticipantId) -> Result<(LinkId, Arc<dyn PeerLink>)> {
        let id = LinkId(self.next_link);
        self.next_link += 1;
        let link = self
            .connector
            .connect(id, remote, &self.media, self.link_tx.clone())
            .await?;
        Ok((id, link))
    }

    async fn announce(&self, room_id: RoomId) -> Result<()> {
        self.send(ClientMessage::JoinRoom {
            room_id,
            participant_id: Some(self.local.clone()),
        })
        .await
    }

    async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.outbound
            .send(msg)
            .await
            .map_err(|_| PeerError::SignalingClosed)
    }

    /// Events are advisory; a departed listener does not stop the session.
    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Log(Mutex<Vec<String>>);

    impl Log {
        fn push(&self, entry: String) {
            self.0.lock().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    struct FakeLink {
        remote: ParticipantId,
        id: LinkId,
        log: Arc<Log>,
        events: LinkEventSender,
    }

    #[async_trait]
    impl PeerLink for FakeLink {
        async fn create_offer(&self) -> Result<SessionDescription> {
            self.log.push(format!("offer:{}#{}", self.remote, self.id.0));
            Ok(SessionDescription::offer(format!("offer-{}", self.id.0)))
        }

        async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
            self.log.push(format!("accept-offer:{}#{}:{}", self.remote, self.id.0, offer.sdp));
            Ok(SessionDescription::answer(format!("answer-{}", self.id.0)))
        }

        async fn accept_answer(&self, answer: SessionDescription) -> Result<()> {
            self.log.push(format!("accept-answer:{}#{}:{}", self.remote, self.id.0, answer.sdp));
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
            self.log.push(format!("ice:{}#{}:{}", self.remote, self.id.0, candidate.candidate));
            Ok(())
        }

        /// Like a real peer connection, closing reports a final state change
        async fn close(&self) -> Result<()> {
            self.log.push(format!("close:{}#{}", self.remote, self.id.0));
            let _ = self.events.try_send(LinkEvent::StateChanged {
                link: self.id,
                remote: self.remote.clone(),
                state: LinkState::Closed,
            });
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        log: Arc<Log>,
        events: Mutex<Option<LinkEventSender>>,
    }

    #[async_trait]
    impl PeerConnector for FakeConnector {
        async fn connect(
            &self,
            link: LinkId,
            remote: &ParticipantId,
            _media: &LocalMedia,
            events: LinkEventSender,
        ) -> Result<Arc<dyn PeerLink>> {
            self.log.push(format!("connect:{remote}#{}", link.0));
            *self.events.lock() = Some(events.clone());
            Ok(Arc::new(FakeLink {
                remote: remote.clone(),
                id: link,
                log: Arc::clone(&self.log),
                events,
            }))
        }
    }

    struct Harness {
        session: PeerSession,
        connector: Arc<FakeConnector>,
        media: Arc<LocalMedia>,
        outbound: mpsc::Receiver<ClientMessage>,
        events: mpsc::Receiver<SessionEvent>,
    }

    fn harness(local: &str) -> Harness {
        let connector = Arc::new(FakeConnector::default());
        let media = Arc::new(LocalMedia::new(local));
        let (out_tx, outbound) = mpsc::channel(64);
        let (ev_tx, events) = mpsc::channel(64);
        let session = PeerSession::new(
            ParticipantId::from(local),
            Arc::clone(&connector) as Arc<dyn PeerConnector>,
            Arc::clone(&media),
            &PeerConfig::default(),
            out_tx,
            ev_tx,
        );
        Harness {
            session,
            connector,
            media,
            outbound,
            events,
        }
    }

    fn pid(id: &str) -> ParticipantId {
        ParticipantId::from(id)
    }

    fn drain<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn connected(who: &str) -> ServerMessage {
        ServerMessage::UserConnected {
            participant_id: pid(who),
        }
    }

    #[tokio::test]
    async fn test_user_connected_creates_one_link_and_offers() {
        let mut h = harness("alice");

        h.session.handle(connected("bob")).await.unwrap();
        h.session.handle(connected("bob")).await.unwrap();

        assert_eq!(h.session.peer_ids(), vec![pid("bob")]);
        assert_eq!(h.connector.log.count("connect:"), 1);

        match drain(&mut h.outbound).as_slice() {
            [ClientMessage::Offer { target, sdp }] => {
                assert_eq!(target, &pid("bob"));
                let desc: SessionDescription = serde_json::from_value(sdp.clone()).unwrap();
                assert_eq!(desc, SessionDescription::offer("offer-0"));
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        assert_eq!(drain(&mut h.events), vec![SessionEvent::PeerJoined(pid("bob"))]);
    }

    #[tokio::test]
    async fn test_own_announcement_is_ignored() {
        let mut h = harness("alice");
        h.session.handle(connected("alice")).await.unwrap();

        assert_eq!(h.session.peer_count(), 0);
        assert!(drain(&mut h.outbound).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_offer_is_answered() {
        let mut h = harness("bob");
        let offer = ServerMessage::Offer {
            target: pid("bob"),
            sdp: json!({"type": "offer", "sdp": "v=0-from-alice"}),
            sender: pid("alice"),
        };

        h.session.handle(offer).await.unwrap();

        assert!(h.session.has_peer(&pid("alice")));
        assert_eq!(
            h.connector.log.entries(),
            vec!["connect:alice#0", "accept-offer:alice#0:v=0-from-alice"]
        );
        match drain(&mut h.outbound).as_slice() {
            [ClientMessage::Answer { target, sdp }] => {
                assert_eq!(target, &pid("alice"));
                assert_eq!(sdp["type"], "answer");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_offer_replaces_existing_link() {
        let mut h = harness("bob");
        for round in 0..2 {
            let offer = ServerMessage::Offer {
                target: pid("bob"),
                sdp: json!({"type": "offer", "sdp": format!("round-{round}")}),
                sender: pid("alice"),
            };
            h.session.handle(offer).await.unwrap();
        }

        assert_eq!(h.session.peer_count(), 1);
        let log = h.connector.log.entries();
        let closed = log.iter().position(|e| e == "close:alice#0").unwrap();
        let reopened = log.iter().position(|e| e == "connect:alice#1").unwrap();
        assert!(closed < reopened);
        assert_eq!(drain(&mut h.events), vec![SessionEvent::PeerJoined(pid("alice"))]);
    }

    /// Feed every queued link event back into the session
    async fn pump_link_events(h: &mut Harness) {
        while let Ok(event) = h.session.link_rx.try_recv() {
            h.session.handle_link_event(event).await.unwrap();
        }
    }

    fn candidate(link: u64, text: &str) -> LinkEvent {
        LinkEvent::LocalCandidate {
            link: LinkId(link),
            remote: pid("alice"),
            candidate: IceCandidate {
                candidate: text.to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
                username_fragment: None,
            },
        }
    }

    #[tokio::test]
    async fn test_replaced_link_does_not_report_for_its_successor() {
        let mut h = harness("bob");
        for round in 0..2 {
            let offer = ServerMessage::Offer {
                target: pid("bob"),
                sdp: json!({"type": "offer", "sdp": format!("round-{round}")}),
                sender: pid("alice"),
            };
            h.session.handle(offer).await.unwrap();
        }

        // link 0 reported Closed when it was replaced
        pump_link_events(&mut h).await;
        assert_eq!(drain(&mut h.events), vec![SessionEvent::PeerJoined(pid("alice"))]);

        h.session
            .handle_link_event(LinkEvent::StateChanged {
                link: LinkId(1),
                remote: pid("alice"),
                state: LinkState::Connected,
            })
            .await
            .unwrap();
        assert_eq!(
            drain(&mut h.events),
            vec![SessionEvent::PeerStateChanged {
                participant: pid("alice"),
                state: LinkState::Connected,
            }]
        );
    }

    #[tokio::test]
    async fn test_late_candidate_from_replaced_link_is_not_sent() {
        let mut h = harness("bob");
        for round in 0..2 {
            let offer = ServerMessage::Offer {
                target: pid("bob"),
                sdp: json!({"type": "offer", "sdp": format!("round-{round}")}),
                sender: pid("alice"),
            };
            h.session.handle(offer).await.unwrap();
        }
        drain(&mut h.outbound);

        h.session.handle_link_event(candidate(0, "candidate:old")).await.unwrap();
        assert!(drain(&mut h.outbound).is_empty());

        h.session.handle_link_event(candidate(1, "candidate:new")).await.unwrap();
        match drain(&mut h.outbound).as_slice() {
            [ClientMessage::IceCandidate { target, candidate }] => {
                assert_eq!(target, &pid("alice"));
                assert_eq!(candidate["candidate"], "candidate:new");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_quick_rejoin_ignores_the_departed_link() {
        let mut h = harness("alice");
        h.session.handle(connected("bob")).await.unwrap();
        h.session
            .handle(ServerMessage::UserDisconnected {
                participant_id: pid("bob"),
            })
            .await
            .unwrap();
        h.session.handle(connected("bob")).await.unwrap();

        pump_link_events(&mut h).await;

        assert!(h.session.has_peer(&pid("bob")));
        assert_eq!(
            drain(&mut h.events),
            vec![
                SessionEvent::PeerJoined(pid("bob")),
                SessionEvent::PeerLeft(pid("bob")),
                SessionEvent::PeerJoined(pid("bob")),
            ]
        );
    }

    #[tokio::test]
    async fn test_answer_and_candidates_reach_the_matching_link() {
        let mut h = harness("alice");
        h.session.handle(connected("bob")).await.unwrap();

        h.session
            .handle(ServerMessage::Answer {
                target: pid("alice"),
                sdp: json!({"type": "answer", "sdp": "bob-answer"}),
                sender: pid("bob"),
            })
            .await
            .unwrap();
        h.session
            .handle(ServerMessage::IceCandidate {
                target: pid("alice"),
                candidate: json!({"candidate": "candidate:1", "sdpMid": "0", "sdpMLineIndex": 0}),
                sender: pid("bob"),
            })
            .await
            .unwrap();
        // nobody linked to carol
        h.session
            .handle(ServerMessage::Answer {
                target: pid("alice"),
                sdp: json!({"type": "answer", "sdp": "stray"}),
                sender: pid("carol"),
            })
            .await
            .unwrap();

        let log = h.connector.log.entries();
        assert!(log.contains(&"accept-answer:bob#0:bob-answer".to_string()));
        assert!(log.contains(&"ice:bob#0:candidate:1".to_string()));
        assert!(!log.iter().any(|e| e.contains("stray")));
    }

    #[tokio::test]
    async fn test_signal_for_someone_else_is_ignored() {
        let mut h = harness("alice");
        h.session
            .handle(ServerMessage::Offer {
                target: pid("carol"),
                sdp: json!({"type": "offer", "sdp": "v=0"}),
                sender: pid("bob"),
            })
            .await
            .unwrap();

        assert_eq!(h.session.peer_count(), 0);
        assert!(h.connector.log.entries().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_offer_creates_nothing() {
        let mut h = harness("bob");
        let err = h
            .session
            .handle(ServerMessage::Offer {
                target: pid("bob"),
                sdp: json!("not an sdp object"),
                sender: pid("alice"),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, PeerError::Payload(_)));
        assert_eq!(h.session.peer_count(), 0);
    }

    #[tokio::test]
    async fn test_user_disconnected_tears_down_link() {
        let mut h = harness("alice");
        h.session.handle(connected("bob")).await.unwrap();
        drain(&mut h.events);

        h.session
            .handle(ServerMessage::UserDisconnected {
                participant_id: pid("bob"),
            })
            .await
            .unwrap();

        assert_eq!(h.session.peer_count(), 0);
        assert_eq!(h.connector.log.count("close:bob"), 1);
        assert_eq!(drain(&mut h.events), vec![SessionEvent::PeerLeft(pid("bob"))]);

        // reconnecting peer gets a fresh link
        h.session.handle(connected("bob")).await.unwrap();
        assert_eq!(h.connector.log.count("connect:bob"), 2);
    }

    #[tokio::test]
    async fn test_join_room_is_announced_once_and_after_reconnect() {
        let mut h = harness("alice");
        let room = RoomId::from("r1");

        assert!(!h.session.reconnected().await.unwrap());
        assert!(h.session.join_room(room.clone()).await.unwrap());
        assert!(!h.session.join_room(room.clone()).await.unwrap());
        assert!(h.session.reconnected().await.unwrap());

        let announced = drain(&mut h.outbound);
        assert_eq!(
            announced,
            vec![
                ClientMessage::JoinRoom {
                    room_id: room.clone(),
                    participant_id: Some(pid("alice")),
                };
                2
            ]
        );
    }

    #[tokio::test]
    async fn test_switching_rooms_closes_links() {
        let mut h = harness("alice");
        h.session.join_room(RoomId::from("r1")).await.unwrap();
        h.session.handle(connected("bob")).await.unwrap();

        h.session.join_room(RoomId::from("r2")).await.unwrap();

        assert_eq!(h.session.peer_count(), 0);
        assert_eq!(h.connector.log.count("close:bob"), 1);
        assert_eq!(h.session.room(), Some(&RoomId::from("r2")));
    }

    #[tokio::test]
    async fn test_lifecycle_pushes_become_events() {
        let mut h = harness("alice");
        let start_time = Utc::now();

        h.session
            .handle(ServerMessage::RoomStartingSoon {
                room_id: RoomId::from("r1"),
                message: "Starts in 5 minutes".to_string(),
                start_time,
            })
            .await
            .unwrap();
        h.session
            .handle(ServerMessage::RoomFinished {
                room_id: RoomId::from("r1"),
                message: "Thanks for watching".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(
            drain(&mut h.events),
            vec![
                SessionEvent::RoomStartingSoon {
                    room_id: RoomId::from("r1"),
                    message: "Starts in 5 minutes".to_string(),
                    start_time,
                },
                SessionEvent::RoomFinished {
                    room_id: RoomId::from("r1"),
                    message: "Thanks for watching".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_mute_flips_shared_track_flags() {
        let h = harness("alice");
        h.session.set_audio_enabled(false);
        h.session.set_video_enabled(false);
        assert!(!h.media.audio().is_enabled());
        assert!(!h.media.video().is_enabled());

        h.session.set_video_enabled(true);
        assert!(h.media.video().is_enabled());
    }

    #[tokio::test]
    async fn test_run_forwards_local_candidates_and_closes_on_exit() {
        let mut h = harness("alice");
        let (in_tx, in_rx) = mpsc::channel(8);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let mut session = h.session;
        let task = tokio::spawn(async move {
            session.run(in_rx, cmd_rx).await;
            session
        });

        cmd_tx.send(SessionCommand::JoinRoom(RoomId::from("r1"))).await.unwrap();
        let first = h.outbound.recv().await.unwrap();
        assert_eq!(first.message_type(), "join-room");

        in_tx.send(connected("bob")).await.unwrap();
        let second = h.outbound.recv().await.unwrap();
        assert_eq!(second.message_type(), "offer");

        let link_events = h.connector.events.lock().clone().unwrap();
        link_events
            .send(LinkEvent::LocalCandidate {
                link: LinkId(0),
                remote: pid("bob"),
                candidate: IceCandidate {
                    candidate: "candidate:local".to_string(),
                    sdp_mid: Some("0".to_string()),
                    sdp_m_line_index: Some(0),
                    username_fragment: None,
                },
            })
            .await
            .unwrap();

        match h.outbound.recv().await.unwrap() {
            ClientMessage::IceCandidate { target, candidate } => {
                assert_eq!(target, pid("bob"));
                assert_eq!(candidate["candidate"], "candidate:local");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }

        drop(in_tx);
        let session = task.await.unwrap();
        assert_eq!(session.peer_count(), 0);
        assert_eq!(h.connector.log.count("close:bob"), 1);
    }
}
