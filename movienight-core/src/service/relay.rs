//! Signaling Relay
//!
//! Routes signaling payloads between live connections that share a room and
//! fans lifecycle events out to every connection subscribed to a room. The
//! relay never looks inside SDP or ICE payloads.
//!
//! Lock discipline: a `connections` entry may be held while touching `rooms`,
//! never the other way round. Sends happen after every map guard has been
//! released, and connections that fail a send are evicted afterwards.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::{
    config::SignalingConfig,
    models::{ConnectionId, ParticipantId, RoomId},
    Error, Result,
};
use movienight_proto::{ServerMessage, SignalKind};

/// Outbound queue of one connection
pub type MessageSender = mpsc::Sender<ServerMessage>;

/// Why a connection left the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client closed the transport
    Closed,
    /// Transport errored or a send found it already gone
    TransportDropped,
    /// No inbound traffic within the idle timeout
    IdleTimeout,
    /// Outbound queue filled up
    SlowConsumer,
}

impl DisconnectReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::TransportDropped => "transport_dropped",
            Self::IdleTimeout => "idle_timeout",
            Self::SlowConsumer => "slow_consumer",
        }
    }
}

/// Peer-originated payload to forward
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer { target: ParticipantId, sdp: Value },
    Answer { target: ParticipantId, sdp: Value },
    IceCandidate { target: ParticipantId, candidate: Value },
    Chat { message: String },
}

impl Signal {
    #[must_use]
    pub const fn kind(&self) -> SignalKind {
        match self {
            Self::Offer { .. } => SignalKind::Offer,
            Self::Answer { .. } => SignalKind::Answer,
            Self::IceCandidate { .. } => SignalKind::IceCandidate,
            Self::Chat { .. } => SignalKind::ChatMessage,
        }
    }

    /// Recipient participant; `None` for room-wide payloads
    #[must_use]
    pub const fn target(&self) -> Option<&ParticipantId> {
        match self {
            Self::Offer { target, .. }
            | Self::Answer { target, .. }
            | Self::IceCandidate { target, .. } => Some(target),
            Self::Chat { .. } => None,
        }
    }

    fn into_message(self, room_id: RoomId, sender: ParticipantId) -> ServerMessage {
        match self {
            Self::Offer { target, sdp } => ServerMessage::Offer { target, sdp, sender },
            Self::Answer { target, sdp } => ServerMessage::Answer { target, sdp, sender },
            Self::IceCandidate { target, candidate } => ServerMessage::IceCandidate {
                target,
                candidate,
                sender,
            },
            Self::Chat { message } => ServerMessage::ChatMessage {
                room_id,
                sender,
                message,
                sent_at: Utc::now(),
            },
        }
    }
}

#[derive(Debug)]
struct Connection {
    participant_id: ParticipantId,
    room_id: Option<RoomId>,
    sender: MessageSender,
}

#[derive(Debug, Clone)]
struct Member {
    participant_id: ParticipantId,
    sender: MessageSender,
}

type Recipient = (ConnectionId, MessageSender);

/// Room membership after one connection left it
#[derive(Debug, Default)]
struct Departure {
    remaining: Vec<Recipient>,
    /// The participant still has another connection in the room
    still_present: bool,
}

/// Process-wide relay, constructed once at startup and shared by the
/// signaling endpoint, the lifecycle manager and the scheduler.
pub struct SignalingRelay {
    config: SignalingConfig,
    /// connection -> identity, current room and outbound queue
    connections: DashMap<ConnectionId, Connection>,
    /// room -> live subscribed connections
    rooms: DashMap<RoomId, HashMap<ConnectionId, Member>>,
}

impl SignalingRelay {
    #[must_use]
    pub fn new(config: SignalingConfig) -> Self {
        Self {
            config,
            connections: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Register a new live connection. It receives nothing until it subscribes
    /// to a room; the returned receiver feeds the transport's writer.
    pub fn register(&self, participant_id: ParticipantId) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(self.config.send_buffer.max(1));
        let connection_id = ConnectionId::new();

        self.connections.insert(
            connection_id.clone(),
            Connection {
                participant_id: participant_id.clone(),
                room_id: None,
                sender: tx,
            },
        );

        debug!(
            connection_id = %connection_id,
            participant_id = %participant_id,
            "Signaling connection registered"
        );

        (connection_id, rx)
    }

    /// Bind `connection_id` to `room_id`, replacing any prior subscription.
    ///
    /// Other members of the new room receive `user-connected`; members of a
    /// previous room receive `user-disconnected`. Subscribing again to the
    /// same room re-emits the announcement. Returns how many members were
    /// told about the join.
    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        room_id: RoomId,
        participant_id: ParticipantId,
    ) -> Result<usize> {
        let mut left: Option<(ParticipantId, Vec<Recipient>)> = None;
        let others: Vec<Recipient>;

        {
            let mut conn = self
                .connections
                .get_mut(connection_id)
                .ok_or_else(|| Error::NotFound(format!("connection {connection_id} not registered")))?;

            let previous_participant = conn.participant_id.clone();
            let previous_room = conn.room_id.replace(room_id.clone());
            conn.participant_id = participant_id.clone();

            if let Some(old_room) = previous_room.filter(|old| old != &room_id) {
                let departure = self.remove_member(&old_room, connection_id, &previous_participant);
                if !departure.still_present {
                    left = Some((previous_participant, departure.remaining));
                }
            }

            let mut members = self.rooms.entry(room_id.clone()).or_default();
            members.insert(
                connection_id.clone(),
                Member {
                    participant_id: participant_id.clone(),
                    sender: conn.sender.clone(),
                },
            );
            others = members
                .iter()
                .filter(|(id, _)| *id != connection_id)
                .map(|(id, member)| (id.clone(), member.sender.clone()))
                .collect();
        }

        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            participant_id = %participant_id,
            "Connection subscribed to room"
        );

        let mut failed = Vec::new();
        if let Some((previous, remaining)) = left {
            let msg = ServerMessage::UserDisconnected {
                participant_id: previous,
            };
            self.deliver(&remaining, &msg, &mut failed);
        }
        let msg = ServerMessage::UserConnected { participant_id };
        let notified = self.deliver(&others, &msg, &mut failed);
        self.evict(failed);

        Ok(notified)
    }

    /// Drop the connection's room subscription, if any, and tell the
    /// remaining members. Safe to call on an unsubscribed or unknown
    /// connection.
    pub fn unsubscribe(&self, connection_id: &ConnectionId) -> usize {
        let detached = self.connections.get_mut(connection_id).and_then(|mut conn| {
            let room_id = conn.room_id.take()?;
            let departure = self.remove_member(&room_id, connection_id, &conn.participant_id);
            Some((room_id, conn.participant_id.clone(), departure))
        });

        let Some((room_id, participant_id, departure)) = detached else {
            return 0;
        };

        info!(
            connection_id = %connection_id,
            room_id = %room_id,
            participant_id = %participant_id,
            "Connection unsubscribed from room"
        );

        if departure.still_present {
            return 0;
        }

        let mut failed = Vec::new();
        let msg = ServerMessage::UserDisconnected { participant_id };
        let notified = self.deliver(&departure.remaining, &msg, &mut failed);
        self.evict(failed);
        notified
    }

    /// Unsubscribe every connection `participant_id` holds in `room_id`.
    /// The connections stay registered and may subscribe elsewhere. Returns
    /// how many connections were detached.
    pub fn unsubscribe_participant(&self, room_id: &RoomId, participant_id: &ParticipantId) -> usize {
        let held: Vec<ConnectionId> = self
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, member)| &member.participant_id == participant_id)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default();

        for connection_id in &held {
            self.unsubscribe(connection_id);
        }
        held.len()
    }

    /// Remove a connection entirely. Its outbound queue closes once drained.
    pub fn disconnect(&self, connection_id: &ConnectionId, reason: DisconnectReason) {
        self.evict(vec![(connection_id.clone(), reason)]);
    }

    /// Forward a peer payload from `from` within its current room.
    ///
    /// Targeted payloads reach every connection of the target participant in
    /// the same room; chat reaches the whole room, sender included. Nothing is
    /// queued for absent targets and nothing is reported back. Returns the
    /// number of deliveries.
    pub fn relay(&self, from: &ConnectionId, signal: Signal) -> usize {
        let Some((room_id, sender)) = self
            .connections
            .get(from)
            .and_then(|conn| Some((conn.room_id.clone()?, conn.participant_id.clone())))
        else {
            debug!(
                connection_id = %from,
                kind = signal.kind().as_str(),
                "Dropping signal from unsubscribed connection"
            );
            return 0;
        };

        let recipients: Vec<Recipient> = self
            .rooms
            .get(&room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|(_, member)| {
                        signal
                            .target()
                            .is_none_or(|target| &member.participant_id == target)
                    })
                    .map(|(id, member)| (id.clone(), member.sender.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if recipients.is_empty() {
            debug!(
                room_id = %room_id,
                sender = %sender,
                kind = signal.kind().as_str(),
                "Signal target not connected, dropped"
            );
            return 0;
        }

        let msg = signal.into_message(room_id, sender);
        let mut failed = Vec::new();
        let delivered = self.deliver(&recipients, &msg, &mut failed);
        self.evict(failed);
        delivered
    }

    /// Deliver `message` to every connection subscribed to `room_id`.
    ///
    /// Never waits on a receiver: one whose queue is full is disconnected.
    pub fn broadcast(&self, room_id: &RoomId, message: ServerMessage) -> usize {
        let recipients: Vec<Recipient> = self
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .map(|(id, member)| (id.clone(), member.sender.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut failed = Vec::new();
        let sent = self.deliver(&recipients, &message, &mut failed);
        self.evict(failed);

        debug!(
            room_id = %room_id,
            event = message.event_type(),
            sent_count = sent,
            "Event broadcast complete"
        );

        sent
    }

    /// Room the connection is currently subscribed to
    #[must_use]
    pub fn room_of(&self, connection_id: &ConnectionId) -> Option<RoomId> {
        self.connections
            .get(connection_id)
            .and_then(|conn| conn.room_id.clone())
    }

    /// Participants with a live subscription to `room_id`
    #[must_use]
    pub fn connected_participants(&self, room_id: &RoomId) -> Vec<ParticipantId> {
        let mut participants: Vec<ParticipantId> = self
            .rooms
            .get(room_id)
            .map(|members| members.values().map(|m| m.participant_id.clone()).collect())
            .unwrap_or_default();
        participants.sort();
        participants.dedup();
        participants
    }

    #[must_use]
    pub fn subscriber_count(&self, room_id: &RoomId) -> usize {
        self.rooms.get(room_id).map_or(0, |members| members.len())
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Remove `connection_id` from the room's member set and report who is
    /// left. Empty rooms are dropped from the table.
    fn remove_member(
        &self,
        room_id: &RoomId,
        connection_id: &ConnectionId,
        participant_id: &ParticipantId,
    ) -> Departure {
        let departure = self.rooms.get_mut(room_id).map(|mut members| {
            members.remove(connection_id);
            Departure {
                still_present: members
                    .values()
                    .any(|member| &member.participant_id == participant_id),
                remaining: members
                    .iter()
                    .map(|(id, member)| (id.clone(), member.sender.clone()))
                    .collect(),
            }
        });

        match departure {
            Some(departure) if departure.remaining.is_empty() => {
                self.rooms.remove_if(room_id, |_, members| members.is_empty());
                debug!(room_id = %room_id, "Room has no more subscribers, removed");
                departure
            }
            Some(departure) => departure,
            None => Departure::default(),
        }
    }

    /// Non-blocking send to each recipient. Failures are collected for
    /// eviction by the caller once it holds no map guards.
    fn deliver(
        &self,
        recipients: &[Recipient],
        message: &ServerMessage,
        failed: &mut Vec<(ConnectionId, DisconnectReason)>,
    ) -> usize {
        let mut sent = 0;
        for (connection_id, sender) in recipients {
            match sender.try_send(message.clone()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        connection_id = %connection_id,
                        event = message.event_type(),
                        buffer = self.config.send_buffer,
                        "Signaling receiver cannot keep up, disconnecting"
                    );
                    failed.push((connection_id.clone(), DisconnectReason::SlowConsumer));
                }
                Err(TrySendError::Closed(_)) => {
                    info!(
                        connection_id = %connection_id,
                        event = message.event_type(),
                        "Signaling send to closed connection"
                    );
                    failed.push((connection_id.clone(), DisconnectReason::TransportDropped));
                }
            }
        }
        sent
    }

    /// Remove connections and announce their departure. Departure
    /// announcements can themselves fail, so this drains a worklist instead
    /// of recursing.
    fn evict(&self, mut pending: Vec<(ConnectionId, DisconnectReason)>) {
        while let Some((connection_id, reason)) = pending.pop() {
            let Some((_, conn)) = self.connections.remove(&connection_id) else {
                continue;
            };

            info!(
                connection_id = %connection_id,
                participant_id = %conn.participant_id,
                reason = reason.as_str(),
                "Signaling connection removed"
            );

            if let Some(room_id) = conn.room_id {
                let departure = self.remove_member(&room_id, &connection_id, &conn.participant_id);
                if !departure.still_present {
                    let msg = ServerMessage::UserDisconnected {
                        participant_id: conn.participant_id,
                    };
                    self.deliver(&departure.remaining, &msg, &mut pending);
                }
            }
        }
    }
}
