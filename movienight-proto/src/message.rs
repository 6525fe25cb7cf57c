//! Signaling channel envelopes
//!
//! Every frame on the signaling connection is one JSON object tagged by
//! `type` (kebab-case) with camelCase fields, e.g.
//! `{"type":"offer","target":"p2","sdp":{...}}`.
//!
//! SDP and ICE payloads are carried as opaque JSON values; the relay never
//! looks inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{ParticipantId, RoomId};
use crate::room::RoomView;

/// Messages sent by a client over the signaling connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Announce (or replace) this connection's room subscription
    JoinRoom {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participant_id: Option<ParticipantId>,
    },
    Offer { target: ParticipantId, sdp: Value },
    Answer { target: ParticipantId, sdp: Value },
    IceCandidate { target: ParticipantId, candidate: Value },
    /// Chat line for everyone in the sender's room
    ChatMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        message: String,
    },
}

impl ClientMessage {
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ChatMessage { .. } => "chat-message",
        }
    }
}

/// Messages pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    UserConnected {
        participant_id: ParticipantId,
    },
    UserDisconnected {
        participant_id: ParticipantId,
    },
    /// `sender` is set by the server from the authenticated identity
    Offer {
        target: ParticipantId,
        sdp: Value,
        sender: ParticipantId,
    },
    Answer {
        target: ParticipantId,
        sdp: Value,
        sender: ParticipantId,
    },
    IceCandidate {
        target: ParticipantId,
        candidate: Value,
        sender: ParticipantId,
    },
    ChatMessage {
        room_id: RoomId,
        sender: ParticipantId,
        message: String,
        sent_at: DateTime<Utc>,
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
    RoomStarted {
        room_id: RoomId,
        message: String,
        room: Box<RoomView>,
    },
    RoomFinished {
        room_id: RoomId,
        message: String,
    },
}

impl ServerMessage {
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::UserConnected { .. } => "user-connected",
            Self::UserDisconnected { .. } => "user-disconnected",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::ChatMessage { .. } => "chat-message",
            Self::RoomUpdated { .. } => "room-updated",
            Self::RoomStartingSoon { .. } => "room-starting-soon",
            Self::RoomStarted { .. } => "room-started",
            Self::RoomFinished { .. } => "room-finished",
        }
    }
}

/// Kinds of peer-originated payloads the relay forwards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    ChatMessage,
}

impl SignalKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::IceCandidate => "ice-candidate",
            Self::ChatMessage => "chat-message",
        }
    }

    /// Chat goes to the whole room, everything else to one participant.
    #[must_use]
    pub const fn is_room_wide(&self) -> bool {
        matches!(self, Self::ChatMessage)
    }
}
