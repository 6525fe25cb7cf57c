//! MovieNight Protocol Definitions
//!
//! This crate contains the wire types shared by the signaling server and
//! the client-side peer session: identifiers, the JSON signaling envelopes
//! and the room snapshot pushed with lifecycle events.

pub mod id;
pub mod message;
pub mod room;
pub mod rtc;

pub use id::{generate_id, ConnectionId, MovieId, ParticipantId, RoomId};
pub use message::{ClientMessage, ServerMessage, SignalKind};
pub use room::{RoomStatus, RoomView, Visibility};
pub use rtc::{IceCandidate, SdpType, SessionDescription};
