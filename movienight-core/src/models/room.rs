use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{MovieId, ParticipantId, RoomId, RoomStatus, RoomView, Visibility};

/// Persisted room record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub movie_id: MovieId,
    pub visibility: Visibility,
    /// Present iff `visibility` is private
    pub code: Option<String>,
    pub theme: Option<String>,
    pub admin_enabled: bool,
    pub capacity: u32,
    /// Creating participant. Never changes and never leaves `participants`.
    pub host: ParticipantId,
    pub participants: Vec<ParticipantId>,
    pub status: RoomStatus,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Build a fresh room. The host is the first participant; a start time
    /// puts the room on the scheduled branch.
    #[must_use]
    pub fn new(new: NewRoom, now: DateTime<Utc>) -> Self {
        let status = if new.scheduled_start_time.is_some() {
            RoomStatus::Scheduled
        } else {
            RoomStatus::Waiting
        };

        Self {
            id: RoomId::new(),
            name: new.name,
            movie_id: new.movie_id,
            visibility: new.visibility,
            code: new.code,
            theme: new.theme,
            admin_enabled: new.admin_enabled,
            capacity: new.capacity,
            participants: vec![new.host.clone()],
            host: new.host,
            status,
            scheduled_start_time: new.scheduled_start_time,
            notification_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        self.participants.contains(participant)
    }

    #[must_use]
    pub fn is_host(&self, participant: &ParticipantId) -> bool {
        &self.host == participant
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.capacity as usize
    }

    /// Scheduled room whose start has arrived
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == RoomStatus::Scheduled
            && self.scheduled_start_time.is_some_and(|start| start <= now)
    }

    /// Scheduled room inside the reminder window that has not been reminded yet
    #[must_use]
    pub fn is_starting_soon(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.status == RoomStatus::Scheduled
            && !self.notification_sent
            && self
                .scheduled_start_time
                .is_some_and(|start| now <= start && start <= now + window)
    }

    #[must_use]
    pub fn to_view(&self) -> RoomView {
        RoomView {
            id: self.id.clone(),
            name: self.name.clone(),
            movie_id: self.movie_id.clone(),
            visibility: self.visibility,
            code: self.code.clone(),
            theme: self.theme.clone(),
            admin_enabled: self.admin_enabled,
            max_participants: self.capacity,
            host: self.host.clone(),
            participants: self.participants.clone(),
            status: self.status,
            start_time: self.scheduled_start_time,
            notification_sent: self.notification_sent,
            created_at: self.created_at,
        }
    }
}

/// Validated creation input, after capacity clamping and code assignment
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub movie_id: MovieId,
    pub visibility: Visibility,
    pub code: Option<String>,
    pub theme: Option<String>,
    pub admin_enabled: bool,
    pub capacity: u32,
    pub host: ParticipantId,
    pub scheduled_start_time: Option<DateTime<Utc>>,
}

/// `POST /rooms` body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    pub movie_id: MovieId,
    #[serde(rename = "type", default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default, alias = "scheduledStartTime")]
    pub start_time: Option<DateTime<Utc>>,
    /// Client preference only; the server clamps it to its own ceiling
    #[serde(default)]
    pub max_participants: Option<i64>,
    #[serde(default)]
    pub admin_enabled: bool,
}

/// How a participant names the room they want to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    Id(RoomId),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(Room),
    /// Idempotent re-join, nothing changed
    AlreadyMember(Room),
}

impl JoinOutcome {
    #[must_use]
    pub const fn is_new_member(&self) -> bool {
        matches!(self, Self::Joined(_))
    }

    #[must_use]
    pub fn room(&self) -> &Room {
        match self {
            Self::Joined(room) | Self::AlreadyMember(room) => room,
        }
    }

    #[must_use]
    pub fn into_room(self) -> Room {
        match self {
            Self::Joined(room) | Self::AlreadyMember(room) => room,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_room(start: Option<DateTime<Utc>>) -> NewRoom {
        NewRoom {
            name: "Friday".to_string(),
            movie_id: MovieId::from("m1"),
            visibility: Visibility::Public,
            code: None,
            theme: None,
            admin_enabled: false,
            capacity: 2,
            host: ParticipantId::from("host"),
            scheduled_start_time: start,
        }
    }

    #[test]
    fn test_new_room_contains_host() {
        let room = Room::new(new_room(None), Utc::now());
        assert_eq!(room.status, RoomStatus::Waiting);
        assert!(room.is_member(&ParticipantId::from("host")));
        assert!(room.is_host(&ParticipantId::from("host")));
        assert!(!room.is_full());
    }

    #[test]
    fn test_scheduled_room_windows() {
        let now = Utc::now();
        let room = Room::new(new_room(Some(now + Duration::minutes(5))), now);

        assert_eq!(room.status, RoomStatus::Scheduled);
        assert!(room.is_starting_soon(now, Duration::minutes(10)));
        assert!(!room.is_starting_soon(now - Duration::minutes(6), Duration::minutes(10)));
        assert!(!room.is_due(now));
        assert!(room.is_due(now + Duration::minutes(5)));
    }

    #[test]
    fn test_notified_room_is_not_starting_soon() {
        let now = Utc::now();
        let mut room = Room::new(new_room(Some(now + Duration::minutes(5))), now);
        room.notification_sent = true;
        assert!(!room.is_starting_soon(now, Duration::minutes(10)));
    }

    #[test]
    fn test_create_request_wire_format() {
        let req: CreateRoomRequest = serde_json::from_value(serde_json::json!({
            "name": "Movie night",
            "movieId": "m1",
            "type": "private",
            "maxParticipants": 12,
            "adminEnabled": true,
        }))
        .unwrap();

        assert_eq!(req.visibility, Visibility::Private);
        assert_eq!(req.max_participants, Some(12));
        assert!(req.start_time.is_none());
    }
}
