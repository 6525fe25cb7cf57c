use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    clock::Clock,
    config::RoomsConfig,
    models::{
        CreateRoomRequest, JoinOutcome, JoinTarget, NewRoom, ParticipantId, Room, RoomId,
        RoomStatus,
    },
    repository::RoomStore,
    service::relay::SignalingRelay,
    Error, Result,
};
use movienight_proto::ServerMessage;

/// Join code alphabet: hex digits, upper case
const CODE_ALPHABET: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
];
const CODE_LENGTH: usize = 6;

/// Statuses listed by `GET /rooms`
const LISTED_STATUSES: [RoomStatus; 3] =
    [RoomStatus::Waiting, RoomStatus::Playing, RoomStatus::Active];

/// Statuses a host may start from
const STARTABLE: [RoomStatus; 3] = [RoomStatus::Waiting, RoomStatus::Scheduled, RoomStatus::Active];

/// Statuses a host may finish from
const FINISHABLE: [RoomStatus; 2] = [RoomStatus::Active, RoomStatus::Playing];

#[must_use]
pub fn generate_join_code() -> String {
    nanoid::nanoid!(CODE_LENGTH, &CODE_ALPHABET)
}

/// Room Lifecycle Manager
///
/// Owns the status state machine and membership rules. Every mutation goes
/// through one atomic Room Store operation; the matching event is pushed
/// through the relay only after the store accepted the change.
pub struct RoomLifecycleManager {
    store: Arc<dyn RoomStore>,
    relay: Arc<SignalingRelay>,
    config: RoomsConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RoomLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomLifecycleManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RoomLifecycleManager {
    pub fn new(
        store: Arc<dyn RoomStore>,
        relay: Arc<SignalingRelay>,
        config: RoomsConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            relay,
            config,
            clock,
        }
    }

    #[must_use]
    pub fn relay(&self) -> &Arc<SignalingRelay> {
        &self.relay
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a room hosted by `host`.
    ///
    /// Lands in `scheduled` when a start time is given, otherwise `waiting`.
    /// Private rooms get a join code; collisions are retried with a fresh code.
    pub async fn create(&self, host: ParticipantId, request: CreateRoomRequest) -> Result<Room> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput("Room name cannot be empty".to_string()));
        }
        if name.chars().count() > self.config.max_name_length {
            return Err(Error::InvalidInput("Room name too long".to_string()));
        }
        if request.movie_id.as_str().is_empty() {
            return Err(Error::InvalidInput("movieId is required".to_string()));
        }

        let capacity = self.resolve_capacity(request.max_participants)?;
        let now = self.now();
        if let Some(start) = request.start_time {
            if start <= now {
                return Err(Error::InvalidInput(
                    "Scheduled start time must be in the future".to_string(),
                ));
            }
        }

        let mut new_room = NewRoom {
            name,
            movie_id: request.movie_id,
            visibility: request.visibility,
            code: None,
            theme: request.theme.filter(|theme| !theme.trim().is_empty()),
            admin_enabled: request.admin_enabled,
            capacity,
            host,
            scheduled_start_time: request.start_time,
        };

        let room = if new_room.visibility.is_private() {
            self.insert_with_code(&mut new_room, now).await?
        } else {
            self.store.insert(&Room::new(new_room, now)).await?
        };

        info!(
            room_id = %room.id,
            host = %room.host,
            status = %room.status,
            visibility = room.visibility.as_str(),
            capacity = room.capacity,
            "Room created"
        );

        Ok(room)
    }

    async fn insert_with_code(&self, new_room: &mut NewRoom, now: DateTime<Utc>) -> Result<Room> {
        for attempt in 1..=self.config.code_generation_attempts {
            new_room.code = Some(generate_join_code());
            match self.store.insert(&Room::new(new_room.clone(), now)).await {
                Err(Error::Conflict(reason)) => {
                    debug!(attempt, reason = %reason, "Join code collision, retrying");
                }
                other => return other,
            }
        }

        Err(Error::Internal(format!(
            "Could not allocate a unique room code after {} attempts",
            self.config.code_generation_attempts
        )))
    }

    /// Client-supplied capacity is a preference. Below one is rejected; above
    /// the configured ceiling is clamped to it.
    fn resolve_capacity(&self, requested: Option<i64>) -> Result<u32> {
        match requested {
            None => Ok(self.config.default_capacity.min(self.config.max_capacity)),
            Some(n) if n < 1 => Err(Error::InvalidInput(
                "maxParticipants must be at least 1".to_string(),
            )),
            Some(n) => Ok(u32::try_from(n)
                .unwrap_or(u32::MAX)
                .min(self.config.max_capacity)),
        }
    }

    pub async fn get(&self, room_id: &RoomId) -> Result<Room> {
        self.store
            .get(room_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Room {room_id} not found")))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Room> {
        let code = normalize_code(code);
        self.store
            .find_by_code(&code)
            .await?
            .ok_or_else(|| Error::NotFound(format!("No room with code {code}")))
    }

    /// Public rooms that are open or live
    pub async fn list_public(&self) -> Result<Vec<Room>> {
        self.store.list_public(&LISTED_STATUSES).await
    }

    /// Rooms waiting on a scheduled start, for the scheduler
    pub async fn list_scheduled(&self) -> Result<Vec<Room>> {
        self.store.list_scheduled().await
    }

    pub async fn is_member(&self, room_id: &RoomId, participant: &ParticipantId) -> Result<bool> {
        Ok(self.get(room_id).await?.is_member(participant))
    }

    /// Add `participant` to the room.
    ///
    /// Idempotent for existing members, even at capacity. Only a real change
    /// is broadcast as `room-updated`.
    pub async fn join(&self, target: JoinTarget, participant: ParticipantId) -> Result<Room> {
        let room_id = match target {
            JoinTarget::Id(id) => id,
            JoinTarget::Code(code) => self.get_by_code(&code).await?.id,
        };

        let outcome = self.store.add_participant(&room_id, &participant).await?;
        if let JoinOutcome::Joined(room) = &outcome {
            info!(
                room_id = %room.id,
                participant_id = %participant,
                participants = room.participants.len(),
                "Participant joined room"
            );
            self.broadcast_participants(room);
        }

        Ok(outcome.into_room())
    }

    /// Remove a non-host participant and detach their signaling connections
    /// from the room. Leaving a room you are not in is a no-op.
    pub async fn leave(&self, room_id: &RoomId, participant: &ParticipantId) -> Result<Room> {
        let room = self.get(room_id).await?;
        if room.is_host(participant) {
            return Err(Error::Forbidden("The host cannot leave their own room".to_string()));
        }

        match self.store.remove_participant(room_id, participant).await? {
            Some(updated) => {
                let detached = self.relay.unsubscribe_participant(room_id, participant);
                info!(
                    room_id = %room_id,
                    participant_id = %participant,
                    detached_connections = detached,
                    "Participant left room"
                );
                self.broadcast_participants(&updated);
                Ok(updated)
            }
            None => Ok(room),
        }
    }

    /// Host start: `waiting | scheduled | active -> playing`
    pub async fn start(&self, room_id: &RoomId, participant: &ParticipantId) -> Result<Room> {
        let room = self.get(room_id).await?;
        if !room.is_host(participant) {
            return Err(Error::Forbidden("Only the host can start the room".to_string()));
        }
        if !room.status.can_start() {
            return Err(Error::InvalidState(format!(
                "Room cannot be started while {}",
                room.status
            )));
        }

        // A concurrent start may win between the read above and here; the
        // compare-and-set makes sure only one of them broadcasts.
        let started = self
            .store
            .transition(room_id, &STARTABLE, RoomStatus::Playing)
            .await?
            .ok_or_else(|| Error::InvalidState("Room has already been started".to_string()))?;

        info!(room_id = %room_id, host = %participant, "Room started by host");
        self.relay.broadcast(
            room_id,
            ServerMessage::RoomStarted {
                room_id: room_id.clone(),
                message: format!("{} is starting now", started.name),
                room: Box::new(started.to_view()),
            },
        );

        Ok(started)
    }

    /// Host finish: `active | playing -> finished`
    pub async fn finish(&self, room_id: &RoomId, participant: &ParticipantId) -> Result<Room> {
        let room = self.get(room_id).await?;
        if !room.is_host(participant) {
            return Err(Error::Forbidden("Only the host can finish the room".to_string()));
        }

        let finished = self
            .store
            .transition(room_id, &FINISHABLE, RoomStatus::Finished)
            .await?
            .ok_or_else(|| {
                Error::InvalidState(format!("Room cannot be finished while {}", room.status))
            })?;

        info!(room_id = %room_id, "Room finished");
        self.relay.broadcast(
            room_id,
            ServerMessage::RoomFinished {
                room_id: room_id.clone(),
                message: format!("{} has ended", finished.name),
            },
        );

        Ok(finished)
    }

    /// Scheduled activation: `scheduled -> active` once the start time has
    /// passed. Returns `None` when the room was not due or already activated.
    pub async fn activate_if_due(
        &self,
        room_id: &RoomId,
        now: DateTime<Utc>,
    ) -> Result<Option<Room>> {
        let Some(room) = self.store.activate_due(room_id, now).await? else {
            return Ok(None);
        };

        info!(room_id = %room_id, "Scheduled room activated");
        self.relay.broadcast(
            room_id,
            ServerMessage::RoomStarted {
                room_id: room_id.clone(),
                message: format!("{} is starting now", room.name),
                room: Box::new(room.to_view()),
            },
        );

        Ok(Some(room))
    }

    /// Send the one-time `room-starting-soon` reminder if `room` is inside
    /// the window. Returns whether this call sent it.
    pub async fn notify_starting_soon(
        &self,
        room: &Room,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<bool> {
        if !room.is_starting_soon(now, window) {
            return Ok(false);
        }
        let Some(start_time) = room.scheduled_start_time else {
            return Ok(false);
        };
        if self.store.mark_notified(&room.id).await?.is_none() {
            return Ok(false);
        }

        let minutes = minutes_until(now, start_time);
        info!(room_id = %room.id, minutes, "Room starting soon notification sent");
        self.relay.broadcast(
            &room.id,
            ServerMessage::RoomStartingSoon {
                room_id: room.id.clone(),
                message: format!("{} starts in {minutes} minute(s)", room.name),
                start_time,
            },
        );

        Ok(true)
    }

    fn broadcast_participants(&self, room: &Room) {
        self.relay.broadcast(
            &room.id,
            ServerMessage::RoomUpdated {
                room_id: room.id.clone(),
                participants: room.participants.clone(),
            },
        );
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whole minutes remaining, rounded up
fn minutes_until(now: DateTime<Utc>, start: DateTime<Utc>) -> i64 {
    let seconds = (start - now).num_seconds().max(0);
    (seconds + 59) / 60
}
