//! Room Store
//!
//! Every membership and status mutation is a single atomic operation on the
//! store: a check-then-act split across two calls would let concurrent joins
//! overshoot capacity or let two ticks both flip `notification_sent`.

pub mod memory;
pub mod room;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{JoinOutcome, ParticipantId, Room, RoomId, RoomStatus},
    Result,
};

pub use memory::MemoryRoomStore;
pub use room::PgRoomRepository;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persist a new room. Fails with `Conflict` if its code is already taken.
    async fn insert(&self, room: &Room) -> Result<Room>;

    async fn get(&self, id: &RoomId) -> Result<Option<Room>>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Room>>;

    /// Public rooms in any of `statuses`, newest first
    async fn list_public(&self, statuses: &[RoomStatus]) -> Result<Vec<Room>>;

    /// Rooms in `scheduled` status with a start time
    async fn list_scheduled(&self) -> Result<Vec<Room>>;

    /// Append `participant` unless already present, the room is full or finished.
    ///
    /// Fails with `NotFound`, `RoomFull` or `InvalidState`.
    async fn add_participant(&self, id: &RoomId, participant: &ParticipantId)
        -> Result<JoinOutcome>;

    /// Remove `participant`. Returns the updated room, or `None` if it was not
    /// a member. Fails with `NotFound` if the room is absent.
    async fn remove_participant(
        &self,
        id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<Option<Room>>;

    /// Compare-and-set on `status`: moves to `to` only if the current status is
    /// one of `from`. Returns `None` when the guard did not match.
    async fn transition(
        &self,
        id: &RoomId,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> Result<Option<Room>>;

    /// `scheduled -> active` when the start time is at or before `now`
    async fn activate_due(&self, id: &RoomId, now: DateTime<Utc>) -> Result<Option<Room>>;

    /// Flip `notification_sent` false -> true while the room is still scheduled.
    /// Returns `None` if it was already set or the room left `scheduled`.
    async fn mark_notified(&self, id: &RoomId) -> Result<Option<Room>>;
}
