//! Test helpers and fixtures
//!
//! Room fixtures and a ready-wired lifecycle stack over the in-memory store,
//! shared by unit tests and (behind the `test-helpers` feature) by other
//! crates' integration tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::ManualClock;
use crate::config::{RoomsConfig, SignalingConfig};
use crate::models::{MovieId, NewRoom, ParticipantId, Room, RoomId, Visibility};
use crate::repository::{MemoryRoomStore, RoomStore};
use crate::service::{RoomLifecycleManager, SignalingRelay};

/// Create a test participant ID
#[must_use]
pub fn test_participant(id: &str) -> ParticipantId {
    ParticipantId::from_string(id.to_string())
}

/// Create a test room ID
#[must_use]
pub fn test_room_id(id: &str) -> RoomId {
    RoomId::from_string(id.to_string())
}

/// Test fixture builder for Room
pub struct RoomFixture {
    new: NewRoom,
    now: DateTime<Utc>,
}

impl RoomFixture {
    #[must_use]
    pub fn new(host: &str) -> Self {
        Self {
            new: NewRoom {
                name: "Test room".to_string(),
                movie_id: MovieId::from("movie-1"),
                visibility: Visibility::Public,
                code: None,
                theme: None,
                admin_enabled: false,
                capacity: 4,
                host: test_participant(host),
                scheduled_start_time: None,
            },
            now: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_capacity(mut self, capacity: u32) -> Self {
        self.new.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: &str) -> Self {
        self.new.visibility = Visibility::Private;
        self.new.code = Some(code.to_string());
        self
    }

    #[must_use]
    pub const fn scheduled_at(mut self, start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        self.new.scheduled_start_time = Some(start);
        self.now = now;
        self
    }

    #[must_use]
    pub fn build(self) -> Room {
        Room::new(self.new, self.now)
    }
}

#[must_use]
pub fn public_room(host: &str, capacity: u32) -> Room {
    RoomFixture::new(host).with_capacity(capacity).build()
}

#[must_use]
pub fn private_room(host: &str, code: &str) -> Room {
    RoomFixture::new(host).with_code(code).build()
}

#[must_use]
pub fn scheduled_room(host: &str, start: DateTime<Utc>, now: DateTime<Utc>) -> Room {
    RoomFixture::new(host).scheduled_at(start, now).build()
}

/// In-memory store, relay and lifecycle manager sharing one manual clock
pub struct TestStack {
    pub store: Arc<MemoryRoomStore>,
    pub relay: Arc<SignalingRelay>,
    pub clock: Arc<ManualClock>,
    pub rooms: Arc<RoomLifecycleManager>,
}

impl TestStack {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoomsConfig::default(), SignalingConfig::default())
    }

    #[must_use]
    pub fn with_config(rooms: RoomsConfig, signaling: SignalingConfig) -> Self {
        let store = Arc::new(MemoryRoomStore::new());
        let relay = Arc::new(SignalingRelay::new(signaling));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = Arc::new(RoomLifecycleManager::new(
            Arc::clone(&store) as Arc<dyn RoomStore>,
            Arc::clone(&relay),
            rooms,
            clock.clone(),
        ));

        Self {
            store,
            relay,
            clock,
            rooms: manager,
        }
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}
