use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;

use super::RoomStore;
use crate::{
    models::{JoinOutcome, ParticipantId, Room, RoomId, RoomStatus},
    Error, Result,
};

/// In-process Room Store for single-node deployments and tests.
///
/// Each room sits behind its own mutex, so mutations on one room are
/// serialized while distinct rooms never contend. Private codes are claimed
/// through the `codes` map entry API, which makes the uniqueness check and
/// the claim one step.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
    codes: DashMap<String, RoomId>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &RoomId) -> Option<Arc<Mutex<Room>>> {
        // Clone the Arc out so the shard guard is released before locking the room.
        self.rooms.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn snapshot(&self) -> Vec<Room> {
        let slots: Vec<_> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn insert(&self, room: &Room) -> Result<Room> {
        if let Some(code) = &room.code {
            match self.codes.entry(code.clone()) {
                Entry::Occupied(_) => {
                    return Err(Error::Conflict(format!("room code {code} already in use")));
                }
                Entry::Vacant(entry) => {
                    entry.insert(room.id.clone());
                }
            }
        }

        match self.rooms.entry(room.id.clone()) {
            Entry::Occupied(_) => {
                if let Some(code) = &room.code {
                    self.codes.remove(code);
                }
                Err(Error::Conflict(format!("room {} already exists", room.id)))
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(room.clone())));
                Ok(room.clone())
            }
        }
    }

    async fn get(&self, id: &RoomId) -> Result<Option<Room>> {
        Ok(self.slot(id).map(|slot| slot.lock().clone()))
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Room>> {
        let id = self.codes.get(code).map(|entry| entry.value().clone());
        match id {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    async fn list_public(&self, statuses: &[RoomStatus]) -> Result<Vec<Room>> {
        let mut rooms: Vec<Room> = self
            .snapshot()
            .into_iter()
            .filter(|room| !room.visibility.is_private() && statuses.contains(&room.status))
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rooms)
    }

    async fn list_scheduled(&self) -> Result<Vec<Room>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|room| {
                room.status == RoomStatus::Scheduled && room.scheduled_start_time.is_some()
            })
            .collect())
    }

    async fn add_participant(
        &self,
        id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<JoinOutcome> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::NotFound(format!("room {id} not found")))?;
        let mut room = slot.lock();

        if room.is_member(participant) {
            return Ok(JoinOutcome::AlreadyMember(room.clone()));
        }
        if room.status.is_finished() {
            return Err(Error::InvalidState(format!("room {id} has finished")));
        }
        if room.is_full() {
            return Err(Error::RoomFull(format!(
                "room {id} is at capacity ({})",
                room.capacity
            )));
        }

        room.participants.push(participant.clone());
        room.updated_at = Utc::now();
        Ok(JoinOutcome::Joined(room.clone()))
    }

    async fn remove_participant(
        &self,
        id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<Option<Room>> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::NotFound(format!("room {id} not found")))?;
        let mut room = slot.lock();

        let before = room.participants.len();
        room.participants.retain(|p| p != participant);
        if room.participants.len() == before {
            return Ok(None);
        }
        room.updated_at = Utc::now();
        Ok(Some(room.clone()))
    }

    async fn transition(
        &self,
        id: &RoomId,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> Result<Option<Room>> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::NotFound(format!("room {id} not found")))?;
        let mut room = slot.lock();

        if !from.contains(&room.status) || !room.status.can_transition_to(to) {
            return Ok(None);
        }
        room.status = to;
        room.updated_at = Utc::now();
        Ok(Some(room.clone()))
    }

    async fn activate_due(&self, id: &RoomId, now: DateTime<Utc>) -> Result<Option<Room>> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::NotFound(format!("room {id} not found")))?;
        let mut room = slot.lock();

        if !room.is_due(now) {
            return Ok(None);
        }
        room.status = RoomStatus::Active;
        room.updated_at = Utc::now();
        Ok(Some(room.clone()))
    }

    async fn mark_notified(&self, id: &RoomId) -> Result<Option<Room>> {
        let slot = self
            .slot(id)
            .ok_or_else(|| Error::NotFound(format!("room {id} not found")))?;
        let mut room = slot.lock();

        if room.status != RoomStatus::Scheduled || room.notification_sent {
            return Ok(None);
        }
        room.notification_sent = true;
        room.updated_at = Utc::now();
        Ok(Some(room.clone()))
    }
}
