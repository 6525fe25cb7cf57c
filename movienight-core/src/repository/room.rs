use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use super::RoomStore;
use crate::{
    models::{JoinOutcome, MovieId, ParticipantId, Room, RoomId, RoomStatus, Visibility},
    Error, Result,
};

const ROOM_COLUMNS: &str = "id, name, movie_id, visibility, code, theme, admin_enabled, capacity, \
     host, participants, status, scheduled_start_time, notification_sent, created_at, updated_at";

/// Postgres-backed Room Store.
///
/// Membership and status changes are single conditional `UPDATE ... RETURNING`
/// statements: the guard lives in the `WHERE` clause, so Postgres row locking
/// serializes concurrent writers on the same room and re-checks the guard
/// for whoever comes second.
#[derive(Clone)]
pub struct PgRoomRepository {
    pool: PgPool,
}

impl PgRoomRepository {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, id: &RoomId) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM rooms WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn require(&self, id: &RoomId) -> Result<Room> {
        self.get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("room {id} not found")))
    }

    fn row_to_room(row: &PgRow) -> Result<Room> {
        let visibility: String = row.try_get("visibility")?;
        let status: String = row.try_get("status")?;
        let capacity: i32 = row.try_get("capacity")?;
        let participants: Vec<String> = row.try_get("participants")?;

        Ok(Room {
            id: RoomId::from_string(row.try_get("id")?),
            name: row.try_get("name")?,
            movie_id: MovieId::from_string(row.try_get("movie_id")?),
            visibility: visibility.parse::<Visibility>().map_err(Error::Internal)?,
            code: row.try_get("code")?,
            theme: row.try_get("theme")?,
            admin_enabled: row.try_get("admin_enabled")?,
            capacity: u32::try_from(capacity)
                .map_err(|_| Error::Internal(format!("negative room capacity: {capacity}")))?,
            host: ParticipantId::from_string(row.try_get("host")?),
            participants: participants.into_iter().map(ParticipantId::from_string).collect(),
            status: status.parse::<RoomStatus>().map_err(Error::Internal)?,
            scheduled_start_time: row.try_get("scheduled_start_time")?,
            notification_sent: row.try_get("notification_sent")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl RoomStore for PgRoomRepository {
    async fn insert(&self, room: &Room) -> Result<Room> {
        let capacity = i32::try_from(room.capacity)
            .map_err(|_| Error::InvalidInput("capacity out of range".to_string()))?;
        let participants: Vec<&str> = room.participants.iter().map(ParticipantId::as_str).collect();

        let row = sqlx::query(&format!(
            "INSERT INTO rooms ({ROOM_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(room.id.as_str())
        .bind(&room.name)
        .bind(room.movie_id.as_str())
        .bind(room.visibility.as_str())
        .bind(&room.code)
        .bind(&room.theme)
        .bind(room.admin_enabled)
        .bind(capacity)
        .bind(room.host.as_str())
        .bind(&participants)
        .bind(room.status.as_str())
        .bind(room.scheduled_start_time)
        .bind(room.notification_sent)
        .bind(room.created_at)
        .bind(room.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_room(&row)
    }

    async fn get(&self, id: &RoomId) -> Result<Option<Room>> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_room).transpose()
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Room>> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE code = $1"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_room).transpose()
    }

    async fn list_public(&self, statuses: &[RoomStatus]) -> Result<Vec<Room>> {
        let statuses: Vec<&str> = statuses.iter().map(RoomStatus::as_str).collect();

        let rows = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms
             WHERE visibility = 'public' AND status = ANY($1)
             ORDER BY created_at DESC"
        ))
        .bind(&statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_room).collect()
    }

    async fn list_scheduled(&self) -> Result<Vec<Room>> {
        let rows = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms
             WHERE status = 'scheduled' AND scheduled_start_time IS NOT NULL
             ORDER BY scheduled_start_time ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_room).collect()
    }

    async fn add_participant(
        &self,
        id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<JoinOutcome> {
        let row = sqlx::query(&format!(
            "UPDATE rooms
             SET participants = array_append(participants, $2), updated_at = NOW()
             WHERE id = $1
               AND status <> 'finished'
               AND NOT ($2 = ANY(participants))
               AND cardinality(participants) < capacity
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(participant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(JoinOutcome::Joined(Self::row_to_room(&row)?));
        }

        // The guard did not match; work out which part of it failed.
        let room = self.require(id).await?;
        if room.is_member(participant) {
            Ok(JoinOutcome::AlreadyMember(room))
        } else if room.status.is_finished() {
            Err(Error::InvalidState(format!("room {id} has finished")))
        } else {
            Err(Error::RoomFull(format!(
                "room {id} is at capacity ({})",
                room.capacity
            )))
        }
    }

    async fn remove_participant(
        &self,
        id: &RoomId,
        participant: &ParticipantId,
    ) -> Result<Option<Room>> {
        let row = sqlx::query(&format!(
            "UPDATE rooms
             SET participants = array_remove(participants, $2), updated_at = NOW()
             WHERE id = $1 AND $2 = ANY(participants)
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(participant.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_room(&row)?)),
            None if self.exists(id).await? => Ok(None),
            None => Err(Error::NotFound(format!("room {id} not found"))),
        }
    }

    async fn transition(
        &self,
        id: &RoomId,
        from: &[RoomStatus],
        to: RoomStatus,
    ) -> Result<Option<Room>> {
        let from: Vec<&str> = from
            .iter()
            .filter(|status| status.can_transition_to(to))
            .map(RoomStatus::as_str)
            .collect();

        let row = sqlx::query(&format!(
            "UPDATE rooms
             SET status = $3, updated_at = NOW()
             WHERE id = $1 AND status = ANY($2)
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(&from)
        .bind(to.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_room(&row)?)),
            None if self.exists(id).await? => Ok(None),
            None => Err(Error::NotFound(format!("room {id} not found"))),
        }
    }

    async fn activate_due(&self, id: &RoomId, now: DateTime<Utc>) -> Result<Option<Room>> {
        let row = sqlx::query(&format!(
            "UPDATE rooms
             SET status = 'active', updated_at = NOW()
             WHERE id = $1 AND status = 'scheduled' AND scheduled_start_time <= $2
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_room).transpose()
    }

    async fn mark_notified(&self, id: &RoomId) -> Result<Option<Room>> {
        let row = sqlx::query(&format!(
            "UPDATE rooms
             SET notification_sent = TRUE, updated_at = NOW()
             WHERE id = $1 AND status = 'scheduled' AND notification_sent = FALSE
             RETURNING {ROOM_COLUMNS}"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_room).transpose()
    }
}
