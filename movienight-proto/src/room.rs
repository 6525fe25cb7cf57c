use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{MovieId, ParticipantId, RoomId};

/// Room lifecycle status
///
/// Two branches lead into a live session:
/// `waiting -> playing` (host start) and `scheduled -> active` (scheduled
/// activation). A host may still start a scheduled or active room, which
/// moves it to `playing`. `finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Waiting,
    Scheduled,
    Active,
    Playing,
    Finished,
}

impl RoomStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::Playing => "playing",
            Self::Finished => "finished",
        }
    }

    /// Both `active` and `playing` represent a live session.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Playing)
    }

    /// States a host start is accepted from.
    #[must_use]
    pub const fn can_start(&self) -> bool {
        matches!(self, Self::Waiting | Self::Scheduled | Self::Active)
    }

    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Whether `next` is reachable from `self` in one step.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Playing)
                | (Self::Scheduled, Self::Active)
                | (Self::Scheduled, Self::Playing)
                | (Self::Active, Self::Playing)
                | (Self::Active, Self::Finished)
                | (Self::Playing, Self::Finished)
        )
    }
}

impl std::fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "scheduled" => Ok(Self::Scheduled),
            "active" => Ok(Self::Active),
            "playing" => Ok(Self::Playing),
            "finished" => Ok(Self::Finished),
            other => Err(format!("unknown room status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    #[must_use]
    pub const fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown room visibility: {other}")),
        }
    }
}

/// Room snapshot as seen by clients (REST responses and `room-started`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: RoomId,
    pub name: String,
    pub movie_id: MovieId,
    #[serde(rename = "type")]
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub theme: Option<String>,
    pub admin_enabled: bool,
    pub max_participants: u32,
    pub host: ParticipantId,
    pub participants: Vec<ParticipantId>,
    pub status: RoomStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_time: Option<DateTime<Utc>>,
    pub notification_sent: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions_are_monotonic() {
        use RoomStatus::*;

        assert!(Waiting.can_transition_to(Playing));
        assert!(Scheduled.can_transition_to(Active));
        assert!(Active.can_transition_to(Playing));
        assert!(Playing.can_transition_to(Finished));

        assert!(!Playing.can_transition_to(Waiting));
        assert!(!Active.can_transition_to(Scheduled));
        assert!(!Waiting.can_transition_to(Active));
        assert!(!Finished.can_transition_to(Playing));
        assert!(!Playing.can_transition_to(Playing));
    }

    #[test]
    fn test_can_start() {
        assert!(RoomStatus::Waiting.can_start());
        assert!(RoomStatus::Scheduled.can_start());
        assert!(RoomStatus::Active.can_start());
        assert!(!RoomStatus::Playing.can_start());
        assert!(!RoomStatus::Finished.can_start());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            RoomStatus::Waiting,
            RoomStatus::Scheduled,
            RoomStatus::Active,
            RoomStatus::Playing,
            RoomStatus::Finished,
        ] {
            assert_eq!(status.as_str().parse::<RoomStatus>().unwrap(), status);
        }
        assert!("closed".parse::<RoomStatus>().is_err());
    }
}
