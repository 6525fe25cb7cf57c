use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Room or join code does not resolve
    #[error("Not found: {0}")]
    NotFound(String),

    /// Non-host attempting a host-only transition
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The capacity invariant would be violated
    #[error("Room is full: {0}")]
    RoomFull(String),

    /// Transition attempted from a state that does not permit it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Unique constraint collision (join codes). Retried internally.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Machine-readable kind reported to API clients
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::Forbidden(_) => "Forbidden",
            Self::RoomFull(_) => "RoomFull",
            Self::InvalidState(_) => "InvalidState",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Authentication(_) => "Unauthorized",
            Self::Conflict(_) => "Conflict",
            Self::Database(_) | Self::Serialization(_) | Self::Internal(_) => "Internal",
        }
    }

    /// Lifecycle violations are expected outcomes, not faults.
    #[must_use]
    pub const fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Forbidden(_) | Self::RoomFull(_) | Self::InvalidState(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().unwrap_or_default();
                match code.as_ref() {
                    // PostgreSQL unique_violation
                    "23505" => Self::Conflict(db_err.message().to_string()),
                    // PostgreSQL check_violation (capacity / code constraints)
                    "23514" => Self::InvalidInput("Constraint check failed".to_string()),
                    // PostgreSQL not_null_violation
                    "23502" => Self::InvalidInput("Required field is missing".to_string()),
                    _ => Self::Database(err),
                }
            }
            _ => Self::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn test_lifecycle_violations() {
        assert!(Error::RoomFull("r".into()).is_lifecycle_violation());
        assert!(Error::InvalidState("r".into()).is_lifecycle_violation());
        assert!(!Error::Internal("boom".into()).is_lifecycle_violation());
        assert_eq!(Error::Internal("boom".into()).kind(), "Internal");
    }
}
