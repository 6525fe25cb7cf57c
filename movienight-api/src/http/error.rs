// HTTP error handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application error with HTTP status code and a machine-readable kind
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "InvalidInput", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "Forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NotFound", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal", message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.status, self.kind, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response JSON structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.kind.to_string(),
            message: self.message,
            status: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<movienight_core::Error> for AppError {
    fn from(err: movienight_core::Error) -> Self {
        use movienight_core::Error;

        let kind = err.kind();
        match err {
            Error::NotFound(msg) => Self::new(StatusCode::NOT_FOUND, kind, msg),
            Error::Forbidden(msg) => Self::new(StatusCode::FORBIDDEN, kind, msg),
            Error::RoomFull(msg) | Error::InvalidState(msg) | Error::Conflict(msg) => {
                Self::new(StatusCode::CONFLICT, kind, msg)
            }
            Error::InvalidInput(msg) => Self::new(StatusCode::BAD_REQUEST, kind, msg),
            Error::Authentication(msg) => Self::new(StatusCode::UNAUTHORIZED, kind, msg),
            Error::Database(_) | Error::Serialization(_) | Error::Internal(_) => {
                tracing::error!(error = %err, "Internal error");
                Self::internal_server_error("Internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use movienight_core::Error;

    #[test]
    fn test_lifecycle_errors_map_to_conventional_statuses() {
        let cases = [
            (Error::NotFound("room".into()), StatusCode::NOT_FOUND, "NotFound"),
            (Error::Forbidden("host".into()), StatusCode::FORBIDDEN, "Forbidden"),
            (Error::RoomFull("r".into()), StatusCode::CONFLICT, "RoomFull"),
            (Error::InvalidState("r".into()), StatusCode::CONFLICT, "InvalidState"),
            (Error::InvalidInput("name".into()), StatusCode::BAD_REQUEST, "InvalidInput"),
            (Error::Authentication("t".into()), StatusCode::UNAUTHORIZED, "Unauthorized"),
        ];

        for (err, status, kind) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.kind, kind);
        }
    }

    #[test]
    fn test_internal_errors_are_redacted() {
        let app: AppError = Error::Internal("connection string leaked".into()).into();
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!app.message.contains("leaked"));
    }
}
