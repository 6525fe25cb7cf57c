// HTTP middleware

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use movienight_core::models::ParticipantId;

use super::{AppError, AppState};

/// Authenticated participant extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub participant_id: ParticipantId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|e| AppError::unauthorized(format!("Invalid Authorization header: {e}")))?;

        let participant_id = app_state
            .validator
            .validate_http(auth_str)
            .map_err(|e| AppError::unauthorized(e.to_string()))?;

        Ok(Self { participant_id })
    }
}
