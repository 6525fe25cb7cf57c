// Room lifecycle HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use movienight_core::models::{CreateRoomRequest, JoinTarget, Room, RoomId, RoomView};
use serde::Deserialize;

use super::{middleware::AuthUser, AppError, AppResult, AppState};

/// Join request: exactly one of `roomId` or `code`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_id: Option<RoomId>,
    pub code: Option<String>,
}

impl JoinRoomRequest {
    fn into_target(self) -> AppResult<JoinTarget> {
        match (self.room_id, self.code) {
            (Some(id), None) => Ok(JoinTarget::Id(id)),
            (None, Some(code)) => Ok(JoinTarget::Code(code)),
            (Some(_), Some(_)) => Err(AppError::bad_request("Provide either roomId or code, not both")),
            (None, None) => Err(AppError::bad_request("roomId or code is required")),
        }
    }
}

/// The join code is only shown to members.
fn view_for(room: &Room, auth: &AuthUser) -> RoomView {
    let mut view = room.to_view();
    if !room.is_member(&auth.participant_id) {
        view.code = None;
    }
    view
}

/// Create a new room hosted by the caller
pub async fn create_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, Json<RoomView>)> {
    let room = state.rooms.create(auth.participant_id, req).await?;
    Ok((StatusCode::CREATED, Json(room.to_view())))
}

/// List joinable public rooms
pub async fn list_rooms(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<RoomView>>> {
    let rooms = state.rooms.list_public().await?;
    Ok(Json(rooms.iter().map(|room| view_for(room, &auth)).collect()))
}

pub async fn get_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomView>> {
    let room = state.rooms.get(&RoomId::from_string(room_id)).await?;
    Ok(Json(view_for(&room, &auth)))
}

/// Resolve a private room's join code without joining
pub async fn get_room_by_code(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<RoomView>> {
    let room = state.rooms.get_by_code(&code).await?;
    Ok(Json(view_for(&room, &auth)))
}

pub async fn join_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<JoinRoomRequest>,
) -> AppResult<Json<RoomView>> {
    let target = req.into_target()?;
    let room = state.rooms.join(target, auth.participant_id).await?;
    Ok(Json(room.to_view()))
}

pub async fn leave_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomView>> {
    let room = state
        .rooms
        .leave(&RoomId::from_string(room_id), &auth.participant_id)
        .await?;
    Ok(Json(view_for(&room, &auth)))
}

/// Host-only: move the room into playback
pub async fn start_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomView>> {
    let room = state
        .rooms
        .start(&RoomId::from_string(room_id), &auth.participant_id)
        .await?;
    Ok(Json(room.to_view()))
}

/// Host-only: end a live session
pub async fn finish_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomView>> {
    let room = state
        .rooms
        .finish(&RoomId::from_string(room_id), &auth.participant_id)
        .await?;
    Ok(Json(room.to_view()))
}
