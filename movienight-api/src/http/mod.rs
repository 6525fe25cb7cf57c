// Module: http
// REST lifecycle routes and the WebSocket signaling endpoint

pub mod error;
pub mod health;
pub mod middleware;
pub mod room;
pub mod websocket;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use movienight_core::{
    bootstrap::Services,
    config::SignalingConfig,
    service::{JwtValidator, RoomLifecycleManager, SignalingRelay},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RoomLifecycleManager>,
    pub relay: Arc<SignalingRelay>,
    pub validator: JwtValidator,
    pub signaling: Arc<SignalingConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(services: &Services, signaling: SignalingConfig) -> Self {
        Self {
            rooms: Arc::clone(&services.rooms),
            relay: Arc::clone(&services.relay),
            validator: services.validator.clone(),
            signaling: Arc::new(signaling),
        }
    }
}

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(health::create_health_router())
        // Room lifecycle routes
        .route("/rooms", post(room::create_room).get(room::list_rooms))
        .route("/rooms/join", post(room::join_room))
        .route("/rooms/code/{code}", get(room::get_room_by_code))
        .route("/rooms/{room_id}", get(room::get_room))
        .route("/rooms/{room_id}/start", post(room::start_room))
        .route("/rooms/{room_id}/finish", post(room::finish_room))
        .route("/rooms/{room_id}/leave", post(room::leave_room))
        // WebSocket endpoint for signaling
        .route("/ws", get(websocket::websocket_handler));

    // Apply layers before state
    let router = router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
