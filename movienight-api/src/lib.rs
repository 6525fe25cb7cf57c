//! MovieNight API layer
//!
//! REST lifecycle routes and the WebSocket signaling endpoint.

pub mod http;

pub use http::{create_router, AppState};
