pub mod auth;
pub mod relay;
pub mod room;
pub mod scheduler;

pub use auth::{Claims, JwtValidator};
pub use relay::{DisconnectReason, MessageSender, Signal, SignalingRelay};
pub use room::{generate_join_code, RoomLifecycleManager};
pub use scheduler::{RoomScheduler, TickReport};
