pub mod room;

pub use movienight_proto::{
    generate_id, ConnectionId, MovieId, ParticipantId, RoomId, RoomStatus, RoomView, Visibility,
};
pub use room::{CreateRoomRequest, JoinOutcome, JoinTarget, NewRoom, Room};
