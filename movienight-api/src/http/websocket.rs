//! WebSocket signaling endpoint
//!
//! One reader loop and one writer task per connection. The writer drains the
//! connection's bounded relay queue into text frames and pings the client;
//! the reader parses `ClientMessage` envelopes and hands them to the relay
//! with the authenticated identity as sender. Any inbound frame, pongs
//! included, resets the idle timer.

use std::fmt::Display;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use movienight_core::{
    models::{ConnectionId, ParticipantId, RoomId},
    service::{DisconnectReason, JwtValidator, Signal},
};
use movienight_proto::{ClientMessage, ServerMessage};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::http::{AppError, AppResult, AppState};

/// How long the writer gets to send its Close frame after the reader ends
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: Option<String>,
}

/// Authenticate, then upgrade to the signaling protocol
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let participant_id = authenticate(&state, query.token.as_deref(), &headers)?;
    let max_message_size = state.signaling.max_message_size;

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, state, participant_id)))
}

/// Browsers cannot set headers on a WebSocket handshake, so `?token=` is
/// accepted alongside `Authorization: Bearer`.
fn authenticate(
    state: &AppState,
    query_token: Option<&str>,
    headers: &HeaderMap,
) -> AppResult<ParticipantId> {
    if let Some(token) = query_token.filter(|t| !t.is_empty()) {
        return state
            .validator
            .validate_and_extract_participant(token)
            .map_err(|e| AppError::unauthorized(e.to_string()));
    }

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Missing token"))?
        .to_str()
        .map_err(|e| AppError::unauthorized(format!("Invalid Authorization header: {e}")))?;

    JwtValidator::extract_bearer_token(header)
        .and_then(|token| state.validator.validate_and_extract_participant(token))
        .map_err(|e| AppError::unauthorized(e.to_string()))
}

async fn handle_socket(socket: WebSocket, state: AppState, participant_id: ParticipantId) {
    let (connection_id, outbound) = state.relay.register(participant_id.clone());

    info!(
        connection_id = %connection_id,
        participant_id = %participant_id,
        "WebSocket connection established"
    );

    let (sink, stream) = socket.split();
    let reason = serve_connection(sink, stream, &state, &connection_id, &participant_id, outbound).await;

    info!(
        connection_id = %connection_id,
        participant_id = %participant_id,
        reason = reason.as_str(),
        "WebSocket connection closed"
    );
}

/// Pump one registered connection until either direction ends, then remove
/// it from the relay.
async fn serve_connection<Si, St>(
    sink: Si,
    stream: St,
    state: &AppState,
    connection_id: &ConnectionId,
    participant_id: &ParticipantId,
    outbound: mpsc::Receiver<ServerMessage>,
) -> DisconnectReason
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound,
        state.signaling.ping_interval(),
        connection_id.clone(),
    ));

    let reason = tokio::select! {
        reason = read_loop(stream, state, connection_id, participant_id) => reason,
        _ = &mut writer => DisconnectReason::TransportDropped,
    };

    // Removing the relay entry closes the outbound queue; the writer then
    // flushes what is left and sends a Close frame.
    state.relay.disconnect(connection_id, reason);
    if !writer.is_finished() && tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        debug!(connection_id = %connection_id, "Writer did not finish closing, aborted");
        writer.abort();
    }

    reason
}

/// Drain the relay queue into text frames and keep the transport alive with
/// pings. Ends with a Close frame once the queue closes.
async fn write_loop<Si>(
    mut sink: Si,
    mut outbound: mpsc::Receiver<ServerMessage>,
    ping_every: Duration,
    connection_id: ConnectionId,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut ping = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let frame = tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => match serde_json::to_string(&msg) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        warn!(error = %e, event = msg.event_type(), "Failed to encode server message");
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(Bytes::new()),
        };

        if let Err(e) = sink.send(frame).await {
            debug!(connection_id = %connection_id, error = %e, "Failed to send WebSocket message");
            return;
        }
    }

    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
}

async fn read_loop<St>(
    mut stream: St,
    state: &AppState,
    connection_id: &ConnectionId,
    participant_id: &ParticipantId,
) -> DisconnectReason
where
    St: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let idle_timeout = state.signaling.idle_timeout();

    loop {
        let frame = match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(frame) => frame,
            Err(_) => return DisconnectReason::IdleTimeout,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => handle_client_message(state, connection_id, participant_id, msg).await,
                    Err(e) => {
                        debug!(connection_id = %connection_id, error = %e, "Skipping malformed signaling frame");
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return DisconnectReason::Closed,
            Some(Ok(_)) => {
                // pongs answer our keepalive; pings are answered by axum
            }
            Some(Err(e)) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                return DisconnectReason::TransportDropped;
            }
        }
    }
}

async fn handle_client_message(
    state: &AppState,
    connection_id: &ConnectionId,
    participant_id: &ParticipantId,
    msg: ClientMessage,
) {
    let signal = match msg {
        ClientMessage::JoinRoom {
            room_id,
            participant_id: claimed,
        } => {
            join_room(state, connection_id, participant_id, room_id, claimed).await;
            return;
        }
        ClientMessage::Offer { target, sdp } => Signal::Offer { target, sdp },
        ClientMessage::Answer { target, sdp } => Signal::Answer { target, sdp },
        ClientMessage::IceCandidate { target, candidate } => Signal::IceCandidate { target, candidate },
        ClientMessage::ChatMessage { room_id, message } => {
            if room_id.is_some() && room_id != state.relay.room_of(connection_id) {
                debug!(connection_id = %connection_id, "Chat for a room this connection is not in, dropped");
                return;
            }
            Signal::Chat { message }
        }
    };

    state.relay.relay(connection_id, signal);
}

async fn join_room(
    state: &AppState,
    connection_id: &ConnectionId,
    participant_id: &ParticipantId,
    room_id: RoomId,
    claimed: Option<ParticipantId>,
) {
    if claimed.as_ref().is_some_and(|claimed| claimed != participant_id) {
        warn!(
            connection_id = %connection_id,
            participant_id = %participant_id,
            "join-room names a different participant, ignored"
        );
        return;
    }

    match state.rooms.is_member(&room_id, participant_id).await {
        Ok(true) => {
            if let Err(e) = state
                .relay
                .subscribe(connection_id, room_id, participant_id.clone())
            {
                debug!(connection_id = %connection_id, error = %e, "Subscribe failed");
            }
        }
        Ok(false) => {
            info!(
                connection_id = %connection_id,
                room_id = %room_id,
                participant_id = %participant_id,
                "join-room from non-member, ignored"
            );
        }
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "Membership check failed");
        }
    }
}
