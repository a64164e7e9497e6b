pub mod handlers;
mod host;
mod player;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::ErrorCode;
use crate::protocol::{Request, ServerFrame, ServerMessage, PROTOCOL_VERSION};
use crate::state::{AppState, Membership};
use crate::types::*;

/// The seat a connection currently occupies
#[derive(Debug, Clone, PartialEq)]
pub struct Seat {
    pub room_code: RoomCode,
    pub player_name: PlayerName,
    pub session_token: SessionToken,
}

/// Per-connection state. A connection sits in at most one room and holds
/// exactly one subscription to that room's events.
#[derive(Debug)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub seat: Option<Seat>,
    pub subscription: Option<broadcast::Receiver<ServerMessage>>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            connection_id: ulid::Ulid::new().to_string(),
            seat: None,
            subscription: None,
        }
    }

    /// The seat, if the connection sits in `room_code`
    pub fn seat_in(&self, room_code: &str) -> Option<&Seat> {
        self.seat
            .as_ref()
            .filter(|seat| seat.room_code.eq_ignore_ascii_case(room_code.trim()))
    }

    /// Take a seat, replacing any previous subscription
    pub fn enter(&mut self, membership: Membership) {
        self.seat = Some(Seat {
            room_code: membership.room_code,
            player_name: membership.player_name,
            session_token: membership.session_token,
        });
        self.subscription = Some(membership.events);
    }

    pub fn vacate(&mut self) -> Option<Seat> {
        self.subscription = None;
        self.seat.take()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(reply_to: Option<u64>, msg: ServerMessage) -> Option<Message> {
    match serde_json::to_string(&ServerFrame { reply_to, msg }) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!("Failed to encode server message: {}", e);
            None
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new();
    tracing::info!("WebSocket connected: {}", session.connection_id);

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        server_now: chrono::Utc::now(),
    };
    if let Some(msg) = encode(None, welcome) {
        if sender.send(msg).await.is_err() {
            tracing::error!("Failed to send welcome message");
            return;
        }
    }

    loop {
        tokio::select! {
            // Room events, once the connection has a seat
            event = async {
                match &mut session.subscription {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending::<Result<ServerMessage, RecvError>>().await,
                }
            } => {
                let outgoing = match event {
                    Ok(ServerMessage::RoomClosed { room_code }) => {
                        session.vacate();
                        Some(ServerMessage::RoomClosed { room_code })
                    }
                    Ok(msg) => Some(msg),
                    Err(RecvError::Lagged(skipped)) => {
                        // Replace the missed events with a fresh snapshot
                        tracing::warn!(
                            "Connection {} lagged by {} events, resyncing",
                            session.connection_id,
                            skipped
                        );
                        match &session.seat {
                            Some(seat) => state
                                .get_room_info(&seat.room_code)
                                .await
                                .map(|room| ServerMessage::RoomInfo { room })
                                .ok(),
                            None => None,
                        }
                    }
                    Err(RecvError::Closed) => {
                        session.vacate();
                        None
                    }
                };
                if let Some(msg) = outgoing.and_then(|msg| encode(None, msg)) {
                    if sender.send(msg).await.is_err() {
                        break;
                    }
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text.as_str());

                        let (reply_to, response) = match serde_json::from_str::<Request>(&text) {
                            Ok(request) => (
                                request.id,
                                handlers::handle_message(request.msg, &mut session, &state).await,
                            ),
                            Err(e) => {
                                tracing::warn!("Failed to parse client message: {}", e);
                                (None, Some(ServerMessage::Error {
                                    code: ErrorCode::ParseError,
                                    msg: format!("Invalid message format: {}", e),
                                }))
                            }
                        };
                        if let Some(msg) = response.and_then(|msg| encode(reply_to, msg)) {
                            if sender.send(msg).await.is_err() {
                                tracing::error!("Failed to send response");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // Hold the seat for the disconnect grace period instead of leaving
    if let Some(seat) = session.vacate() {
        state
            .disconnect(&seat.room_code, &seat.player_name, &session.connection_id)
            .await;
    }
    tracing::info!("WebSocket connection closed: {}", session.connection_id);
}
