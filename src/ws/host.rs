//! Game control handlers. Each replies with the resulting room snapshot;
//! the state change itself reaches every member as a broadcast.

use crate::error::RoomResult;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;

use super::Seat;

async fn reply(state: &AppState, seat: &Seat, result: RoomResult<()>) -> Option<ServerMessage> {
    if let Err(e) = result {
        tracing::warn!("{} in {}: {}", seat.player_name, seat.room_code, e);
        return Some(e.into());
    }
    match state.get_room_info(&seat.room_code).await {
        Ok(room) => Some(ServerMessage::RoomInfo { room }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_select_game(
    state: &Arc<AppState>,
    seat: Seat,
    mode: GameMode,
) -> Option<ServerMessage> {
    let result = state
        .select_game(&seat.room_code, &seat.player_name, mode)
        .await;
    reply(state, &seat, result).await
}

pub async fn handle_start_game(
    state: &Arc<AppState>,
    seat: Seat,
    question: Option<Question>,
) -> Option<ServerMessage> {
    let result = state
        .start_game(&seat.room_code, &seat.player_name, question)
        .await;
    reply(state, &seat, result).await
}

pub async fn handle_next_question(
    state: &Arc<AppState>,
    seat: Seat,
    question: Option<Question>,
) -> Option<ServerMessage> {
    let result = state
        .send_next_question(&seat.room_code, &seat.player_name, question)
        .await;
    reply(state, &seat, result).await
}

pub async fn handle_end_game(state: &Arc<AppState>, seat: Seat) -> Option<ServerMessage> {
    let result = state.end_game(&seat.room_code, &seat.player_name).await;
    reply(state, &seat, result).await
}
