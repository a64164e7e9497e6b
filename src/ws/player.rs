//! Membership and answer handlers

use crate::error::RoomError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::*;
use std::sync::Arc;

use super::{Seat, Session};

/// Give up the current seat before taking another one
async fn leave_current(state: &AppState, session: &mut Session) {
    if let Some(seat) = session.vacate() {
        if let Err(e) = state.leave_room(&seat.room_code, &seat.player_name).await {
            tracing::debug!("Leaving {} on switch: {}", seat.room_code, e);
        }
    }
}

pub async fn handle_create_room(
    state: &Arc<AppState>,
    session: &mut Session,
    host_name: PlayerName,
) -> Option<ServerMessage> {
    leave_current(state, session).await;
    match state
        .create_room(&host_name, Some(session.connection_id.clone()))
        .await
    {
        Ok(membership) => {
            let reply = ServerMessage::RoomCreated {
                room_code: membership.room_code.clone(),
                session_token: membership.session_token.clone(),
                players: membership.room.players.clone(),
            };
            session.enter(membership);
            Some(reply)
        }
        Err(e) => {
            tracing::warn!("Create room failed: {}", e);
            Some(e.into())
        }
    }
}

pub async fn handle_join_room(
    state: &Arc<AppState>,
    session: &mut Session,
    room_code: RoomCode,
    player_name: PlayerName,
) -> Option<ServerMessage> {
    // A retried join from the seat's own connection is not a name clash
    if let Some(seat) = session.seat_in(&room_code).cloned() {
        if seat.player_name == player_name.trim() {
            return Some(match state.get_room_info(&seat.room_code).await {
                Ok(room) => ServerMessage::RoomJoined {
                    session_token: seat.session_token,
                    room,
                },
                Err(e) => e.into(),
            });
        }
    }

    leave_current(state, session).await;
    match state
        .join_room(&room_code, &player_name, Some(session.connection_id.clone()))
        .await
    {
        Ok(membership) => {
            let reply = ServerMessage::RoomJoined {
                session_token: membership.session_token.clone(),
                room: membership.room.clone(),
            };
            session.enter(membership);
            Some(reply)
        }
        Err(e) => {
            tracing::warn!("Join {} as {} failed: {}", room_code, player_name, e);
            Some(e.into())
        }
    }
}

pub async fn handle_resume_session(
    state: &Arc<AppState>,
    session: &mut Session,
    room_code: RoomCode,
    player_name: PlayerName,
    session_token: SessionToken,
) -> Option<ServerMessage> {
    if session.seat_in(&room_code).is_none() {
        leave_current(state, session).await;
    }
    match state
        .resume_session(
            &room_code,
            &player_name,
            &session_token,
            Some(session.connection_id.clone()),
        )
        .await
    {
        Ok(membership) => {
            let room = membership.room.clone();
            session.enter(membership);
            Some(ServerMessage::SessionResumed { room })
        }
        Err(e) => {
            tracing::warn!("Resume {} as {} failed: {}", room_code, player_name, e);
            Some(e.into())
        }
    }
}

pub async fn handle_leave_room(
    state: &Arc<AppState>,
    session: &mut Session,
    seat: Seat,
) -> Option<ServerMessage> {
    session.vacate();
    match state.leave_room(&seat.room_code, &seat.player_name).await {
        // Already gone (evicted or room closed) counts as left
        Ok(()) | Err(RoomError::NotInRoom) | Err(RoomError::RoomNotFound(_)) => {
            Some(ServerMessage::LeftRoom)
        }
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_get_room_info(
    state: &Arc<AppState>,
    room_code: RoomCode,
) -> Option<ServerMessage> {
    match state.get_room_info(&room_code).await {
        Ok(room) => Some(ServerMessage::RoomInfo { room }),
        Err(e) => Some(e.into()),
    }
}

pub async fn handle_submit(
    state: &Arc<AppState>,
    seat: Seat,
    round_number: u32,
    answer: Answer,
    time_taken_ms: u64,
) -> Option<ServerMessage> {
    match state
        .submit_answer(
            &seat.room_code,
            &seat.player_name,
            round_number,
            answer,
            time_taken_ms,
        )
        .await
    {
        Ok(scored) => Some(ServerMessage::AnswerAccepted {
            round_number: scored.round_number,
            correct: scored.correct,
            points_awarded: scored.points_awarded,
        }),
        Err(e) => {
            tracing::debug!("Submission from {} rejected: {}", seat.player_name, e);
            Some(e.into())
        }
    }
}
