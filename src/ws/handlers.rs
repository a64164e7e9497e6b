//! WebSocket message dispatch
//!
//! This module provides the main entry point for handling client messages.
//! Room membership is checked here, then dispatched to the membership
//! handlers in `player` or the game-control handlers in `host`.

use crate::error::ErrorCode;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::Answer;
use std::sync::Arc;

use super::{host, player, Session};

/// Macro to resolve the caller's seat in a room and return early if the
/// connection does not sit there
macro_rules! require_seat {
    ($session:expr, $room_code:expr) => {
        match $session.seat_in(&$room_code) {
            Some(seat) => seat.clone(),
            None => {
                return Some(ServerMessage::Error {
                    code: ErrorCode::NotInRoom,
                    msg: format!("Not a member of room {}", $room_code),
                })
            }
        }
    };
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut Session,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    tracing::debug!("{} from {}", msg.kind(), session.connection_id);

    match msg {
        // Membership
        ClientMessage::CreateRoom { host_name } => {
            player::handle_create_room(state, session, host_name).await
        }

        ClientMessage::JoinRoom {
            room_code,
            player_name,
        } => player::handle_join_room(state, session, room_code, player_name).await,

        ClientMessage::ResumeSession {
            room_code,
            player_name,
            session_token,
        } => {
            player::handle_resume_session(state, session, room_code, player_name, session_token)
                .await
        }

        ClientMessage::LeaveRoom { room_code } => {
            let seat = require_seat!(session, room_code);
            player::handle_leave_room(state, session, seat).await
        }

        ClientMessage::GetRoomInfo { room_code } => {
            player::handle_get_room_info(state, room_code).await
        }

        // Answers
        ClientMessage::SubmitAnswer {
            room_code,
            round_number,
            value,
            time_taken_ms,
        } => {
            let seat = require_seat!(session, room_code);
            let answer = value.map(Answer::Value).unwrap_or(Answer::NoAnswer);
            player::handle_submit(state, seat, round_number, answer, time_taken_ms).await
        }

        ClientMessage::SubmitCompareAnswer {
            room_code,
            round_number,
            side,
            time_taken_ms,
        } => {
            let seat = require_seat!(session, room_code);
            let answer = side.map(Answer::Side).unwrap_or(Answer::NoAnswer);
            player::handle_submit(state, seat, round_number, answer, time_taken_ms).await
        }

        // Game control (host authority is enforced by the room itself)
        ClientMessage::SelectGame { room_code, game_id } => {
            let seat = require_seat!(session, room_code);
            host::handle_select_game(state, seat, game_id).await
        }

        ClientMessage::StartGame {
            room_code,
            question,
        } => {
            let seat = require_seat!(session, room_code);
            host::handle_start_game(state, seat, question).await
        }

        ClientMessage::SendQuestionToRoom {
            room_code,
            question,
        } => {
            let seat = require_seat!(session, room_code);
            host::handle_next_question(state, seat, question).await
        }

        ClientMessage::EndGame { room_code } => {
            let seat = require_seat!(session, room_code);
            host::handle_end_game(state, seat).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn create(name: &str) -> ClientMessage {
        ClientMessage::CreateRoom {
            host_name: name.to_string(),
        }
    }

    async fn host_room(state: &Arc<AppState>) -> (Session, String) {
        let mut session = Session::new();
        match handle_message(create("Ash"), &mut session, state).await {
            Some(ServerMessage::RoomCreated { room_code, .. }) => (session, room_code),
            other => panic!("Expected RoomCreated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_room_seats_host() {
        let state = Arc::new(AppState::default());
        let (session, code) = host_room(&state).await;
        assert!(session.seat_in(&code).is_some());
        assert!(session.seat_in(&code.to_lowercase()).is_some());
        assert!(session.subscription.is_some());
    }

    #[tokio::test]
    async fn test_non_member_rejected() {
        let state = Arc::new(AppState::default());
        let (_host, code) = host_room(&state).await;
        let mut outsider = Session::new();

        let msg = ClientMessage::StartGame {
            room_code: code,
            question: None,
        };
        let response = handle_message(msg, &mut outsider, &state).await;
        assert!(matches!(
            response,
            Some(ServerMessage::Error {
                code: ErrorCode::NotInRoom,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_repeated_join_is_answered_idempotently() {
        let state = Arc::new(AppState::default());
        let (_host, code) = host_room(&state).await;
        let mut misty = Session::new();
        let join = ClientMessage::JoinRoom {
            room_code: code.clone(),
            player_name: "Misty".to_string(),
        };

        let first = handle_message(join.clone(), &mut misty, &state).await;
        let Some(ServerMessage::RoomJoined { session_token, .. }) = first else {
            panic!("Expected RoomJoined on first join");
        };
        let second = handle_message(join, &mut misty, &state).await;
        let Some(ServerMessage::RoomJoined {
            session_token: again,
            room,
        }) = second
        else {
            panic!("Expected RoomJoined on repeated join");
        };
        assert_eq!(session_token, again);
        assert_eq!(room.players.len(), 2);
    }

    #[tokio::test]
    async fn test_non_host_start_rejected() {
        let state = Arc::new(AppState::default());
        let (mut host, code) = host_room(&state).await;
        let mut misty = Session::new();
        handle_message(
            ClientMessage::JoinRoom {
                room_code: code.clone(),
                player_name: "Misty".to_string(),
            },
            &mut misty,
            &state,
        )
        .await;
        handle_message(
            ClientMessage::SelectGame {
                room_code: code.clone(),
                game_id: GameMode::StatGuess,
            },
            &mut host,
            &state,
        )
        .await;

        let response = handle_message(
            ClientMessage::StartGame {
                room_code: code.clone(),
                question: None,
            },
            &mut misty,
            &state,
        )
        .await;
        assert!(matches!(
            response,
            Some(ServerMessage::Error {
                code: ErrorCode::NotHost,
                ..
            })
        ));
        let info = state.get_room_info(&code).await.unwrap();
        assert_eq!(info.state, RoomState::GameSelected);
    }

    #[tokio::test]
    async fn test_no_answer_sentinel_maps_to_no_answer() {
        let state = Arc::new(AppState::default());
        let (mut host, code) = host_room(&state).await;
        handle_message(
            ClientMessage::SelectGame {
                room_code: code.clone(),
                game_id: GameMode::StatGuess,
            },
            &mut host,
            &state,
        )
        .await;
        handle_message(
            ClientMessage::StartGame {
                room_code: code.clone(),
                question: None,
            },
            &mut host,
            &state,
        )
        .await;

        let response = handle_message(
            ClientMessage::SubmitAnswer {
                room_code: code.clone(),
                round_number: 1,
                value: None,
                time_taken_ms: 20_000,
            },
            &mut host,
            &state,
        )
        .await;
        assert!(matches!(
            response,
            Some(ServerMessage::AnswerAccepted {
                correct: false,
                points_awarded: 0,
                ..
            })
        ));
        let info = state.get_room_info(&code).await.unwrap();
        let results = info.last_results.unwrap();
        assert_eq!(results.submissions[0].answer, Answer::NoAnswer);
    }
}
