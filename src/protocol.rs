use crate::error::ErrorCode;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom {
        host_name: PlayerName,
    },
    JoinRoom {
        room_code: RoomCode,
        player_name: PlayerName,
    },
    /// Reattach a new connection to an existing seat after transport loss
    ResumeSession {
        room_code: RoomCode,
        player_name: PlayerName,
        session_token: SessionToken,
    },
    LeaveRoom {
        room_code: RoomCode,
    },
    SelectGame {
        room_code: RoomCode,
        game_id: GameMode,
    },
    // Host-only messages
    StartGame {
        room_code: RoomCode,
        #[serde(default)]
        question: Option<Question>,
    },
    SendQuestionToRoom {
        room_code: RoomCode,
        #[serde(default)]
        question: Option<Question>,
    },
    EndGame {
        room_code: RoomCode,
    },
    SubmitAnswer {
        room_code: RoomCode,
        round_number: u32,
        /// `None` is the "no answer" sentinel
        value: Option<u32>,
        time_taken_ms: u64,
    },
    SubmitCompareAnswer {
        room_code: RoomCode,
        round_number: u32,
        side: Option<Side>,
        time_taken_ms: u64,
    },
    /// Rehydration query; read-only on the server
    GetRoomInfo {
        room_code: RoomCode,
    },
}

impl ClientMessage {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::CreateRoom { .. } => "create_room",
            ClientMessage::JoinRoom { .. } => "join_room",
            ClientMessage::ResumeSession { .. } => "resume_session",
            ClientMessage::LeaveRoom { .. } => "leave_room",
            ClientMessage::SelectGame { .. } => "select_game",
            ClientMessage::StartGame { .. } => "start_game",
            ClientMessage::SendQuestionToRoom { .. } => "send_question_to_room",
            ClientMessage::EndGame { .. } => "end_game",
            ClientMessage::SubmitAnswer { .. } => "submit_answer",
            ClientMessage::SubmitCompareAnswer { .. } => "submit_compare_answer",
            ClientMessage::GetRoomInfo { .. } => "get_room_info",
        }
    }

    /// Build the right submit message for an [`Answer`]
    pub fn submit(room_code: RoomCode, round_number: u32, answer: Answer, time_taken_ms: u64) -> Self {
        match answer {
            Answer::Side(side) => ClientMessage::SubmitCompareAnswer {
                room_code,
                round_number,
                side: Some(side),
                time_taken_ms,
            },
            Answer::Value(value) => ClientMessage::SubmitAnswer {
                room_code,
                round_number,
                value: Some(value),
                time_taken_ms,
            },
            Answer::NoAnswer => ClientMessage::SubmitAnswer {
                room_code,
                round_number,
                value: None,
                time_taken_ms,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: DateTime<Utc>,
    },
    RoomCreated {
        room_code: RoomCode,
        session_token: SessionToken,
        players: Vec<PlayerInfo>,
    },
    RoomJoined {
        session_token: SessionToken,
        room: RoomSnapshot,
    },
    SessionResumed {
        room: RoomSnapshot,
    },
    /// Broadcast when a player takes a seat
    PlayerJoined {
        players: Vec<PlayerInfo>,
    },
    LeftRoom,
    PlayerLeft {
        player_name: PlayerName,
        players: Vec<PlayerInfo>,
    },
    NewHost {
        name: PlayerName,
    },
    /// Broadcast when a player's connection drops or comes back
    RosterUpdated {
        players: Vec<PlayerInfo>,
    },
    GameSelected {
        game_id: GameMode,
    },
    GameStarted {
        game_id: GameMode,
        round: u32,
        current_question: QuestionView,
        question_started_at: DateTime<Utc>,
        round_time_ms: u64,
    },
    Question {
        round: u32,
        current_question: QuestionView,
        question_started_at: DateTime<Utc>,
        round_time_ms: u64,
    },
    /// Direct reply to the submitting player
    AnswerAccepted {
        round_number: u32,
        correct: bool,
        points_awarded: u32,
    },
    ScoreUpdated {
        round: u32,
        players: Vec<PlayerInfo>,
    },
    AllAnswered {
        results: RoundResults,
        leaderboard: Vec<LeaderboardEntry>,
    },
    GameOver {
        leaderboard: Vec<LeaderboardEntry>,
    },
    RoomInfo {
        room: RoomSnapshot,
    },
    RoomClosed {
        room_code: RoomCode,
    },
    Error {
        code: ErrorCode,
        msg: String,
    },
}

/// Request frame: an optional correlation id plus the message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub msg: ClientMessage,
}

/// Reply frame: `reply_to` echoes the request id, broadcasts carry none
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<u64>,
    #[serde(flatten)]
    pub msg: ServerMessage,
}

/// Public view of a player
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerInfo {
    pub name: PlayerName,
    pub is_host: bool,
    pub score: u32,
    pub answered: bool,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub player_name: PlayerName,
    pub round_number: u32,
    pub answer: Answer,
    pub time_taken_ms: u64,
    pub correct: bool,
    pub points_awarded: u32,
    /// Recorded by the server when the time budget ran out
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundResults {
    pub round: u32,
    pub correct_answer: Answer,
    pub submissions: Vec<SubmissionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub name: PlayerName,
    pub score: u32,
}

/// Everything a client needs to rebuild its view of a room.
/// Contains no "now" so identical state serializes identically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSnapshot {
    pub room_code: RoomCode,
    pub state: RoomState,
    pub host_name: Option<PlayerName>,
    pub selected_game: Option<GameMode>,
    pub round: u32,
    pub max_rounds: u32,
    pub round_time_ms: u64,
    pub current_question: Option<QuestionView>,
    pub question_started_at: Option<DateTime<Utc>>,
    pub players: Vec<PlayerInfo>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub last_results: Option<RoundResults>,
}

impl RoomSnapshot {
    pub fn player(&self, name: &str) -> Option<&PlayerInfo> {
        self.players.iter().find(|p| p.name == name)
    }
}
