//! Error taxonomy shared by the server state machine and the client.
//!
//! Errors cross the wire as string categories ([`ErrorCode`]), never as
//! numeric codes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stable error categories sent in `Error { code, msg }` messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    NameTaken,
    RoomNotFound,
    GameAlreadyInProgress,
    AlreadyAnswered,
    StaleRound,
    TransportError,
    NotHost,
    NotInRoom,
    InvalidSession,
    InvalidName,
    InvalidQuestion,
    InvalidState,
    QuestionUnavailable,
    ParseError,
}

impl ErrorCode {
    /// Protocol conflicts that a client resolves by reconciling state
    /// instead of surfacing them to the user
    pub fn is_benign(self) -> bool {
        matches!(
            self,
            ErrorCode::AlreadyAnswered
                | ErrorCode::StaleRound
                | ErrorCode::GameAlreadyInProgress
                | ErrorCode::NameTaken
        )
    }
}

/// Errors raised by the room registry and the round state machine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoomError {
    #[error("Name '{0}' is already taken in this room")]
    NameTaken(String),

    #[error("Room '{0}' not found")]
    RoomNotFound(String),

    #[error("A round is already in progress")]
    GameAlreadyInProgress,

    #[error("Already answered round {0}")]
    AlreadyAnswered(u32),

    #[error("Round {submitted} is not open (current round is {current})")]
    StaleRound { submitted: u32, current: u32 },

    #[error("Only the host can {0}")]
    NotHost(&'static str),

    #[error("Not a member of this room")]
    NotInRoom,

    #[error("Session token does not match")]
    InvalidSession,

    #[error("Invalid player name: {0}")]
    InvalidName(String),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("No question available: {0}")]
    QuestionUnavailable(String),
}

impl RoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RoomError::NameTaken(_) => ErrorCode::NameTaken,
            RoomError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            RoomError::GameAlreadyInProgress => ErrorCode::GameAlreadyInProgress,
            RoomError::AlreadyAnswered(_) => ErrorCode::AlreadyAnswered,
            RoomError::StaleRound { .. } => ErrorCode::StaleRound,
            RoomError::NotHost(_) => ErrorCode::NotHost,
            RoomError::NotInRoom => ErrorCode::NotInRoom,
            RoomError::InvalidSession => ErrorCode::InvalidSession,
            RoomError::InvalidName(_) => ErrorCode::InvalidName,
            RoomError::InvalidQuestion(_) => ErrorCode::InvalidQuestion,
            RoomError::InvalidState(_) => ErrorCode::InvalidState,
            RoomError::QuestionUnavailable(_) => ErrorCode::QuestionUnavailable,
        }
    }
}

pub type RoomResult<T> = Result<T, RoomError>;

impl From<RoomError> for crate::protocol::ServerMessage {
    fn from(err: RoomError) -> Self {
        crate::protocol::ServerMessage::Error {
            code: err.code(),
            msg: err.to_string(),
        }
    }
}

/// Errors surfaced by the client connection and session driver
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Events are already subscribed for this session")]
    AlreadySubscribed,

    #[error("Server rejected request ({code:?}): {msg}")]
    Rejected { code: ErrorCode, msg: String },

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Failed to encode request: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session is not seated in a room")]
    NotInRoom,
}

impl ClientError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Transport(_) | ClientError::Timeout(_) => {
                Some(ErrorCode::TransportError)
            }
            ClientError::Rejected { code, .. } => Some(*code),
            ClientError::NotInRoom => Some(ErrorCode::NotInRoom),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
