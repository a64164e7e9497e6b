//! Client-side mirror of a room's round state.
//!
//! The controller never decides anything on its own: every field comes from
//! a server event or a rehydration snapshot, and the countdown is always
//! recomputed from the authoritative `question_started_at`.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

use crate::clock;
use crate::protocol::{ClientMessage, LeaderboardEntry, PlayerInfo, RoomSnapshot, RoundResults, ServerMessage};
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    /// Not in a room
    Detached,
    Lobby,
    GameSelected,
    /// A question is open and this player has not answered
    Answering,
    /// Answered (or spectating) and waiting for the round to resolve
    Waiting,
    Results,
    GameOver,
}

#[derive(Debug, Clone)]
pub struct RoundController {
    pub me: PlayerName,
    pub room_code: Option<RoomCode>,
    pub phase: ClientPhase,
    pub round: u32,
    pub max_rounds: u32,
    pub selected_game: Option<GameMode>,
    pub question: Option<QuestionView>,
    pub question_started_at: Option<DateTime<Utc>>,
    pub round_time_ms: u64,
    pub players: Vec<PlayerInfo>,
    pub leaderboard: Vec<LeaderboardEntry>,
    pub last_results: Option<RoundResults>,
    /// Round this client already sent an answer for
    submitted_round: Option<u32>,
    /// Server clock minus local clock, learned from `Welcome`
    clock_offset: TimeDelta,
}

impl RoundController {
    pub fn new(me: impl Into<PlayerName>) -> Self {
        Self {
            me: me.into(),
            room_code: None,
            phase: ClientPhase::Detached,
            round: 0,
            max_rounds: 0,
            selected_game: None,
            question: None,
            question_started_at: None,
            round_time_ms: 0,
            players: Vec::new(),
            leaderboard: Vec::new(),
            last_results: None,
            submitted_round: None,
            clock_offset: TimeDelta::zero(),
        }
    }

    /// Align countdowns with the server's clock
    pub fn set_clock_offset(&mut self, offset: TimeDelta) {
        self.clock_offset = offset;
    }

    fn server_now(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.clock_offset
    }

    pub fn is_host(&self) -> bool {
        self.players.iter().any(|p| p.name == self.me && p.is_host)
    }

    pub fn has_submitted(&self) -> bool {
        self.submitted_round == Some(self.round)
    }

    /// Replace the local view with an authoritative snapshot
    pub fn rehydrate(&mut self, room: &RoomSnapshot) {
        self.room_code = Some(room.room_code.clone());
        self.round = room.round;
        self.max_rounds = room.max_rounds;
        self.selected_game = room.selected_game;
        self.question = room.current_question.clone();
        self.question_started_at = room.question_started_at;
        self.round_time_ms = room.round_time_ms;
        self.players = room.players.clone();
        self.leaderboard = room.leaderboard.clone();
        self.last_results = room.last_results.clone();

        let me = room.player(&self.me);
        self.submitted_round = match me {
            Some(p) if p.answered => Some(room.round),
            _ => None,
        };
        self.phase = match room.state {
            RoomState::Lobby => ClientPhase::Lobby,
            RoomState::GameSelected => ClientPhase::GameSelected,
            // Not seated, or joined after the round started
            RoomState::InProgress if me.is_none() || me.is_some_and(|p| p.answered) => {
                ClientPhase::Waiting
            }
            RoomState::InProgress => ClientPhase::Answering,
            RoomState::Resolving => ClientPhase::Results,
            RoomState::GameOver => ClientPhase::GameOver,
        };
    }

    /// Apply one server event. Returns whether the local view changed.
    /// Events for rounds older than the current one are ignored.
    pub fn apply(&mut self, msg: &ServerMessage) -> bool {
        match msg {
            ServerMessage::RoomCreated {
                room_code, players, ..
            } => {
                self.room_code = Some(room_code.clone());
                self.players = players.clone();
                self.phase = ClientPhase::Lobby;
            }
            ServerMessage::RoomJoined { room, .. }
            | ServerMessage::SessionResumed { room }
            | ServerMessage::RoomInfo { room } => self.rehydrate(room),
            ServerMessage::PlayerJoined { players }
            | ServerMessage::PlayerLeft { players, .. }
            | ServerMessage::RosterUpdated { players } => self.players = players.clone(),
            ServerMessage::NewHost { name } => {
                for player in &mut self.players {
                    player.is_host = &player.name == name;
                }
            }
            ServerMessage::GameSelected { game_id } => {
                self.selected_game = Some(*game_id);
                if matches!(self.phase, ClientPhase::Lobby | ClientPhase::GameSelected) {
                    self.phase = ClientPhase::GameSelected;
                }
            }
            ServerMessage::GameStarted {
                game_id,
                round,
                current_question,
                question_started_at,
                round_time_ms,
            } => {
                self.selected_game = Some(*game_id);
                return self.open_round(*round, current_question, *question_started_at, *round_time_ms);
            }
            ServerMessage::Question {
                round,
                current_question,
                question_started_at,
                round_time_ms,
            } => {
                return self.open_round(*round, current_question, *question_started_at, *round_time_ms);
            }
            ServerMessage::AnswerAccepted { round_number, .. } => {
                if *round_number != self.round {
                    return false;
                }
                self.submitted_round = Some(*round_number);
                if self.phase == ClientPhase::Answering {
                    self.phase = ClientPhase::Waiting;
                }
            }
            ServerMessage::ScoreUpdated { round, players } => {
                if *round != self.round {
                    return false;
                }
                self.players = players.clone();
            }
            ServerMessage::AllAnswered {
                results,
                leaderboard,
            } => {
                if results.round != self.round {
                    return false;
                }
                self.last_results = Some(results.clone());
                self.leaderboard = leaderboard.clone();
                self.submitted_round = Some(results.round);
                for player in &mut self.players {
                    player.answered = true;
                    if let Some(entry) = leaderboard.iter().find(|e| e.name == player.name) {
                        player.score = entry.score;
                    }
                }
                if self.phase != ClientPhase::GameOver {
                    self.phase = ClientPhase::Results;
                }
            }
            ServerMessage::GameOver { leaderboard } => {
                self.leaderboard = leaderboard.clone();
                self.phase = ClientPhase::GameOver;
            }
            ServerMessage::LeftRoom | ServerMessage::RoomClosed { .. } => {
                let offset = self.clock_offset;
                *self = Self::new(self.me.clone());
                self.clock_offset = offset;
            }
            ServerMessage::Welcome { .. } | ServerMessage::Error { .. } => return false,
        }
        true
    }

    fn open_round(
        &mut self,
        round: u32,
        question: &QuestionView,
        started_at: DateTime<Utc>,
        round_time_ms: u64,
    ) -> bool {
        // Stale, or a duplicate of the round already showing
        if round < self.round || (round == self.round && self.question_started_at == Some(started_at)) {
            return false;
        }
        self.round = round;
        self.question = Some(question.clone());
        self.question_started_at = Some(started_at);
        self.round_time_ms = round_time_ms;
        self.submitted_round = None;
        for player in &mut self.players {
            player.answered = false;
        }
        // A new question cancels any waiting-for-results state
        self.phase = if self.players.iter().any(|p| p.name == self.me) {
            ClientPhase::Answering
        } else {
            ClientPhase::Waiting
        };
        true
    }

    /// Countdown derived from the authoritative start time
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        match (self.phase, self.question_started_at) {
            (ClientPhase::Answering | ClientPhase::Waiting, Some(started)) => {
                clock::remaining(started, self.round_time_ms, self.server_now(now))
            }
            _ => Duration::ZERO,
        }
    }

    /// Build the submit message for the open round, at most once per round.
    /// `None` when there is nothing to answer.
    pub fn prepare_submission(&mut self, answer: Answer, now: DateTime<Utc>) -> Option<ClientMessage> {
        if self.phase != ClientPhase::Answering || self.has_submitted() {
            return None;
        }
        let room_code = self.room_code.clone()?;
        let started = self.question_started_at?;
        let time_taken_ms = clock::elapsed_ms(started, self.server_now(now)).min(self.round_time_ms);

        self.submitted_round = Some(self.round);
        self.phase = ClientPhase::Waiting;
        Some(ClientMessage::submit(room_code, self.round, answer, time_taken_ms))
    }

    /// The no-answer sentinel, once the countdown has run out
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<ClientMessage> {
        if self.phase == ClientPhase::Answering && self.remaining(now).is_zero() {
            return self.prepare_submission(Answer::NoAnswer, now);
        }
        None
    }

    /// Undo a local submission the server never recorded
    pub fn retract_submission(&mut self) {
        if self.has_submitted() {
            self.submitted_round = None;
            if self.phase == ClientPhase::Waiting {
                self.phase = ClientPhase::Answering;
            }
        }
    }
}
