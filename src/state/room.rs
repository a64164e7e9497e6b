//! Authoritative per-room state and its round state machine.
//!
//! Every mutation takes the current time explicitly and pushes the events it
//! produced onto an outbox. The caller holds the room's lock for the whole
//! call and broadcasts the outbox before releasing it, so members see events
//! in exactly the order they were produced.

use chrono::{DateTime, TimeDelta, Utc};

use super::score::{leaderboard, points_for};
use crate::clock;
use crate::config::GameConfig;
use crate::error::{RoomError, RoomResult};
use crate::protocol::{PlayerInfo, RoomSnapshot, RoundResults, ServerMessage, SubmissionRecord};
use crate::types::*;

pub const MAX_NAME_CHARS: usize = 24;

/// Events produced by one state machine step, in order
pub type Outbox = Vec<ServerMessage>;

#[derive(Debug, Clone)]
pub struct Player {
    pub name: PlayerName,
    pub is_host: bool,
    pub score: u32,
    pub answered: bool,
    pub session_token: SessionToken,
    /// Connection currently attached to this seat
    pub connection_id: Option<ConnectionId>,
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Player {
    fn new(name: PlayerName, is_host: bool, connection_id: Option<ConnectionId>) -> Self {
        Self {
            name,
            is_host,
            score: 0,
            answered: false,
            session_token: ulid::Ulid::new().to_string(),
            connection_id,
            disconnected_at: None,
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            name: self.name.clone(),
            is_host: self.is_host,
            score: self.score,
            answered: self.answered,
            connected: self.disconnected_at.is_none(),
        }
    }
}

/// Outcome of an accepted submission
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub round_number: u32,
    pub correct: bool,
    pub points_awarded: u32,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    /// Join order; host promotion walks this order
    pub players: Vec<Player>,
    pub selected_game: Option<GameMode>,
    pub state: RoomState,
    pub round: u32,
    pub config: GameConfig,
    pub current_question: Option<Question>,
    pub question_started_at: Option<DateTime<Utc>>,
    /// Players present when the current round started
    pub round_roster: Vec<PlayerName>,
    /// Accepted submissions for the current round
    pub submissions: Vec<SubmissionRecord>,
    pub last_results: Option<RoundResults>,
    pub emptied_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Room {
    /// Create a room with `host_name` as its sole player
    pub fn new(
        code: RoomCode,
        host_name: &str,
        connection_id: Option<ConnectionId>,
        config: GameConfig,
    ) -> RoomResult<Self> {
        let name = validate_name(host_name)?;
        Ok(Self {
            code,
            players: vec![Player::new(name, true, connection_id)],
            selected_game: None,
            state: RoomState::Lobby,
            round: 0,
            config,
            current_question: None,
            question_started_at: None,
            round_roster: Vec::new(),
            submissions: Vec::new(),
            last_results: None,
            emptied_at: None,
            ended_at: None,
        })
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    fn player_mut(&mut self, name: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.name == name)
    }

    pub fn player_infos(&self) -> Vec<PlayerInfo> {
        self.players.iter().map(Player::info).collect()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let players = self.player_infos();
        RoomSnapshot {
            room_code: self.code.clone(),
            state: self.state,
            host_name: self.host().map(|p| p.name.clone()),
            selected_game: self.selected_game,
            round: self.round,
            max_rounds: self.config.max_rounds,
            round_time_ms: self.config.round_time_ms(),
            current_question: self.current_question.as_ref().map(Question::view),
            question_started_at: self.question_started_at,
            leaderboard: leaderboard(&players),
            players,
            last_results: self.last_results.clone(),
        }
    }

    fn require_host(&self, actor: &str, action: &'static str) -> RoomResult<()> {
        match self.player(actor) {
            Some(p) if p.is_host => Ok(()),
            Some(_) => Err(RoomError::NotHost(action)),
            None => Err(RoomError::NotInRoom),
        }
    }

    /// Hard deadline including the transit allowance
    pub fn round_deadline(&self) -> Option<DateTime<Utc>> {
        let started = self.question_started_at?;
        let grace = TimeDelta::milliseconds(self.config.late_grace.as_millis() as i64);
        Some(clock::deadline(started, self.config.round_time_ms()) + grace)
    }

    fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.round_deadline().is_some_and(|d| now > d)
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Seat a new player. Returns the player's private session token.
    pub fn join(
        &mut self,
        player_name: &str,
        connection_id: Option<ConnectionId>,
        out: &mut Outbox,
    ) -> RoomResult<SessionToken> {
        let name = validate_name(player_name)?;
        if self.player(&name).is_some() {
            return Err(RoomError::NameTaken(name));
        }
        match self.state {
            RoomState::InProgress => return Err(RoomError::GameAlreadyInProgress),
            RoomState::GameOver => {
                return Err(RoomError::InvalidState("The game in this room is over".to_string()))
            }
            _ => {}
        }

        let player = Player::new(name, self.players.is_empty(), connection_id);
        let token = player.session_token.clone();
        tracing::info!("Room {}: {} joined", self.code, player.name);
        self.players.push(player);
        self.emptied_at = None;

        out.push(ServerMessage::PlayerJoined {
            players: self.player_infos(),
        });
        Ok(token)
    }

    /// Reattach a connection to an existing seat
    pub fn resume(
        &mut self,
        player_name: &str,
        session_token: &str,
        connection_id: Option<ConnectionId>,
        out: &mut Outbox,
    ) -> RoomResult<()> {
        let code = self.code.clone();
        let player = self.player_mut(player_name).ok_or(RoomError::NotInRoom)?;
        if player.session_token != session_token {
            return Err(RoomError::InvalidSession);
        }
        let was_disconnected = player.disconnected_at.take().is_some();
        player.connection_id = connection_id;
        tracing::info!("Room {}: {} resumed their session", code, player_name);

        if was_disconnected {
            out.push(ServerMessage::RosterUpdated {
                players: self.player_infos(),
            });
        }
        Ok(())
    }

    /// Mark a seat as disconnected if `connection_id` still owns it.
    /// The seat (and host status) is kept until the disconnect grace runs out.
    pub fn disconnect(
        &mut self,
        player_name: &str,
        connection_id: &str,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) -> bool {
        let Some(player) = self.player_mut(player_name) else {
            return false;
        };
        if player.connection_id.as_deref() != Some(connection_id) {
            // A newer connection already took over this seat
            return false;
        }
        player.connection_id = None;
        player.disconnected_at = Some(now);
        out.push(ServerMessage::RosterUpdated {
            players: self.player_infos(),
        });
        true
    }

    /// Remove a player; promotes the next player in join order if the host left
    pub fn leave(&mut self, player_name: &str, now: DateTime<Utc>, out: &mut Outbox) -> RoomResult<()> {
        let index = self
            .players
            .iter()
            .position(|p| p.name == player_name)
            .ok_or(RoomError::NotInRoom)?;
        let removed = self.players.remove(index);
        self.round_roster.retain(|n| n != player_name);
        tracing::info!("Room {}: {} left", self.code, removed.name);

        out.push(ServerMessage::PlayerLeft {
            player_name: removed.name.clone(),
            players: self.player_infos(),
        });

        if removed.is_host {
            if let Some(next) = self.players.first_mut() {
                next.is_host = true;
                tracing::info!("Room {}: host passed to {}", self.code, next.name);
                out.push(ServerMessage::NewHost {
                    name: next.name.clone(),
                });
            }
        }

        if self.players.is_empty() {
            self.emptied_at = Some(now);
        }

        // The leaver no longer counts towards the denominator
        if self.state == RoomState::InProgress && self.all_answered() {
            self.resolve_round(now, out);
        }
        Ok(())
    }

    /// Drop players whose disconnect grace has run out
    pub fn evict_disconnected(
        &mut self,
        grace: TimeDelta,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) -> Vec<PlayerName> {
        let expired: Vec<PlayerName> = self
            .players
            .iter()
            .filter(|p| p.disconnected_at.is_some_and(|at| now - at >= grace))
            .map(|p| p.name.clone())
            .collect();
        for name in &expired {
            // The name was just read from the roster, so leave cannot miss
            let _ = self.leave(name, now, out);
        }
        expired
    }

    // =========================================================================
    // Round state machine
    // =========================================================================

    fn is_valid_transition(from: RoomState, to: RoomState) -> bool {
        use RoomState::*;

        matches!(
            (from, to),
            (Lobby, GameSelected)
                | (GameSelected, GameSelected)
                | (GameSelected, InProgress)
                | (InProgress, Resolving)
                | (Resolving, InProgress)
                | (Resolving, GameOver)
                | (Lobby, GameOver)
                | (GameSelected, GameOver)
                | (InProgress, GameOver)
        )
    }

    fn transition(&mut self, to: RoomState) -> RoomResult<()> {
        if !Self::is_valid_transition(self.state, to) {
            return Err(RoomError::InvalidState(format!(
                "Invalid transition from {:?} to {:?}",
                self.state, to
            )));
        }
        tracing::debug!("Room {}: {:?} -> {:?}", self.code, self.state, to);
        self.state = to;
        Ok(())
    }

    /// Any seated player may pick the game while the room is still waiting
    pub fn select_game(&mut self, actor: &str, mode: GameMode, out: &mut Outbox) -> RoomResult<()> {
        if self.player(actor).is_none() {
            return Err(RoomError::NotInRoom);
        }
        self.transition(RoomState::GameSelected)?;
        self.selected_game = Some(mode);
        tracing::info!("Room {}: game {:?} selected", self.code, mode);
        out.push(ServerMessage::GameSelected { game_id: mode });
        Ok(())
    }

    /// Start round 1. Only valid right after a game was selected.
    pub fn start_game(
        &mut self,
        actor: &str,
        question: Question,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) -> RoomResult<()> {
        self.require_host(actor, "start the game")?;
        match self.state {
            RoomState::GameSelected => self.begin_round(question, now, out),
            RoomState::InProgress | RoomState::Resolving => Err(RoomError::GameAlreadyInProgress),
            _ => Err(RoomError::InvalidState(format!(
                "Cannot start a game from {:?}",
                self.state
            ))),
        }
    }

    /// Advance to the next round (or start the first one)
    pub fn send_next_question(
        &mut self,
        actor: &str,
        question: Question,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) -> RoomResult<()> {
        self.require_host(actor, "advance rounds")?;
        match self.state {
            RoomState::GameSelected | RoomState::Resolving => self.begin_round(question, now, out),
            RoomState::InProgress => Err(RoomError::GameAlreadyInProgress),
            _ => Err(RoomError::InvalidState(format!(
                "Cannot send a question from {:?}",
                self.state
            ))),
        }
    }

    /// Checks a host action would succeed before any question is generated
    pub fn can_advance(&self, actor: &str) -> RoomResult<GameMode> {
        self.require_host(actor, "advance rounds")?;
        match self.state {
            RoomState::GameSelected | RoomState::Resolving => {}
            RoomState::InProgress => return Err(RoomError::GameAlreadyInProgress),
            _ => {
                return Err(RoomError::InvalidState(format!(
                    "Cannot send a question from {:?}",
                    self.state
                )))
            }
        }
        self.selected_game
            .ok_or_else(|| RoomError::InvalidState("No game selected".to_string()))
    }

    fn begin_round(&mut self, question: Question, now: DateTime<Utc>, out: &mut Outbox) -> RoomResult<()> {
        let mode = self
            .selected_game
            .ok_or_else(|| RoomError::InvalidState("No game selected".to_string()))?;
        if question.mode() != mode {
            return Err(RoomError::InvalidQuestion(format!(
                "Room is playing {:?}, question is {:?}",
                mode,
                question.mode()
            )));
        }
        question.validate().map_err(RoomError::InvalidQuestion)?;
        if self.round >= self.config.max_rounds {
            return Err(RoomError::InvalidState("All rounds have been played".to_string()));
        }
        self.transition(RoomState::InProgress)?;

        self.round += 1;
        self.question_started_at = Some(now);
        let view = question.view();
        self.current_question = Some(question);
        self.submissions.clear();
        self.round_roster = self.players.iter().map(|p| p.name.clone()).collect();
        for player in &mut self.players {
            player.answered = false;
        }
        tracing::info!("Room {}: round {} started", self.code, self.round);

        let round_time_ms = self.config.round_time_ms();
        if self.round == 1 {
            out.push(ServerMessage::GameStarted {
                game_id: mode,
                round: self.round,
                current_question: view,
                question_started_at: now,
                round_time_ms,
            });
        } else {
            out.push(ServerMessage::Question {
                round: self.round,
                current_question: view,
                question_started_at: now,
                round_time_ms,
            });
        }
        Ok(())
    }

    /// Accept at most one submission per player per round. Scoring uses the
    /// server's clock against `question_started_at`; `time_taken_ms` from the
    /// client is recorded for display only.
    pub fn submit_answer(
        &mut self,
        player_name: &str,
        round_number: u32,
        answer: Answer,
        time_taken_ms: u64,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) -> RoomResult<Scored> {
        if self.player(player_name).is_none() {
            return Err(RoomError::NotInRoom);
        }
        let stale = RoomError::StaleRound {
            submitted: round_number,
            current: self.round,
        };
        if round_number != self.round || self.state != RoomState::InProgress {
            return Err(stale);
        }
        if self.deadline_passed(now) {
            self.resolve_round(now, out);
            return Err(stale);
        }
        if !self.round_roster.iter().any(|n| n == player_name) {
            return Err(stale);
        }
        if self.submissions.iter().any(|s| s.player_name == player_name) {
            return Err(RoomError::AlreadyAnswered(round_number));
        }
        let (correct, started_at) = match (&self.current_question, self.question_started_at) {
            (Some(q), Some(at)) => (q.is_correct(&answer), at),
            _ => return Err(RoomError::InvalidState("No active question".to_string())),
        };

        // Inside the late grace the budget is already spent: recorded, but
        // scored like no answer
        let budget_ms = self.config.round_time_ms();
        let timed_out = now > clock::deadline(started_at, budget_ms);
        let correct = correct && !timed_out;
        let fraction = clock::remaining_fraction(started_at, budget_ms, now);
        let points_awarded = points_for(
            correct,
            fraction,
            self.config.base_points,
            self.config.speed_bonus_cap,
        );

        self.submissions.push(SubmissionRecord {
            player_name: player_name.to_string(),
            round_number,
            answer,
            time_taken_ms,
            correct,
            points_awarded,
            timed_out,
        });
        if let Some(player) = self.player_mut(player_name) {
            player.answered = true;
            player.score = player.score.saturating_add(points_awarded);
        }
        tracing::debug!(
            "Room {}: {} answered round {} (correct: {}, +{})",
            self.code,
            player_name,
            round_number,
            correct,
            points_awarded
        );

        out.push(ServerMessage::ScoreUpdated {
            round: self.round,
            players: self.player_infos(),
        });

        if self.all_answered() {
            self.resolve_round(now, out);
        }

        Ok(Scored {
            round_number,
            correct,
            points_awarded,
        })
    }

    /// Every player present at round start (and still here) has answered
    fn all_answered(&self) -> bool {
        self.round_roster
            .iter()
            .all(|name| self.submissions.iter().any(|s| &s.player_name == name))
    }

    /// Resolve the round if its time budget has run out. Returns whether it did.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>, out: &mut Outbox) -> bool {
        if self.state == RoomState::InProgress && self.deadline_passed(now) {
            tracing::info!("Room {}: round {} timed out", self.code, self.round);
            self.resolve_round(now, out);
            return true;
        }
        false
    }

    /// Close the current round: auto-score missing players, publish results,
    /// and end the game after the final round.
    fn resolve_round(&mut self, now: DateTime<Utc>, out: &mut Outbox) {
        let round_time_ms = self.config.round_time_ms();
        let missing: Vec<PlayerName> = self
            .round_roster
            .iter()
            .filter(|name| !self.submissions.iter().any(|s| &s.player_name == *name))
            .cloned()
            .collect();
        for name in missing {
            self.submissions.push(SubmissionRecord {
                player_name: name.clone(),
                round_number: self.round,
                answer: Answer::NoAnswer,
                time_taken_ms: round_time_ms,
                correct: false,
                points_awarded: 0,
                timed_out: true,
            });
            if let Some(player) = self.player_mut(&name) {
                player.answered = true;
            }
        }

        if self.transition(RoomState::Resolving).is_err() {
            return;
        }

        let correct_answer = self
            .current_question
            .as_ref()
            .map(Question::correct_answer)
            .unwrap_or(Answer::NoAnswer);
        let results = RoundResults {
            round: self.round,
            correct_answer,
            submissions: self.submissions.clone(),
        };
        self.last_results = Some(results.clone());
        tracing::info!(
            "Room {}: round {} resolved with {} submissions",
            self.code,
            self.round,
            results.submissions.len()
        );
        out.push(ServerMessage::AllAnswered {
            results,
            leaderboard: leaderboard(&self.player_infos()),
        });

        if self.round >= self.config.max_rounds {
            self.finish(now, out);
        }
    }

    pub fn end_game(&mut self, actor: &str, now: DateTime<Utc>, out: &mut Outbox) -> RoomResult<()> {
        self.require_host(actor, "end the game")?;
        if self.state == RoomState::GameOver {
            return Err(RoomError::InvalidState("Game is already over".to_string()));
        }
        self.finish(now, out);
        Ok(())
    }

    fn finish(&mut self, now: DateTime<Utc>, out: &mut Outbox) {
        if self.transition(RoomState::GameOver).is_err() {
            return;
        }
        self.ended_at = Some(now);
        tracing::info!("Room {}: game over after round {}", self.code, self.round);
        out.push(ServerMessage::GameOver {
            leaderboard: leaderboard(&self.player_infos()),
        });
    }

    /// Whether the janitor may drop this room
    pub fn is_collectable(&self, idle_grace: TimeDelta, now: DateTime<Utc>) -> bool {
        let empty_long_enough = self.emptied_at.is_some_and(|at| now - at >= idle_grace);
        let ended_long_enough = self.ended_at.is_some_and(|at| now - at >= idle_grace);
        (self.players.is_empty() && empty_long_enough) || ended_long_enough
    }
}

/// Trim and bound a display name
pub fn validate_name(name: &str) -> RoomResult<PlayerName> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(RoomError::InvalidName("name cannot be empty".to_string()));
    }
    if trimmed.chars().count() > MAX_NAME_CHARS {
        return Err(RoomError::InvalidName(format!(
            "name cannot exceed {} characters",
            MAX_NAME_CHARS
        )));
    }
    Ok(trimmed.to_string())
}
