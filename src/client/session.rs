//! Session driver: one seat, one subscription, one controller.
//!
//! `RoundSession` turns the raw connection into the flow a game screen
//! needs. It applies every event to its [`RoundController`], runs the
//! countdown, sends the no-answer sentinel when time runs out, and after a
//! reconnect resumes the seat and rehydrates before handing control back.

use chrono::Utc;
use std::time::Duration;

use super::connection::{ConnectionManager, Inbound, Subscription};
use super::controller::{ClientPhase, RoundController};
use crate::error::{ClientError, ClientResult, ErrorCode};
use crate::protocol::{ClientMessage, RoomSnapshot, ServerMessage};
use crate::types::*;

const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// What the caller sees from [`RoundSession::next_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A server event, already applied to the controller
    Server(ServerMessage),
    /// Countdown tick while a question is open
    Tick { remaining: Duration },
    /// The countdown ran out and the no-answer sentinel was sent
    TimedOut { round: u32 },
    /// Local view was rebuilt from a snapshot
    Resynced(RoomSnapshot),
    /// Transport dropped; reconnect is in progress
    ConnectionLost,
}

/// Result of [`RoundSession::expect_or_rehydrate`]
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    Event(ServerMessage),
    /// The event did not arrive in time; the snapshot was fetched instead
    Rehydrated(RoomSnapshot),
}

/// Outcome of a submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submitted {
    Accepted { correct: bool, points_awarded: u32 },
    /// Nothing to submit: no open round, or already answered
    Skipped,
    /// The server refused it as a conflict; the view has been reconciled
    Reconciled,
}

#[derive(Debug, Clone)]
struct SeatInfo {
    room_code: RoomCode,
    session_token: SessionToken,
}

pub struct RoundSession {
    connection: ConnectionManager,
    subscription: Subscription,
    controller: RoundController,
    seat: Option<SeatInfo>,
    tick: Duration,
}

impl RoundSession {
    /// Connect (if needed) and take the connection's event subscription
    pub async fn start(connection: ConnectionManager, player_name: impl Into<PlayerName>) -> ClientResult<Self> {
        connection.ensure_connection().await?;
        let subscription = connection.subscribe().await?;
        let mut controller = RoundController::new(player_name);
        controller.set_clock_offset(connection.clock_offset());
        Ok(Self {
            connection,
            subscription,
            controller,
            seat: None,
            tick: DEFAULT_TICK,
        })
    }

    #[must_use]
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(10));
        self
    }

    pub fn controller(&self) -> &RoundController {
        &self.controller
    }

    pub fn room_code(&self) -> Option<&str> {
        self.seat.as_ref().map(|s| s.room_code.as_str())
    }

    fn require_room(&self) -> ClientResult<RoomCode> {
        self.seat
            .as_ref()
            .map(|s| s.room_code.clone())
            .ok_or(ClientError::NotInRoom)
    }

    fn unexpected(reply: ServerMessage) -> ClientError {
        ClientError::UnexpectedReply(format!("{:?}", reply))
    }

    // =========================================================================
    // Membership
    // =========================================================================

    pub async fn create_room(&mut self) -> ClientResult<RoomCode> {
        let reply = self
            .connection
            .invoke(ClientMessage::CreateRoom {
                host_name: self.controller.me.clone(),
            })
            .await?;
        match &reply {
            ServerMessage::RoomCreated {
                room_code,
                session_token,
                ..
            } => {
                self.seat = Some(SeatInfo {
                    room_code: room_code.clone(),
                    session_token: session_token.clone(),
                });
                let code = room_code.clone();
                self.controller.apply(&reply);
                Ok(code)
            }
            _ => Err(Self::unexpected(reply)),
        }
    }

    /// Join a room. If this session already holds a seat there, the seat is
    /// resumed instead of registering the name again.
    pub async fn join_room(&mut self, room_code: &str) -> ClientResult<RoomSnapshot> {
        if self
            .seat
            .as_ref()
            .is_some_and(|s| s.room_code.eq_ignore_ascii_case(room_code.trim()))
        {
            return self.resume().await;
        }

        let result = self
            .connection
            .invoke(ClientMessage::JoinRoom {
                room_code: room_code.to_string(),
                player_name: self.controller.me.clone(),
            })
            .await;
        match result {
            Ok(ServerMessage::RoomJoined {
                session_token,
                room,
            }) => {
                self.seat = Some(SeatInfo {
                    room_code: room.room_code.clone(),
                    session_token,
                });
                self.controller.rehydrate(&room);
                Ok(room)
            }
            Ok(other) => Err(Self::unexpected(other)),
            Err(ClientError::Rejected { code, msg }) if code.is_benign() => {
                // Show the room as it is rather than failing the screen
                tracing::info!("Join of {} refused ({:?}); rehydrating", room_code, code);
                if let Ok(ServerMessage::RoomInfo { room }) = self
                    .connection
                    .invoke(ClientMessage::GetRoomInfo {
                        room_code: room_code.to_string(),
                    })
                    .await
                {
                    self.controller.rehydrate(&room);
                }
                Err(ClientError::Rejected { code, msg })
            }
            Err(e) => Err(e),
        }
    }

    /// Reattach this connection to the held seat and rehydrate
    pub async fn resume(&mut self) -> ClientResult<RoomSnapshot> {
        let seat = self.seat.clone().ok_or(ClientError::NotInRoom)?;
        let reply = self
            .connection
            .invoke(ClientMessage::ResumeSession {
                room_code: seat.room_code,
                player_name: self.controller.me.clone(),
                session_token: seat.session_token,
            })
            .await;
        match reply {
            Ok(ServerMessage::SessionResumed { room }) => {
                self.controller.rehydrate(&room);
                Ok(room)
            }
            Ok(other) => Err(Self::unexpected(other)),
            Err(e) => {
                if matches!(
                    e.code(),
                    Some(ErrorCode::RoomNotFound | ErrorCode::NotInRoom | ErrorCode::InvalidSession)
                ) {
                    // The seat is gone for good
                    self.seat = None;
                    self.controller = RoundController::new(self.controller.me.clone());
                }
                Err(e)
            }
        }
    }

    pub async fn leave(&mut self) -> ClientResult<()> {
        let room_code = self.require_room()?;
        let reply = self
            .connection
            .invoke(ClientMessage::LeaveRoom { room_code })
            .await?;
        self.seat = None;
        self.controller.apply(&reply);
        Ok(())
    }

    /// Fetch the authoritative snapshot and rebuild the local view.
    /// Safe to call as often as needed.
    pub async fn rehydrate(&mut self) -> ClientResult<RoomSnapshot> {
        let room_code = self
            .seat
            .as_ref()
            .map(|s| s.room_code.clone())
            .or_else(|| self.controller.room_code.clone())
            .ok_or(ClientError::NotInRoom)?;
        match self
            .connection
            .invoke(ClientMessage::GetRoomInfo { room_code })
            .await?
        {
            ServerMessage::RoomInfo { room } => {
                self.controller.rehydrate(&room);
                Ok(room)
            }
            other => Err(Self::unexpected(other)),
        }
    }

    // =========================================================================
    // Game control (host only; the server enforces it regardless)
    // =========================================================================

    async fn control(&mut self, msg: ClientMessage) -> ClientResult<RoomSnapshot> {
        match self.connection.invoke(msg).await? {
            ServerMessage::RoomInfo { room } => {
                self.controller.rehydrate(&room);
                Ok(room)
            }
            other => Err(Self::unexpected(other)),
        }
    }

    pub async fn select_game(&mut self, mode: GameMode) -> ClientResult<RoomSnapshot> {
        let room_code = self.require_room()?;
        self.control(ClientMessage::SelectGame {
            room_code,
            game_id: mode,
        })
        .await
    }

    pub async fn start_game(&mut self, question: Option<Question>) -> ClientResult<RoomSnapshot> {
        let room_code = self.require_room()?;
        self.control(ClientMessage::StartGame {
            room_code,
            question,
        })
        .await
    }

    pub async fn next_question(&mut self, question: Option<Question>) -> ClientResult<RoomSnapshot> {
        let room_code = self.require_room()?;
        self.control(ClientMessage::SendQuestionToRoom {
            room_code,
            question,
        })
        .await
    }

    pub async fn end_game(&mut self) -> ClientResult<RoomSnapshot> {
        let room_code = self.require_room()?;
        self.control(ClientMessage::EndGame { room_code }).await
    }

    // =========================================================================
    // Answers
    // =========================================================================

    /// Submit an answer for the open round. Protocol conflicts are resolved
    /// by reconciling with the server instead of being reported.
    pub async fn submit(&mut self, answer: Answer) -> ClientResult<Submitted> {
        let Some(msg) = self.controller.prepare_submission(answer, Utc::now()) else {
            return Ok(Submitted::Skipped);
        };
        self.send_submission(msg).await
    }

    async fn send_submission(&mut self, msg: ClientMessage) -> ClientResult<Submitted> {
        match self.connection.invoke(msg).await {
            Ok(reply @ ServerMessage::AnswerAccepted { .. }) => {
                self.controller.apply(&reply);
                match reply {
                    ServerMessage::AnswerAccepted {
                        correct,
                        points_awarded,
                        ..
                    } => Ok(Submitted::Accepted {
                        correct,
                        points_awarded,
                    }),
                    _ => Ok(Submitted::Skipped),
                }
            }
            Ok(other) => Err(Self::unexpected(other)),
            Err(ClientError::Rejected { code, .. }) if code.is_benign() => {
                // Already recorded needs nothing; otherwise the round moved on
                if code != ErrorCode::AlreadyAnswered {
                    self.rehydrate().await?;
                }
                Ok(Submitted::Reconciled)
            }
            Err(e) => {
                if e.code() == Some(ErrorCode::TransportError) {
                    // Never replayed; the user may answer again after resync
                    self.controller.retract_submission();
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Event loop
    // =========================================================================

    /// Wait for the next thing worth showing. While a question is open this
    /// also yields countdown ticks and fires the no-answer sentinel once.
    pub async fn next_event(&mut self) -> ClientResult<SessionEvent> {
        let now = Utc::now();
        if let Some(sentinel) = self.controller.expire(now) {
            let round = self.controller.round;
            self.send_submission(sentinel).await?;
            return Ok(SessionEvent::TimedOut { round });
        }

        let ticking = self.controller.phase == ClientPhase::Answering;
        let wait = if ticking {
            self.controller.remaining(now).min(self.tick)
        } else {
            Duration::from_secs(3600)
        };

        tokio::select! {
            inbound = self.subscription.recv() => self.handle_inbound(inbound).await,
            _ = tokio::time::sleep(wait), if ticking => {
                Ok(SessionEvent::Tick {
                    remaining: self.controller.remaining(Utc::now()),
                })
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Option<Inbound>) -> ClientResult<SessionEvent> {
        match inbound {
            Some(Inbound::Event(msg)) => {
                if matches!(msg, ServerMessage::Welcome { .. }) {
                    self.controller.set_clock_offset(self.connection.clock_offset());
                }
                self.controller.apply(&msg);
                if matches!(msg, ServerMessage::RoomClosed { .. }) {
                    self.seat = None;
                }
                Ok(SessionEvent::Server(msg))
            }
            Some(Inbound::Disconnected) => {
                tracing::warn!("Connection lost; waiting for reconnect");
                Ok(SessionEvent::ConnectionLost)
            }
            Some(Inbound::Reconnected) => {
                let room = if self.seat.is_some() {
                    self.resume().await?
                } else {
                    self.rehydrate().await?
                };
                Ok(SessionEvent::Resynced(room))
            }
            Some(Inbound::Lagged) => Ok(SessionEvent::Resynced(self.rehydrate().await?)),
            None => Err(ClientError::Transport(
                "connection closed for good".to_string(),
            )),
        }
    }

    /// Wait up to `timeout` for an event matching `expected`; if none
    /// arrives, fall back to a rehydration query. Other events arriving in
    /// the meantime are still applied.
    pub async fn expect_or_rehydrate<F>(&mut self, timeout: Duration, expected: F) -> ClientResult<Expectation>
    where
        F: Fn(&ServerMessage) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.subscription.recv()).await {
                Ok(Some(Inbound::Event(msg))) => {
                    self.controller.apply(&msg);
                    if expected(&msg) {
                        return Ok(Expectation::Event(msg));
                    }
                }
                Ok(other) => {
                    if let SessionEvent::Resynced(room) = self.handle_inbound(other).await? {
                        return Ok(Expectation::Rehydrated(room));
                    }
                }
                Err(_) => {
                    tracing::debug!("Expected event not seen within {:?}; rehydrating", timeout);
                    return Ok(Expectation::Rehydrated(self.rehydrate().await?));
                }
            }
        }
    }

    /// Release the subscription. The connection stays up for its owner.
    pub fn close(self) -> ConnectionManager {
        self.connection
    }
}

impl std::fmt::Debug for RoundSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoundSession")
            .field("me", &self.controller.me)
            .field("room_code", &self.room_code())
            .field("phase", &self.controller.phase)
            .finish()
    }
}
