mod registry;
pub mod room;
mod round;
pub mod score;
mod submission;

pub use registry::Membership;
pub use room::{Outbox, Room, Scored};

use crate::config::ServerConfig;
use crate::error::{RoomError, RoomResult};
use crate::protocol::ServerMessage;
use crate::quiz::{QuestionSource, StaticDeck};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

/// Buffered events per room before a slow member starts lagging
pub const ROOM_EVENT_CAPACITY: usize = 256;

/// One room plus its broadcast channel.
///
/// Events are published while the room lock is held, so every member
/// observes them in the order the state machine produced them.
#[derive(Clone)]
pub struct RoomHandle {
    pub room: Arc<Mutex<Room>>,
    pub events: broadcast::Sender<ServerMessage>,
}

impl RoomHandle {
    fn new(room: Room) -> Self {
        let (events, _rx) = broadcast::channel(ROOM_EVENT_CAPACITY);
        Self {
            room: Arc::new(Mutex::new(room)),
            events,
        }
    }

    fn publish(&self, out: Outbox) {
        for msg in out {
            // No subscribers is fine
            let _ = self.events.send(msg);
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub rooms: Arc<RwLock<HashMap<RoomCode, RoomHandle>>>,
    /// Supplies questions when the host does not send its own
    pub questions: Arc<dyn QuestionSource>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_question_source(config, Arc::new(StaticDeck::kanto()))
    }

    pub fn with_question_source(config: ServerConfig, questions: Arc<dyn QuestionSource>) -> Self {
        tracing::info!("Using question source '{}'", questions.name());
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            questions,
        }
    }

    async fn room_handle(&self, code: &str) -> RoomResult<RoomHandle> {
        let code = normalize_code(code);
        self.rooms
            .read()
            .await
            .get(&code)
            .cloned()
            .ok_or(RoomError::RoomNotFound(code))
    }

    /// Run one state machine step on a room and publish what it produced.
    /// Events are published even when the step fails, since a rejected
    /// late submission can still close the round.
    async fn with_room<T>(
        &self,
        code: &str,
        f: impl FnOnce(&mut Room, &mut Outbox) -> RoomResult<T>,
    ) -> RoomResult<T> {
        let handle = self.room_handle(code).await?;
        let mut room = handle.room.lock().await;
        let mut out = Vec::new();
        let result = f(&mut room, &mut out);
        handle.publish(out);
        result
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

/// Room codes are matched case-insensitively
pub fn normalize_code(code: &str) -> RoomCode {
    code.trim().to_ascii_uppercase()
}
