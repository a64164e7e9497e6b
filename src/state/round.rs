use super::AppState;
use crate::error::{RoomError, RoomResult};
use crate::types::*;
use chrono::{DateTime, Utc};

impl AppState {
    pub async fn select_game(&self, room_code: &str, actor: &str, mode: GameMode) -> RoomResult<()> {
        self.with_room(room_code, |room, out| room.select_game(actor, mode, out))
            .await
    }

    /// Start round 1 with the host's question, or one drawn from the
    /// question source
    pub async fn start_game(
        &self,
        room_code: &str,
        actor: &str,
        question: Option<Question>,
    ) -> RoomResult<()> {
        let question = self.resolve_question(room_code, actor, question).await?;
        self.with_room(room_code, |room, out| {
            room.start_game(actor, question, Utc::now(), out)
        })
        .await
    }

    /// Advance to the next round
    pub async fn send_next_question(
        &self,
        room_code: &str,
        actor: &str,
        question: Option<Question>,
    ) -> RoomResult<()> {
        let question = self.resolve_question(room_code, actor, question).await?;
        self.with_room(room_code, |room, out| {
            room.send_next_question(actor, question, Utc::now(), out)
        })
        .await
    }

    pub async fn end_game(&self, room_code: &str, actor: &str) -> RoomResult<()> {
        self.with_room(room_code, |room, out| room.end_game(actor, Utc::now(), out))
            .await
    }

    /// Use the supplied question or draw one. The room is checked first so a
    /// rejected request never costs a draw; generation runs without the lock
    /// and the room re-validates when the question is applied.
    async fn resolve_question(
        &self,
        room_code: &str,
        actor: &str,
        question: Option<Question>,
    ) -> RoomResult<Question> {
        let mode = self
            .with_room(room_code, |room, _| room.can_advance(actor))
            .await?;
        match question {
            Some(q) => Ok(q),
            None => self
                .questions
                .next_question(mode)
                .await
                .map_err(|e| RoomError::QuestionUnavailable(e.to_string())),
        }
    }

    /// Resolve every round whose time budget ran out. Returns how many.
    pub async fn expire_due_rounds(&self, now: DateTime<Utc>) -> usize {
        let handles: Vec<_> = self.rooms.read().await.values().cloned().collect();
        let mut expired = 0;
        for handle in handles {
            let mut room = handle.room.lock().await;
            let mut out = Vec::new();
            if room.expire_if_due(now, &mut out) {
                expired += 1;
            }
            handle.publish(out);
        }
        expired
    }
}
