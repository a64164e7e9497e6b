use super::{AppState, Scored};
use crate::error::RoomResult;
use crate::types::*;
use chrono::Utc;

impl AppState {
    /// Record a player's answer for `round_number`. Late, duplicate and
    /// stale submissions are rejected without touching the score.
    pub async fn submit_answer(
        &self,
        room_code: &str,
        player_name: &str,
        round_number: u32,
        answer: Answer,
        time_taken_ms: u64,
    ) -> RoomResult<Scored> {
        self.with_room(room_code, |room, out| {
            room.submit_answer(player_name, round_number, answer, time_taken_ms, Utc::now(), out)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::error::RoomError;
    use crate::protocol::ServerMessage;
    use crate::state::AppState;
    use crate::types::*;

    fn question() -> Question {
        Question::CompareStat {
            left: "Snorlax".to_string(),
            right: "Pikachu".to_string(),
            stat: Stat::Hp,
            answer: Side::Left,
        }
    }

    #[tokio::test]
    async fn test_submit_and_resolve() {
        let state = AppState::default();
        let host = state.create_room("Ash", None).await.unwrap();
        let code = host.room_code;
        let mut misty = state.join_room(&code, "Misty", None).await.unwrap();
        state.select_game(&code, "Ash", GameMode::CompareStat).await.unwrap();
        state.start_game(&code, "Ash", Some(question())).await.unwrap();

        let ash = state
            .submit_answer(&code, "Ash", 1, Answer::Side(Side::Left), 1200)
            .await
            .unwrap();
        assert!(ash.correct);
        assert!(ash.points_awarded >= 100);

        let again = state
            .submit_answer(&code, "Ash", 1, Answer::Side(Side::Right), 1300)
            .await;
        assert_eq!(again, Err(RoomError::AlreadyAnswered(1)));

        let wrong = state
            .submit_answer(&code, "Misty", 1, Answer::Side(Side::Right), 900)
            .await
            .unwrap();
        assert_eq!(wrong.points_awarded, 0);

        let mut resolved = None;
        while let Ok(msg) = misty.events.try_recv() {
            if let ServerMessage::AllAnswered { results, .. } = msg {
                resolved = Some(results);
            }
        }
        let results = resolved.expect("round should resolve");
        assert_eq!(results.correct_answer, Answer::Side(Side::Left));
        assert_eq!(results.submissions.len(), 2);
    }

    #[tokio::test]
    async fn test_wrong_answer_kind_scores_zero() {
        let state = AppState::default();
        let host = state.create_room("Ash", None).await.unwrap();
        let code = host.room_code;
        state.select_game(&code, "Ash", GameMode::CompareStat).await.unwrap();
        state.start_game(&code, "Ash", Some(question())).await.unwrap();

        let scored = state
            .submit_answer(&code, "Ash", 1, Answer::Value(160), 500)
            .await
            .unwrap();
        assert!(!scored.correct);
        assert_eq!(scored.points_awarded, 0);
    }

    #[tokio::test]
    async fn test_outsider_cannot_submit() {
        let state = AppState::default();
        let host = state.create_room("Ash", None).await.unwrap();
        let result = state
            .submit_answer(&host.room_code, "Gary", 1, Answer::NoAnswer, 0)
            .await;
        assert_eq!(result, Err(RoomError::NotInRoom));
    }
}
