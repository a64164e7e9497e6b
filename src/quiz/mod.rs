//! Question sources
//!
//! Quiz content lives outside the round state machine. The server only asks
//! a [`QuestionSource`] for the next question of the selected mode when the
//! host does not supply one.

mod deck;

use async_trait::async_trait;

use crate::types::{GameMode, Question};

pub use deck::{PokemonEntry, StaticDeck};

/// Result type for question generation
pub type QuizResult<T> = Result<T, QuizError>;

#[derive(Debug, thiserror::Error)]
pub enum QuizError {
    #[error("Deck has too few entries for {0:?}")]
    DeckTooSmall(GameMode),

    #[error("Could not build a question: {0}")]
    Generation(String),
}

/// Trait that all question sources must implement
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Produce a fresh question for the given mode
    async fn next_question(&self, mode: GameMode) -> QuizResult<Question>;

    /// Get the name of this source
    fn name(&self) -> &str;
}
