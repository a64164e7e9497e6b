use serde::{Deserialize, Serialize};

/// Opaque ID types for readability
pub type RoomCode = String;
pub type PlayerName = String;
pub type SessionToken = String;
pub type ConnectionId = String;

/// The quiz flavours a room can play
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum GameMode {
    /// Guess the exact base stat of a Pokémon from a list of choices
    StatGuess,
    /// Pick which of two Pokémon has the higher stat
    CompareStat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    Lobby,
    GameSelected,
    InProgress,
    Resolving,
    GameOver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Hp,
    Attack,
    Defense,
    SpecialAttack,
    SpecialDefense,
    Speed,
}

impl Stat {
    pub const ALL: [Stat; 6] = [
        Stat::Hp,
        Stat::Attack,
        Stat::Defense,
        Stat::SpecialAttack,
        Stat::SpecialDefense,
        Stat::Speed,
    ];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// A question together with its ground truth. Never sent to players as-is,
/// see [`QuestionView`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Question {
    StatGuess {
        pokemon: String,
        stat: Stat,
        choices: Vec<u32>,
        answer: u32,
    },
    CompareStat {
        left: String,
        right: String,
        stat: Stat,
        answer: Side,
    },
}

/// The player-facing half of a [`Question`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum QuestionView {
    StatGuess {
        pokemon: String,
        stat: Stat,
        choices: Vec<u32>,
    },
    CompareStat {
        left: String,
        right: String,
        stat: Stat,
    },
}

/// What a player picked. `NoAnswer` is the sentinel a client sends when its
/// countdown runs out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Answer {
    Value(u32),
    Side(Side),
    NoAnswer,
}

impl Question {
    pub fn mode(&self) -> GameMode {
        match self {
            Question::StatGuess { .. } => GameMode::StatGuess,
            Question::CompareStat { .. } => GameMode::CompareStat,
        }
    }

    pub fn view(&self) -> QuestionView {
        match self {
            Question::StatGuess {
                pokemon,
                stat,
                choices,
                ..
            } => QuestionView::StatGuess {
                pokemon: pokemon.clone(),
                stat: *stat,
                choices: choices.clone(),
            },
            Question::CompareStat {
                left, right, stat, ..
            } => QuestionView::CompareStat {
                left: left.clone(),
                right: right.clone(),
                stat: *stat,
            },
        }
    }

    pub fn correct_answer(&self) -> Answer {
        match self {
            Question::StatGuess { answer, .. } => Answer::Value(*answer),
            Question::CompareStat { answer, .. } => Answer::Side(*answer),
        }
    }

    /// Deterministic comparison against the ground truth. An answer of the
    /// wrong kind for this mode is simply incorrect.
    pub fn is_correct(&self, answer: &Answer) -> bool {
        match (self, answer) {
            (Question::StatGuess { answer: truth, .. }, Answer::Value(v)) => truth == v,
            (Question::CompareStat { answer: truth, .. }, Answer::Side(s)) => truth == s,
            _ => false,
        }
    }

    /// Structural checks for host-supplied payloads
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Question::StatGuess {
                pokemon,
                choices,
                answer,
                ..
            } => {
                if pokemon.trim().is_empty() {
                    return Err("Question needs a Pokémon".to_string());
                }
                if choices.len() < 2 {
                    return Err("Stat questions need at least two choices".to_string());
                }
                if !choices.contains(answer) {
                    return Err("Choices must include the correct answer".to_string());
                }
                let mut distinct = choices.clone();
                distinct.sort_unstable();
                distinct.dedup();
                if distinct.len() != choices.len() {
                    return Err("Choices must be distinct".to_string());
                }
                Ok(())
            }
            Question::CompareStat { left, right, .. } => {
                if left.trim().is_empty() || right.trim().is_empty() {
                    return Err("Compare questions need two Pokémon".to_string());
                }
                if left == right {
                    return Err("Cannot compare a Pokémon with itself".to_string());
                }
                Ok(())
            }
        }
    }
}
