use async_trait::async_trait;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

use super::{QuestionSource, QuizError, QuizResult};
use crate::types::{GameMode, Question, Side, Stat};

/// Number of choices offered in a stat-guess question
const CHOICE_COUNT: usize = 4;

/// Attempts at drawing a compare pair whose stats differ
const MAX_PAIR_DRAWS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct PokemonEntry {
    pub name: String,
    /// hp, attack, defense, special attack, special defense, speed
    pub base_stats: [u32; 6],
}

impl PokemonEntry {
    pub fn new(name: &str, base_stats: [u32; 6]) -> Self {
        Self {
            name: name.to_string(),
            base_stats,
        }
    }

    pub fn stat(&self, stat: Stat) -> u32 {
        match stat {
            Stat::Hp => self.base_stats[0],
            Stat::Attack => self.base_stats[1],
            Stat::Defense => self.base_stats[2],
            Stat::SpecialAttack => self.base_stats[3],
            Stat::SpecialDefense => self.base_stats[4],
            Stat::Speed => self.base_stats[5],
        }
    }
}

/// In-memory deck of Pokémon base stats
pub struct StaticDeck {
    entries: Vec<PokemonEntry>,
}

impl StaticDeck {
    pub fn new(entries: Vec<PokemonEntry>) -> Self {
        Self { entries }
    }

    /// Built-in deck of first-generation favourites
    pub fn kanto() -> Self {
        Self::new(vec![
            PokemonEntry::new("Bulbasaur", [45, 49, 49, 65, 65, 45]),
            PokemonEntry::new("Charmander", [39, 52, 43, 60, 50, 65]),
            PokemonEntry::new("Squirtle", [44, 48, 65, 50, 64, 43]),
            PokemonEntry::new("Pikachu", [35, 55, 40, 50, 50, 90]),
            PokemonEntry::new("Jigglypuff", [115, 45, 20, 45, 25, 20]),
            PokemonEntry::new("Meowth", [40, 45, 35, 40, 40, 90]),
            PokemonEntry::new("Psyduck", [50, 52, 48, 65, 50, 55]),
            PokemonEntry::new("Machamp", [90, 130, 80, 65, 85, 55]),
            PokemonEntry::new("Geodude", [40, 80, 100, 30, 30, 20]),
            PokemonEntry::new("Onix", [35, 45, 160, 30, 45, 70]),
            PokemonEntry::new("Gengar", [60, 65, 60, 130, 75, 110]),
            PokemonEntry::new("Alakazam", [55, 50, 45, 135, 95, 120]),
            PokemonEntry::new("Gyarados", [95, 125, 79, 60, 100, 81]),
            PokemonEntry::new("Lapras", [130, 85, 80, 85, 95, 60]),
            PokemonEntry::new("Eevee", [55, 55, 50, 45, 65, 55]),
            PokemonEntry::new("Snorlax", [160, 110, 65, 65, 110, 30]),
            PokemonEntry::new("Dragonite", [91, 134, 95, 100, 100, 80]),
            PokemonEntry::new("Mewtwo", [106, 110, 90, 154, 90, 130]),
            PokemonEntry::new("Mew", [100, 100, 100, 100, 100, 100]),
            PokemonEntry::new("Chansey", [250, 5, 5, 35, 105, 50]),
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn stat_guess(&self, rng: &mut impl Rng) -> QuizResult<Question> {
        let entry = self
            .entries
            .choose(rng)
            .ok_or(QuizError::DeckTooSmall(GameMode::StatGuess))?;
        let stat = *Stat::ALL
            .choose(rng)
            .ok_or_else(|| QuizError::Generation("no stats".to_string()))?;
        let answer = entry.stat(stat);

        // Distractors are other Pokémon's values for the same stat, padded
        // with nearby numbers when the deck repeats values.
        let mut choices = vec![answer];
        let mut pool: Vec<u32> = self
            .entries
            .iter()
            .map(|e| e.stat(stat))
            .filter(|v| *v != answer)
            .collect();
        pool.sort_unstable();
        pool.dedup();
        pool.shuffle(rng);
        for value in pool {
            if choices.len() == CHOICE_COUNT {
                break;
            }
            choices.push(value);
        }
        let mut offset = 10;
        while choices.len() < CHOICE_COUNT {
            let candidate = answer + offset;
            if !choices.contains(&candidate) {
                choices.push(candidate);
            }
            offset += 10;
        }
        choices.shuffle(rng);

        Ok(Question::StatGuess {
            pokemon: entry.name.clone(),
            stat,
            choices,
            answer,
        })
    }

    fn compare_stat(&self, rng: &mut impl Rng) -> QuizResult<Question> {
        if self.entries.len() < 2 {
            return Err(QuizError::DeckTooSmall(GameMode::CompareStat));
        }
        for _ in 0..MAX_PAIR_DRAWS {
            let pair: Vec<&PokemonEntry> = self.entries.choose_multiple(rng, 2).collect();
            let (left, right) = (pair[0], pair[1]);
            let stat = Stat::ALL[rng.random_range(0..Stat::ALL.len())];
            let (l, r) = (left.stat(stat), right.stat(stat));
            if l == r {
                continue;
            }
            return Ok(Question::CompareStat {
                left: left.name.clone(),
                right: right.name.clone(),
                stat,
                answer: if l > r { Side::Left } else { Side::Right },
            });
        }
        Err(QuizError::Generation(
            "could not find two Pokémon with different stats".to_string(),
        ))
    }
}

impl Default for StaticDeck {
    fn default() -> Self {
        Self::kanto()
    }
}

#[async_trait]
impl QuestionSource for StaticDeck {
    async fn next_question(&self, mode: GameMode) -> QuizResult<Question> {
        let mut rng = rand::rng();
        let question = match mode {
            GameMode::StatGuess => self.stat_guess(&mut rng)?,
            GameMode::CompareStat => self.compare_stat(&mut rng)?,
        };
        tracing::debug!("Deck drew {:?} question", mode);
        Ok(question)
    }

    fn name(&self) -> &str {
        "static-deck"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stat_guess_contains_answer() {
        let deck = StaticDeck::kanto();
        for _ in 0..50 {
            let question = deck.next_question(GameMode::StatGuess).await.unwrap();
            assert!(question.validate().is_ok());
            if let Question::StatGuess { choices, .. } = &question {
                assert_eq!(choices.len(), CHOICE_COUNT);
                let mut unique = choices.clone();
                unique.sort_unstable();
                unique.dedup();
                assert_eq!(unique.len(), CHOICE_COUNT);
            } else {
                panic!("Expected stat guess");
            }
        }
    }

    #[tokio::test]
    async fn test_compare_answer_matches_stats() {
        let deck = StaticDeck::kanto();
        for _ in 0..50 {
            let question = deck.next_question(GameMode::CompareStat).await.unwrap();
            let Question::CompareStat {
                left,
                right,
                stat,
                answer,
            } = question
            else {
                panic!("Expected compare question");
            };
            let find = |name: &str| deck.entries.iter().find(|e| e.name == name).unwrap();
            let (l, r) = (find(&left).stat(stat), find(&right).stat(stat));
            assert_ne!(left, right);
            assert_eq!(answer, if l > r { Side::Left } else { Side::Right });
        }
    }

    #[tokio::test]
    async fn test_tiny_deck_errors() {
        let deck = StaticDeck::new(vec![PokemonEntry::new("Ditto", [48; 6])]);
        let result = deck.next_question(GameMode::CompareStat).await;
        assert!(matches!(result, Err(QuizError::DeckTooSmall(_))));

        // A single entry can still pose a stat question
        let question = deck.next_question(GameMode::StatGuess).await.unwrap();
        assert!(question.validate().is_ok());
    }
}
