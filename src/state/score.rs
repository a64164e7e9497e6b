use crate::protocol::{LeaderboardEntry, PlayerInfo};

/// Points for one submission: a flat amount for a correct answer plus a
/// speed bonus proportional to the time left. Wrong answers score nothing.
pub fn points_for(correct: bool, remaining_fraction: f64, base_points: u32, bonus_cap: u32) -> u32 {
    if !correct {
        return 0;
    }
    let fraction = remaining_fraction.clamp(0.0, 1.0);
    base_points.saturating_add((fraction * bonus_cap as f64).floor() as u32)
}

/// Rank players by score, highest first. Ties share a rank and keep join
/// order; the next rank skips accordingly (1, 1, 3).
pub fn leaderboard(players: &[PlayerInfo]) -> Vec<LeaderboardEntry> {
    let mut sorted: Vec<&PlayerInfo> = players.iter().collect();
    // Stable sort keeps join order among equal scores
    sorted.sort_by(|a, b| b.score.cmp(&a.score));

    let mut entries: Vec<LeaderboardEntry> = Vec::with_capacity(sorted.len());
    for (index, player) in sorted.into_iter().enumerate() {
        let rank = match entries.last() {
            Some(prev) if prev.score == player.score => prev.rank,
            _ => index as u32 + 1,
        };
        entries.push(LeaderboardEntry {
            rank,
            name: player.name.clone(),
            score: player.score,
        });
    }
    entries
}
