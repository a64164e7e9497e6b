//! Round timer arithmetic.
//!
//! Server and clients derive every countdown from the absolute
//! `question_started_at` timestamp, never from how long a particular
//! connection has been alive.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Milliseconds elapsed since `started_at`. Negative skew clamps to zero.
pub fn elapsed_ms(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started_at).num_milliseconds().max(0) as u64
}

/// `max(0, budget - (now - started_at))`
pub fn remaining(started_at: DateTime<Utc>, budget_ms: u64, now: DateTime<Utc>) -> Duration {
    Duration::from_millis(budget_ms.saturating_sub(elapsed_ms(started_at, now)))
}

/// Fraction of the budget still left, in `[0, 1]`
pub fn remaining_fraction(started_at: DateTime<Utc>, budget_ms: u64, now: DateTime<Utc>) -> f64 {
    if budget_ms == 0 {
        return 0.0;
    }
    remaining(started_at, budget_ms, now).as_millis() as f64 / budget_ms as f64
}

pub fn deadline(started_at: DateTime<Utc>, budget_ms: u64) -> DateTime<Utc> {
    started_at + TimeDelta::milliseconds(budget_ms as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_remaining_counts_down_from_start() {
        let start = t0();
        let now = start + TimeDelta::seconds(15);
        assert_eq!(remaining(start, 20_000, now), Duration::from_secs(5));
        assert_eq!(remaining(start, 20_000, start), Duration::from_secs(20));
    }

    #[test]
    fn test_remaining_never_negative() {
        let start = t0();
        let now = start + TimeDelta::seconds(30);
        assert_eq!(remaining(start, 20_000, now), Duration::ZERO);
        assert_eq!(remaining_fraction(start, 20_000, now), 0.0);
    }

    #[test]
    fn test_clock_behind_start_reads_full_budget() {
        let start = t0();
        let now = start - TimeDelta::milliseconds(300);
        assert_eq!(elapsed_ms(start, now), 0);
        assert_eq!(remaining(start, 20_000, now), Duration::from_secs(20));
    }

    #[test]
    fn test_two_observers_agree_regardless_of_join_time() {
        // Both observers read the same authoritative start; only their own
        // clock differences matter.
        let start = t0();
        let a = remaining(start, 20_000, start + TimeDelta::seconds(12));
        let b = remaining(start, 20_000, start + TimeDelta::milliseconds(12_040));
        assert_eq!(a - b, Duration::from_millis(40));
    }
}
