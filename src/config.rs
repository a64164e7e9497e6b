//! Environment-driven configuration
//!
//! Every knob has a default; a value that fails to parse is logged and
//! replaced by the default rather than aborting startup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Read `key` from the environment, falling back to `default`
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Rules of a single game: timing and scoring
#[derive(Debug, Clone, PartialEq)]
pub struct GameConfig {
    /// Fixed answer window per round
    pub round_time: Duration,
    pub max_rounds: u32,
    pub base_points: u32,
    pub speed_bonus_cap: u32,
    /// Transit allowance after the deadline during which a submission is
    /// still recorded, as a timeout worth nothing. Zero keeps the budget a
    /// hard deadline.
    pub late_grace: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_time: Duration::from_secs(20),
            max_rounds: 10,
            base_points: 100,
            speed_bonus_cap: 100,
            late_grace: Duration::ZERO,
        }
    }
}

impl GameConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            round_time: Duration::from_secs(env_or(
                "POKEQUIZ_ROUND_SECONDS",
                defaults.round_time.as_secs(),
            )),
            max_rounds: env_or("POKEQUIZ_MAX_ROUNDS", defaults.max_rounds).max(1),
            base_points: env_or("POKEQUIZ_BASE_POINTS", defaults.base_points),
            speed_bonus_cap: env_or("POKEQUIZ_SPEED_BONUS", defaults.speed_bonus_cap),
            late_grace: Duration::from_millis(env_or(
                "POKEQUIZ_LATE_GRACE_MS",
                defaults.late_grace.as_millis() as u64,
            )),
        }
    }

    pub fn round_time_ms(&self) -> u64 {
        self.round_time.as_millis() as u64
    }
}

/// Server-wide settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub game: GameConfig,
    /// How long an empty or finished room lingers before it is collected
    pub room_idle_grace: Duration,
    /// How long a dropped player keeps their seat
    pub disconnect_grace: Duration,
    /// Period of the deadline watcher and the room janitor
    pub sweep_interval: Duration,
    pub room_code_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7420)),
            game: GameConfig::default(),
            room_idle_grace: Duration::from_secs(300),
            disconnect_grace: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(250),
            room_code_length: 4,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            bind_addr: env_or("POKEQUIZ_BIND", defaults.bind_addr),
            game: GameConfig::from_env(),
            room_idle_grace: Duration::from_secs(env_or(
                "POKEQUIZ_ROOM_IDLE_SECONDS",
                defaults.room_idle_grace.as_secs(),
            )),
            disconnect_grace: Duration::from_secs(env_or(
                "POKEQUIZ_DISCONNECT_GRACE_SECONDS",
                defaults.disconnect_grace.as_secs(),
            )),
            sweep_interval: Duration::from_millis(
                env_or(
                    "POKEQUIZ_SWEEP_MS",
                    defaults.sweep_interval.as_millis() as u64,
                )
                .max(10),
            ),
            room_code_length: env_or("POKEQUIZ_ROOM_CODE_LENGTH", defaults.room_code_length)
                .clamp(3, 8),
        };
        tracing::info!(
            "Config: {} rounds of {:?}, idle grace {:?}, disconnect grace {:?}",
            config.game.max_rounds,
            config.game.round_time,
            config.room_idle_grace,
            config.disconnect_grace
        );
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "POKEQUIZ_BIND",
        "POKEQUIZ_ROUND_SECONDS",
        "POKEQUIZ_MAX_ROUNDS",
        "POKEQUIZ_BASE_POINTS",
        "POKEQUIZ_SPEED_BONUS",
        "POKEQUIZ_LATE_GRACE_MS",
        "POKEQUIZ_ROOM_IDLE_SECONDS",
        "POKEQUIZ_DISCONNECT_GRACE_SECONDS",
        "POKEQUIZ_SWEEP_MS",
        "POKEQUIZ_ROOM_CODE_LENGTH",
    ];

    fn clear_env() {
        for key in KEYS {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = ServerConfig::from_env();
        assert_eq!(config.game, GameConfig::default());
        assert_eq!(config.game.late_grace, Duration::ZERO);
        assert_eq!(config.room_code_length, 4);
        assert_eq!(config.bind_addr.port(), 7420);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("POKEQUIZ_ROUND_SECONDS", "15");
        std::env::set_var("POKEQUIZ_MAX_ROUNDS", "3");
        std::env::set_var("POKEQUIZ_BIND", "127.0.0.1:9000");

        let config = ServerConfig::from_env();
        assert_eq!(config.game.round_time, Duration::from_secs(15));
        assert_eq!(config.game.max_rounds, 3);
        assert_eq!(config.bind_addr.port(), 9000);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_bad_values_fall_back() {
        clear_env();
        std::env::set_var("POKEQUIZ_MAX_ROUNDS", "lots");
        std::env::set_var("POKEQUIZ_ROOM_CODE_LENGTH", "40");

        let config = ServerConfig::from_env();
        assert_eq!(config.game.max_rounds, 10);
        assert_eq!(config.room_code_length, 8);
        clear_env();
    }
}
