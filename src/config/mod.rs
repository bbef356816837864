//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated, empty = any)
    pub client_origin: String,
    /// Engine tunables handed to the game manager
    pub game: GameSettings,
}

/// Tunables for matchmaking and match simulation
#[derive(Clone, Debug)]
pub struct GameSettings {
    /// Physics ticks per second
    pub tick_rate: u32,
    /// Round wins needed to take the match
    pub max_score: u32,
    /// Smallest stake (in atoms) a room may be opened with
    pub min_bet_amount: i64,
    /// Allow zero-stake rooms
    pub free_play: bool,
    /// How often each waiting room checks for a ready pair
    pub room_poll_interval: Duration,
    /// Capacity of the per-match frame queue
    pub frame_buffer: usize,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_score: 3,
            min_bet_amount: 0,
            free_play: false,
            room_poll_interval: Duration::from_secs(1),
            frame_buffer: 64,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR for hosted deployments
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameSettings::default();
        let game = GameSettings {
            tick_rate: parse_var("TICK_RATE", defaults.tick_rate)?,
            max_score: parse_var("MAX_SCORE", defaults.max_score)?,
            min_bet_amount: parse_var("MIN_BET_AMOUNT", defaults.min_bet_amount)?,
            free_play: parse_var("FREE_PLAY", defaults.free_play)?,
            room_poll_interval: Duration::from_millis(parse_var(
                "ROOM_POLL_MS",
                defaults.room_poll_interval.as_millis() as u64,
            )?),
            frame_buffer: parse_var("FRAME_BUFFER", defaults.frame_buffer)?,
        };

        if game.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if game.max_score == 0 {
            return Err(ConfigError::Invalid("MAX_SCORE"));
        }
        if game.frame_buffer == 0 {
            return Err(ConfigError::Invalid("FRAME_BUFFER"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_default(),
            game,
        })
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
