//! Runtime configuration loaded from environment variables

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Characters that are never masked in the partial answer
pub const DEFAULT_EXCLUDED_CHARACTERS: &str = " .,:;!?'\"-&/";

/// Round engine tuning
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Time between two letter reveals
    pub split_interval: Duration,
    /// Pause between the end of a round and the next fetch
    pub round_end_delay: Duration,
    /// Fixed delay before retrying a failed provider fetch
    pub source_retry_interval: Duration,
    pub free_attempts_per_round: u32,
    pub extra_attempt_cost: f64,
    /// Maximum attempt length in characters
    pub attempt_max_length: usize,
    /// Lowercased denylist matched against clue, answer and category
    pub invalid_words: Vec<String>,
    pub excluded_characters: HashSet<char>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            split_interval: Duration::from_secs(15),
            round_end_delay: Duration::from_secs(8),
            source_retry_interval: Duration::from_secs(5),
            free_attempts_per_round: 3,
            extra_attempt_cost: 1.0,
            attempt_max_length: 100,
            invalid_words: Vec::new(),
            excluded_characters: DEFAULT_EXCLUDED_CHARACTERS.chars().collect(),
        }
    }
}

impl GameConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let invalid_words = env_string("INVALID_WORDS")
            .map(|words| {
                words
                    .split(',')
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.invalid_words);

        // Not trimmed: a space is a meaningful excluded character
        let excluded_characters = std::env::var("EXCLUDED_CHARACTERS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.chars().collect())
            .unwrap_or(defaults.excluded_characters);

        let config = Self {
            split_interval: env_secs("SPLIT_INTERVAL_SECS").unwrap_or(defaults.split_interval),
            round_end_delay: env_secs("ROUND_END_DELAY_SECS").unwrap_or(defaults.round_end_delay),
            source_retry_interval: env_secs("SOURCE_RETRY_INTERVAL_SECS")
                .unwrap_or(defaults.source_retry_interval),
            free_attempts_per_round: env_parse("FREE_ATTEMPTS_PER_ROUND")
                .unwrap_or(defaults.free_attempts_per_round),
            extra_attempt_cost: env_parse("EXTRA_ATTEMPT_COST")
                .filter(|cost: &f64| *cost >= 0.0)
                .unwrap_or(defaults.extra_attempt_cost),
            attempt_max_length: env_parse("ATTEMPT_MAX_LENGTH")
                .unwrap_or(defaults.attempt_max_length),
            invalid_words,
            excluded_characters,
        };

        tracing::info!(
            split_interval = ?config.split_interval,
            round_end_delay = ?config.round_end_delay,
            free_attempts = config.free_attempts_per_round,
            extra_attempt_cost = config.extra_attempt_cost,
            invalid_words = config.invalid_words.len(),
            "Game config loaded"
        );

        config
    }
}

/// Process-level settings (listener, collaborators)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Time a fresh connection has to send its AUTHENTICATE frame
    pub auth_timeout: Duration,
    pub source_base_url: String,
    pub source_timeout: Duration,
    /// Snapshot file for the store (None = memory only)
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3006,
            auth_timeout: Duration::from_secs(10),
            source_base_url: "http://localhost:3000".to_string(),
            source_timeout: Duration::from_secs(10),
            store_path: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT").unwrap_or(defaults.port),
            auth_timeout: env_secs("AUTH_TIMEOUT_SECS").unwrap_or(defaults.auth_timeout),
            source_base_url: env_string("ENTRY_SOURCE_URL").unwrap_or(defaults.source_base_url),
            source_timeout: env_secs("SOURCE_TIMEOUT_SECS").unwrap_or(defaults.source_timeout),
            store_path: env_string("STORE_PATH").map(PathBuf::from),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|s| s.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}
