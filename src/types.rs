use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type ConnectionId = String;
pub type ReportId = String;
pub type EntryId = i64;

/// Timestamps are stored as ISO8601 strings, like everywhere else on the wire
pub type Timestamp = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    /// Fetching and validating a candidate entry
    Idle,
    /// Timer-driven letter reveal in progress
    Revealing,
    /// Round finished, waiting before the next fetch
    Transitioning,
}

/// Clue/answer/value tuple as delivered by the question provider.
///
/// Only mutated while being sanitized; discarded when rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    pub id: Option<EntryId>,
    pub category: Option<String>,
    pub clue: String,
    pub answer: String,
    /// Raw monetary value from the provider (None or 0 means "not assigned")
    pub value: Option<f64>,
}

/// The accepted entry for the active round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEntry {
    pub id: EntryId,
    pub category: Option<String>,
    pub clue: String,
    pub answer: String,
    /// Prize on the 10-100 unit scale, rounded to 2 decimals
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// 0-based index within the round's attempt log
    pub ordinal: usize,
    pub player_id: PlayerId,
    pub username: String,
    pub message: String,
    pub correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rights {
    #[default]
    Regular,
    Moderator,
    Admin,
}

/// Persistent player record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub username: String,
    pub coins: f64,
    #[serde(default)]
    pub rights: Rights,
    /// Handshake token resolved by the authenticator (never sent to clients)
    pub token: String,
    pub joined_at: Timestamp,
    pub last_seen_at: Timestamp,
}

impl PlayerRecord {
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: ulid::Ulid::new().to_string(),
            username: username.into(),
            coins: 0.0,
            rights: Rights::Regular,
            token: token.into(),
            joined_at: now.clone(),
            last_seen_at: now,
        }
    }
}

/// Public projection of a player (player lists, leaderboards)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicPlayer {
    pub id: PlayerId,
    pub username: String,
    pub coins: f64,
    pub rights: Rights,
    pub last_seen_at: Timestamp,
}

impl From<&PlayerRecord> for PublicPlayer {
    fn from(p: &PlayerRecord) -> Self {
        Self {
            id: p.id.clone(),
            username: p.username.clone(),
            coins: p.coins,
            rights: p.rights,
            last_seen_at: p.last_seen_at.clone(),
        }
    }
}

/// Abuse report filed against an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: ReportId,
    /// Unique per record
    pub entry_id: EntryId,
    pub category: Option<String>,
    pub clue: String,
    pub answer: String,
    /// Ordered, without duplicates
    pub reporters: Vec<PlayerId>,
    pub banned: bool,
    pub last_reported_at: Timestamp,
}

/// Round a monetary amount to 2 decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
