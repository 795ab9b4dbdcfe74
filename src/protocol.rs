use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "t",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Handshake frame, must be the first message on a connection
    Authenticate {
        token: String,
    },
    Attempt {
        message: String,
    },
    Reaction {
        emoji: String,
    },
    ReportEntry,
    RequestPlayerList,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "t",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Sent once to a connection when it is admitted
    Welcome(GameSnapshot),
    /// A new round started
    Round {
        entry_id: EntryId,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<String>,
        clue: String,
        /// Masked answer
        answer: String,
        current_value: f64,
    },
    /// One more letter revealed
    Split {
        answer: String,
        current_value: f64,
    },
    /// Full answer, the round is over without a winner
    Reveal {
        answer: String,
    },
    PeerAttempt(AttemptRecord),
    PeerJoin {
        player_id: PlayerId,
        username: String,
    },
    PeerLeft {
        player_id: PlayerId,
        username: String,
    },
    PeerReaction {
        player_id: PlayerId,
        username: String,
        emoji: String,
    },
    PlayerList {
        players: Vec<PublicPlayer>,
    },
    /// Private to the submitting connection
    CoinDiff {
        coin_diff: f64,
    },
    EntryReportedOk,
    EntryReportedError,
    /// Handshake rejected, the connection is closed right after
    Unauthorized {
        reason: String,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// State snapshot carried by WELCOME
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub phase: RoundPhase,
    pub coins: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<EntryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clue: Option<String>,
    /// Masked while revealing, full answer while transitioning
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub current_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_split_seconds: Option<u64>,
    pub total_split_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_attempts_left: Option<u32>,
    pub entry_reported: bool,
    pub players: usize,
    pub attempts: Vec<AttemptRecord>,
}

/// Envelope on the shared broadcast channel
#[derive(Debug, Clone)]
pub struct Broadcast {
    pub msg: ServerMessage,
    /// Connection that must not receive this message (e.g. the joiner itself)
    pub skip: Option<ConnectionId>,
}

impl Broadcast {
    pub fn all(msg: ServerMessage) -> Self {
        Self { msg, skip: None }
    }

    pub fn except(msg: ServerMessage, connection_id: &ConnectionId) -> Self {
        Self {
            msg,
            skip: Some(connection_id.clone()),
        }
    }

    pub fn is_for(&self, connection_id: &ConnectionId) -> bool {
        self.skip.as_ref() != Some(connection_id)
    }
}
