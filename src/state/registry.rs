//! Live connection registry
//!
//! Maps connection ids to the player they authenticated as. A player has at
//! most one admitted connection: admitting a second one evicts the first and
//! inherits its live data (balance, join order).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::ServerMessage;
use crate::types::*;

/// Message for one specific connection, outside the broadcast channel
#[derive(Debug, Clone)]
pub enum Outbound {
    Message(ServerMessage),
    /// Close the socket (eviction, moderation)
    Close,
}

#[derive(Debug, Clone)]
pub struct PlayerSession {
    pub connection_id: ConnectionId,
    /// Live copy of the player; `coins` is authoritative while connected
    pub player: PlayerRecord,
    /// Admission order, used to break ties in player lists
    pub seq: u64,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl PlayerSession {
    pub fn send(&self, msg: Outbound) -> bool {
        self.outbound.send(msg).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// First connection for this player
    Joined { player: PlayerRecord },
    /// Replaced `evicted` older connections of the same player
    Resumed { player: PlayerRecord, evicted: usize },
    /// This connection was admitted before; nothing changed
    AlreadyInitialized,
}

impl Admission {
    pub fn player(&self) -> Option<&PlayerRecord> {
        match self {
            Admission::Joined { player } | Admission::Resumed { player, .. } => Some(player),
            Admission::AlreadyInitialized => None,
        }
    }
}

/// Result of removing a connection
#[derive(Debug, Clone)]
pub struct Departure {
    pub player: PlayerRecord,
    /// Another connection of the same player is still admitted
    pub still_present: bool,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ConnectionId, PlayerSession>,
    next_seq: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit an authenticated connection
    pub async fn admit(
        &self,
        connection_id: &ConnectionId,
        player: PlayerRecord,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Admission {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(connection_id) {
            return Admission::AlreadyInitialized;
        }

        let stale: Vec<ConnectionId> = inner
            .sessions
            .values()
            .filter(|s| s.player.id == player.id)
            .map(|s| s.connection_id.clone())
            .collect();
        let mut evicted: Vec<PlayerSession> = stale
            .iter()
            .filter_map(|id| inner.sessions.remove(id))
            .collect();
        evicted.sort_by_key(|s| s.seq);

        for session in &evicted {
            tracing::info!(
                player_id = %session.player.id,
                connection_id = %session.connection_id,
                "Evicting previous connection"
            );
            session.send(Outbound::Close);
        }

        let (player, seq) = match evicted.first() {
            Some(previous) => (previous.player.clone(), previous.seq),
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                (player, seq)
            }
        };

        inner.sessions.insert(
            connection_id.clone(),
            PlayerSession {
                connection_id: connection_id.clone(),
                player: player.clone(),
                seq,
                outbound,
            },
        );

        if evicted.is_empty() {
            Admission::Joined { player }
        } else {
            Admission::Resumed {
                player,
                evicted: evicted.len(),
            }
        }
    }

    /// Remove a connection. None if it was already evicted.
    pub async fn remove(&self, connection_id: &ConnectionId) -> Option<Departure> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.remove(connection_id)?;
        let still_present = inner
            .sessions
            .values()
            .any(|s| s.player.id == session.player.id);
        Some(Departure {
            player: session.player,
            still_present,
        })
    }

    /// What removing the connection would look like, without removing it
    pub async fn peek_departure(&self, connection_id: &ConnectionId) -> Option<Departure> {
        let inner = self.inner.read().await;
        let session = inner.sessions.get(connection_id)?;
        let still_present = inner
            .sessions
            .values()
            .any(|s| s.player.id == session.player.id && s.connection_id != *connection_id);
        Some(Departure {
            player: session.player.clone(),
            still_present,
        })
    }

    pub async fn session(&self, connection_id: &ConnectionId) -> Option<PlayerSession> {
        self.inner.read().await.sessions.get(connection_id).cloned()
    }

    /// Deduct `cost` from the connection's player. None if the balance
    /// would go negative (nothing is changed then).
    pub async fn charge(&self, connection_id: &ConnectionId, cost: f64) -> Option<f64> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(connection_id)?;
        let remaining = round2(session.player.coins - cost);
        if remaining < 0.0 {
            return None;
        }
        session.player.coins = remaining;
        Some(remaining)
    }

    pub async fn credit(&self, connection_id: &ConnectionId, amount: f64) -> Option<f64> {
        let mut inner = self.inner.write().await;
        let session = inner.sessions.get_mut(connection_id)?;
        session.player.coins = round2(session.player.coins + amount);
        Some(session.player.coins)
    }

    /// Send to one connection
    pub async fn send_to(&self, connection_id: &ConnectionId, msg: ServerMessage) -> bool {
        self.inner
            .read()
            .await
            .sessions
            .get(connection_id)
            .is_some_and(|s| s.send(Outbound::Message(msg)))
    }

    /// Distinct connected players, richest first, then by join order
    pub async fn playing_players(&self) -> Vec<PublicPlayer> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<&PlayerSession> = inner.sessions.values().collect();
        sessions.sort_by(|a, b| {
            b.player
                .coins
                .total_cmp(&a.player.coins)
                .then(a.seq.cmp(&b.seq))
        });

        let mut seen = HashSet::new();
        sessions
            .into_iter()
            .filter(|s| seen.insert(s.player.id.clone()))
            .map(|s| PublicPlayer::from(&s.player))
            .collect()
    }

    /// Number of distinct connected players
    pub async fn player_count(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .map(|s| &s.player.id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Close every connection of a player. Returns how many were closed.
    pub async fn disconnect_player(&self, player_id: &PlayerId) -> usize {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|s| &s.player.id == player_id)
            .filter(|s| s.send(Outbound::Close))
            .count()
    }

    pub async fn disconnect_all(&self) -> usize {
        let inner = self.inner.read().await;
        inner
            .sessions
            .values()
            .filter(|s| s.send(Outbound::Close))
            .count()
    }

    /// Update rights on the live sessions of a player
    pub async fn set_rights(&self, player_id: &PlayerId, rights: Rights) -> bool {
        let mut inner = self.inner.write().await;
        let mut found = false;
        for session in inner
            .sessions
            .values_mut()
            .filter(|s| &s.player.id == player_id)
        {
            session.player.rights = rights;
            found = true;
        }
        found
    }
}
