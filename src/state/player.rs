use tokio::sync::mpsc;

use super::registry::{Admission, Outbound};
use super::AppState;
use crate::protocol::{GameSnapshot, ServerMessage};
use crate::store::StoreResult;
use crate::types::*;

impl AppState {
    /// Admit an authenticated connection and build its WELCOME.
    ///
    /// Returns None when the connection was admitted before (repeated
    /// handshake), in which case nothing is sent or broadcast.
    pub async fn join(
        &self,
        connection_id: &ConnectionId,
        player: PlayerRecord,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Option<ServerMessage> {
        let admission = self.registry.admit(connection_id, player, outbound).await;
        match &admission {
            Admission::Joined { player } => {
                tracing::info!(player_id = %player.id, username = %player.username, "Player joined");
                self.broadcast_except(
                    ServerMessage::PeerJoin {
                        player_id: player.id.clone(),
                        username: player.username.clone(),
                    },
                    connection_id,
                );
            }
            Admission::Resumed { player, evicted } => {
                tracing::info!(
                    player_id = %player.id,
                    username = %player.username,
                    evicted,
                    "Player reconnected"
                );
            }
            Admission::AlreadyInitialized => {
                tracing::debug!(connection_id = %connection_id, "Repeated handshake ignored");
                return None;
            }
        }

        self.welcome(connection_id).await
    }

    /// State snapshot for one admitted connection
    pub async fn welcome(&self, connection_id: &ConnectionId) -> Option<ServerMessage> {
        let round = self.round.lock().await;
        let session = self.registry.session(connection_id).await?;
        let players = self.registry.player_count().await;
        let player = session.player;

        let revealing = round.phase() == RoundPhase::Revealing;
        let entry = round.entry();

        Some(ServerMessage::Welcome(GameSnapshot {
            phase: round.phase(),
            coins: player.coins,
            entry_id: entry.map(|e| e.id),
            category: entry.and_then(|e| e.category.clone()),
            clue: entry.map(|e| e.clue.clone()),
            answer: round.visible_answer(),
            current_value: round.current_value(),
            elapsed_split_seconds: if revealing {
                round.split_timer.elapsed_secs()
            } else {
                None
            },
            total_split_seconds: self.config.split_interval.as_secs(),
            free_attempts_left: revealing
                .then(|| round.free_attempts_left(&player.id, self.config.free_attempts_per_round)),
            entry_reported: round.has_reported(&player.id),
            players,
            attempts: round.attempts().to_vec(),
        }))
    }

    /// Connection closed. Only the player's last connection persists the
    /// balance and announces the departure.
    ///
    /// The session stays registered until the balance is saved, so a
    /// reconnect during the save resumes it instead of loading the stored
    /// (older) balance.
    pub async fn handle_disconnect(&self, connection_id: &ConnectionId) {
        let Some(departure) = self.registry.peek_departure(connection_id).await else {
            // Evicted by a newer connection of the same player
            return;
        };
        if departure.still_present {
            self.registry.remove(connection_id).await;
            return;
        }

        let player = departure.player;
        self.save_balance(&player).await;

        match self.registry.remove(connection_id).await {
            Some(departure) if !departure.still_present => {}
            _ => {
                tracing::debug!(player_id = %player.id, "Player reconnected while leaving");
                return;
            }
        }

        tracing::info!(player_id = %player.id, username = %player.username, "Player left");
        self.broadcast(ServerMessage::PeerLeft {
            player_id: player.id,
            username: player.username,
        });
    }

    /// Write the live balance and last-seen time back to the store
    async fn save_balance(&self, player: &PlayerRecord) {
        match self.store.find_player(&player.id).await {
            Ok(Some(mut stored)) => {
                stored.coins = player.coins;
                stored.last_seen_at = chrono::Utc::now().to_rfc3339();
                if let Err(e) = self.store.upsert_player(stored).await {
                    tracing::warn!(player_id = %player.id, "Failed to save player on disconnect: {}", e);
                }
            }
            Ok(None) => {
                tracing::debug!(player_id = %player.id, "Player no longer stored, skipping save");
            }
            Err(e) => {
                tracing::warn!(player_id = %player.id, "Failed to load player on disconnect: {}", e);
            }
        }
    }

    pub async fn react(&self, connection_id: &ConnectionId, emoji: String) {
        if emoji.is_empty() {
            return;
        }
        if let Some(session) = self.registry.session(connection_id).await {
            self.broadcast(ServerMessage::PeerReaction {
                player_id: session.player.id,
                username: session.player.username,
                emoji,
            });
        }
    }

    pub async fn player_list(&self) -> ServerMessage {
        ServerMessage::PlayerList {
            players: self.registry.playing_players().await,
        }
    }

    /// Delete a player account and close its connections
    pub async fn delete_player(&self, player_id: &PlayerId) -> StoreResult<bool> {
        let deleted = self.store.delete_player(player_id).await?;
        let closed = self.registry.disconnect_player(player_id).await;
        tracing::info!(player_id = %player_id, deleted, closed, "Player deleted");
        Ok(deleted)
    }

    /// Change rights in the store and on live sessions. False if the player
    /// is unknown.
    pub async fn set_player_rights(&self, player_id: &PlayerId, rights: Rights) -> StoreResult<bool> {
        let Some(mut stored) = self.store.find_player(player_id).await? else {
            return Ok(false);
        };
        stored.rights = rights;
        self.store.upsert_player(stored).await?;
        self.registry.set_rights(player_id, rights).await;
        tracing::info!(player_id = %player_id, ?rights, "Player rights changed");
        Ok(true)
    }

    /// Close every connection; returns how many were told to close
    pub async fn disconnect_everyone(&self) -> usize {
        let count = self.registry.disconnect_all().await;
        tracing::info!("Sent the disconnect signal to {} connections", count);
        count
    }
}
