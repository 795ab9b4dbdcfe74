//! Attempt pricing and correctness

use std::sync::Arc;

use super::AppState;
use crate::protocol::ServerMessage;
use crate::types::*;

impl AppState {
    /// Process a guess from a connection.
    ///
    /// Empty or oversized messages, attempts outside a revealing round and
    /// attempts the player cannot pay for are dropped without any effect.
    /// Returns the private COIN_DIFF for the submitter, if the balance moved.
    pub async fn submit_attempt(
        self: &Arc<Self>,
        connection_id: &ConnectionId,
        message: String,
    ) -> Option<ServerMessage> {
        if message.is_empty() {
            return None;
        }
        let session = self.registry.session(connection_id).await?;
        let player = session.player;

        let length = message.chars().count();
        if length > self.config.attempt_max_length {
            tracing::debug!(
                player_id = %player.id,
                "Attempt of {} characters exceeds the limit of {}, ignoring",
                length,
                self.config.attempt_max_length
            );
            return None;
        }

        let mut round = self.round.lock().await;
        if round.phase() != RoundPhase::Revealing {
            return None;
        }

        // Attempts of one connection are handled in order, so the balance
        // read with the session is still current here
        let initial = player.coins;
        let mut current = initial;

        if round.free_attempts_left(&player.id, self.config.free_attempts_per_round) == 0 {
            match self
                .registry
                .charge(connection_id, self.config.extra_attempt_cost)
                .await
            {
                Some(remaining) => current = remaining,
                None => {
                    tracing::debug!(player_id = %player.id, "Attempt not affordable, ignoring");
                    return None;
                }
            }
        }

        let correct = round.is_correct(&message);
        if correct {
            let prize = round.current_value();
            if prize > 0.0 {
                if let Some(balance) = self.registry.credit(connection_id, prize).await {
                    current = balance;
                }
            }
            tracing::info!(
                player_id = %player.id,
                username = %player.username,
                prize,
                "Correct attempt"
            );
            self.finish_round(&mut round);
        }

        let record = round.record_attempt(&player.id, &player.username, message, correct);
        self.broadcast(ServerMessage::PeerAttempt(record));

        let coin_diff = round2(current - initial);
        (coin_diff != 0.0).then_some(ServerMessage::CoinDiff { coin_diff })
    }
}

