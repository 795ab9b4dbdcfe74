//! WebSocket message dispatch
//!
//! Only admitted connections get here; the handshake already happened in
//! [`super::handle_socket`].

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::ConnectionId;
use std::sync::Arc;

/// Handle client messages and return the optional private reply
pub async fn handle_message(
    msg: ClientMessage,
    connection_id: &ConnectionId,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Authenticate { .. } => {
            tracing::debug!(connection_id = %connection_id, "Already authenticated, ignoring request");
            None
        }

        ClientMessage::Attempt { message } => state.submit_attempt(connection_id, message).await,

        ClientMessage::Reaction { emoji } => {
            state.react(connection_id, emoji).await;
            None
        }

        ClientMessage::ReportEntry => state.report_entry(connection_id).await,

        ClientMessage::RequestPlayerList => Some(state.player_list().await),
    }
}
