//! Handshake authentication for game connections
//!
//! Token verification against an identity provider happens elsewhere; by the
//! time a token reaches this module it has been exchanged for a player record
//! in the store. This module only resolves the token to that record.

use async_trait::async_trait;
use std::sync::Arc;

use crate::store::{Store, StoreError};
use crate::types::PlayerRecord;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No token passed")]
    MissingToken,

    #[error("Unknown token")]
    UnknownToken,

    #[error("Player lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Resolves a handshake token to a player identity
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<PlayerRecord, AuthError>;
}

/// Authenticator that looks tokens up in the player store
pub struct StoreAuthenticator {
    store: Arc<dyn Store>,
}

impl StoreAuthenticator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Authenticator for StoreAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<PlayerRecord, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.store
            .find_player_by_token(token)
            .await?
            .ok_or(AuthError::UnknownToken)
    }
}
