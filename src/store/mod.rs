//! Persistent store collaborator: player records and entry reports.

mod memory;

use async_trait::async_trait;

use crate::types::{EntryId, PlayerId, PlayerRecord, ReportId, ReportRecord};

pub use memory::{MemoryStore, StoreSnapshot, SNAPSHOT_SCHEMA_VERSION};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_player(&self, id: &PlayerId) -> StoreResult<Option<PlayerRecord>>;

    /// Look a player up by handshake token
    async fn find_player_by_token(&self, token: &str) -> StoreResult<Option<PlayerRecord>>;

    async fn upsert_player(&self, player: PlayerRecord) -> StoreResult<()>;

    /// Returns true if a record was removed
    async fn delete_player(&self, id: &PlayerId) -> StoreResult<bool>;

    async fn find_report(&self, id: &ReportId) -> StoreResult<Option<ReportRecord>>;

    async fn find_report_by_entry(&self, entry_id: EntryId) -> StoreResult<Option<ReportRecord>>;

    /// Insert or replace; records are unique per entry id
    async fn upsert_report(&self, report: ReportRecord) -> StoreResult<()>;

    /// Returns true if a record was removed
    async fn delete_report(&self, id: &ReportId) -> StoreResult<bool>;

    async fn list_reports(&self) -> StoreResult<Vec<ReportRecord>>;
}
