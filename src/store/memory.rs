//! In-memory store with optional JSON snapshot persistence.
//!
//! Without a path the store lives purely in memory (tests, dev). With a path
//! the full snapshot is loaded at startup and rewritten after every mutation.

use super::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

/// Schema version for snapshot compatibility
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Serializable image of the whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,
    /// ISO8601
    pub exported_at: String,
    #[serde(default)]
    pub players: HashMap<PlayerId, PlayerRecord>,
    #[serde(default)]
    pub reports: HashMap<ReportId, ReportRecord>,
}

#[derive(Debug, Default)]
struct Tables {
    players: HashMap<PlayerId, PlayerRecord>,
    reports: HashMap<ReportId, ReportRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    path: Option<PathBuf>,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a snapshot-backed store. A missing file yields an empty store.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
                if snapshot.schema_version > SNAPSHOT_SCHEMA_VERSION {
                    return Err(StoreError::Unavailable(format!(
                        "Snapshot schema version {} is newer than supported version {}",
                        snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
                    )));
                }
                tracing::info!(
                    players = snapshot.players.len(),
                    reports = snapshot.reports.len(),
                    "Loaded store snapshot from {}",
                    path.display()
                );
                Tables {
                    players: snapshot.players,
                    reports: snapshot.reports,
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No store snapshot at {}, starting empty", path.display());
                Tables::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            tables: RwLock::new(tables),
            path: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        let tables = self.tables.read().await;
        StoreSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            exported_at: chrono::Utc::now().to_rfc3339(),
            players: tables.players.clone(),
            reports: tables.reports.clone(),
        }
    }

    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let json = serde_json::to_string_pretty(&self.snapshot().await)?;
        // Write-then-rename so a crash never leaves a truncated snapshot
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_player(&self, id: &PlayerId) -> StoreResult<Option<PlayerRecord>> {
        Ok(self.tables.read().await.players.get(id).cloned())
    }

    async fn find_player_by_token(&self, token: &str) -> StoreResult<Option<PlayerRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .players
            .values()
            .find(|p| p.token == token)
            .cloned())
    }

    async fn upsert_player(&self, player: PlayerRecord) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .players
            .insert(player.id.clone(), player);
        self.persist().await
    }

    async fn delete_player(&self, id: &PlayerId) -> StoreResult<bool> {
        let removed = self.tables.write().await.players.remove(id).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn find_report(&self, id: &ReportId) -> StoreResult<Option<ReportRecord>> {
        Ok(self.tables.read().await.reports.get(id).cloned())
    }

    async fn find_report_by_entry(&self, entry_id: EntryId) -> StoreResult<Option<ReportRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .reports
            .values()
            .find(|r| r.entry_id == entry_id)
            .cloned())
    }

    async fn upsert_report(&self, report: ReportRecord) -> StoreResult<()> {
        {
            let mut tables = self.tables.write().await;
            // Keep entry ids unique across records
            tables
                .reports
                .retain(|id, r| r.entry_id != report.entry_id || *id == report.id);
            tables.reports.insert(report.id.clone(), report);
        }
        self.persist().await
    }

    async fn delete_report(&self, id: &ReportId) -> StoreResult<bool> {
        let removed = self.tables.write().await.reports.remove(id).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn list_reports(&self) -> StoreResult<Vec<ReportRecord>> {
        Ok(self.tables.read().await.reports.values().cloned().collect())
    }
}
