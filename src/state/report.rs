//! Entry reports and the ban list
//!
//! The store holds one record per entry id. The round keeps a per-round cache
//! of who already reported the live entry so repeated reports never hit the
//! store.

use chrono::{DateTime, FixedOffset, Utc};
use std::cmp::Reverse;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::AppState;
use crate::protocol::ServerMessage;
use crate::store::{Store, StoreError, StoreResult};
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("Report not found")]
    NotFound,

    #[error("Entry is already banned")]
    AlreadyBanned,

    #[error("Entry is not banned")]
    NotBanned,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a report did to the stored record
#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// First report for this entry
    Created(ReportRecord),
    /// Reporter added to an existing record
    Appended(ReportRecord),
    /// Reporter was already listed; nothing written
    AlreadyListed,
}

#[derive(Clone)]
pub struct ReportAggregator {
    store: Arc<dyn Store>,
    /// Held across every read-then-write of a report record
    write_lock: Arc<Mutex<()>>,
}

impl ReportAggregator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Ban predicate consulted before a round starts. Lookup failures count
    /// as not banned.
    pub async fn is_banned(&self, entry_id: EntryId) -> bool {
        match self.store.find_report_by_entry(entry_id).await {
            Ok(record) => record.is_some_and(|r| r.banned),
            Err(e) => {
                tracing::warn!(entry_id, "Ban lookup failed, assuming not banned: {}", e);
                false
            }
        }
    }

    /// File a report for `entry` on behalf of `reporter`
    pub async fn record(&self, entry: &RoundEntry, reporter: &PlayerId) -> StoreResult<ReportOutcome> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now().to_rfc3339();

        match self.store.find_report_by_entry(entry.id).await? {
            Some(mut record) => {
                if record.reporters.contains(reporter) {
                    return Ok(ReportOutcome::AlreadyListed);
                }
                record.reporters.push(reporter.clone());
                record.last_reported_at = now;
                self.store.upsert_report(record.clone()).await?;
                Ok(ReportOutcome::Appended(record))
            }
            None => {
                let record = ReportRecord {
                    id: ulid::Ulid::new().to_string(),
                    entry_id: entry.id,
                    category: entry.category.clone(),
                    clue: entry.clue.clone(),
                    answer: entry.answer.clone(),
                    reporters: vec![reporter.clone()],
                    banned: false,
                    last_reported_at: now,
                };
                self.store.upsert_report(record.clone()).await?;
                Ok(ReportOutcome::Created(record))
            }
        }
    }

    /// Reports awaiting moderation, most recently reported first.
    ///
    /// `banned` filters on the ban flag when set; `exclude` leaves out the
    /// entry that is live right now.
    pub async fn review_queue(
        &self,
        banned: Option<bool>,
        exclude: Option<EntryId>,
    ) -> StoreResult<Vec<ReportRecord>> {
        let mut reports: Vec<ReportRecord> = self
            .store
            .list_reports()
            .await?
            .into_iter()
            .filter(|r| banned.map_or(true, |b| r.banned == b))
            .filter(|r| Some(r.entry_id) != exclude)
            .collect();
        reports.sort_by_key(|r| Reverse(reported_at(r)));
        Ok(reports)
    }

    pub async fn ban(&self, id: &ReportId) -> Result<ReportRecord, ModerationError> {
        self.set_banned(id, true).await
    }

    pub async fn unban(&self, id: &ReportId) -> Result<ReportRecord, ModerationError> {
        self.set_banned(id, false).await
    }

    /// Drop a report without banning
    pub async fn dismiss(&self, id: &ReportId) -> Result<(), ModerationError> {
        let _guard = self.write_lock.lock().await;
        if self.store.delete_report(id).await? {
            tracing::info!(report_id = %id, "Report dismissed");
            Ok(())
        } else {
            Err(ModerationError::NotFound)
        }
    }

    async fn set_banned(&self, id: &ReportId, banned: bool) -> Result<ReportRecord, ModerationError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self
            .store
            .find_report(id)
            .await?
            .ok_or(ModerationError::NotFound)?;
        match (record.banned, banned) {
            (true, true) => return Err(ModerationError::AlreadyBanned),
            (false, false) => return Err(ModerationError::NotBanned),
            _ => {}
        }
        record.banned = banned;
        self.store.upsert_report(record.clone()).await?;
        tracing::info!(report_id = %id, entry_id = record.entry_id, banned, "Ban flag changed");
        Ok(record)
    }
}

fn reported_at(record: &ReportRecord) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(&record.last_reported_at).ok()
}

impl AppState {
    /// Report the live entry on behalf of a connection.
    ///
    /// The round lock is not held while the store is written (the aggregator
    /// serializes record updates); the reporter is only cached if the same
    /// entry is still live afterwards.
    pub async fn report_entry(&self, connection_id: &ConnectionId) -> Option<ServerMessage> {
        let session = self.registry.session(connection_id).await?;
        let player_id = session.player.id;

        let entry = {
            let round = self.round.lock().await;
            if round.has_reported(&player_id) {
                return Some(ServerMessage::EntryReportedOk);
            }
            match (round.phase(), round.entry()) {
                (RoundPhase::Revealing | RoundPhase::Transitioning, Some(entry)) => entry.clone(),
                _ => {
                    tracing::debug!(player_id = %player_id, "Report without a live entry");
                    return Some(ServerMessage::EntryReportedError);
                }
            }
        };

        match self.reports.record(&entry, &player_id).await {
            Ok(outcome) => {
                if let ReportOutcome::Created(_) | ReportOutcome::Appended(_) = outcome {
                    tracing::info!(entry_id = entry.id, player_id = %player_id, "Entry reported");
                }
                self.round.lock().await.mark_reported(entry.id, &player_id);
                Some(ServerMessage::EntryReportedOk)
            }
            Err(e) => {
                tracing::warn!(entry_id = entry.id, "Failed to save report: {}", e);
                Some(ServerMessage::EntryReportedError)
            }
        }
    }

    /// Moderation queue without the entry currently being played
    pub async fn review_reports(&self, banned: Option<bool>) -> StoreResult<Vec<ReportRecord>> {
        let live = self.current_entry_id().await;
        self.reports.review_queue(banned, live).await
    }
}
