mod attempt;
pub mod entry;
mod player;
pub mod registry;
pub mod report;
pub mod round;

use crate::config::GameConfig;
use crate::protocol::{Broadcast, ServerMessage};
use crate::source::EntrySource;
use crate::store::Store;
use crate::types::EntryId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

pub use registry::{Admission, ConnectionRegistry, Outbound, PlayerSession};
pub use report::{ModerationError, ReportAggregator, ReportOutcome};
pub use round::{MaskedAnswer, Round};

/// Shared application state.
///
/// Round state sits behind a single mutex: timer firings, attempts, reports
/// and fetch completions each hold it for one discrete operation. The
/// connection registry has its own lock. When both are needed the round lock
/// is always taken first.
pub struct AppState {
    pub config: Arc<GameConfig>,
    pub round: Arc<Mutex<Round>>,
    pub registry: ConnectionRegistry,
    pub reports: ReportAggregator,
    pub store: Arc<dyn Store>,
    pub source: Arc<dyn EntrySource>,
    /// Broadcast channel for every admitted connection
    pub broadcast: broadcast::Sender<Broadcast>,
    /// Whether the last provider fetch succeeded
    source_running: AtomicBool,
}

impl AppState {
    pub fn new(config: GameConfig, store: Arc<dyn Store>, source: Arc<dyn EntrySource>) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            config: Arc::new(config),
            round: Arc::new(Mutex::new(Round::new())),
            registry: ConnectionRegistry::new(),
            reports: ReportAggregator::new(store.clone()),
            store,
            source,
            broadcast: tx,
            source_running: AtomicBool::new(false),
        }
    }

    /// Send to every admitted connection
    pub fn broadcast(&self, msg: ServerMessage) {
        // Ignore send errors (no receivers connected is fine)
        let _ = self.broadcast.send(Broadcast::all(msg));
    }

    /// Send to every admitted connection except one
    pub fn broadcast_except(&self, msg: ServerMessage, connection_id: &crate::types::ConnectionId) {
        let _ = self.broadcast.send(Broadcast::except(msg, connection_id));
    }

    /// Entry currently being played, so moderation can leave it out of review
    pub async fn current_entry_id(&self) -> Option<EntryId> {
        self.round.lock().await.entry_id()
    }

    pub fn source_running(&self) -> bool {
        self.source_running.load(Ordering::Relaxed)
    }

    fn set_source_running(&self, running: bool) {
        self.source_running.store(running, Ordering::Relaxed);
    }
}
