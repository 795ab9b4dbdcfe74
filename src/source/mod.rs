mod jservice;

use async_trait::async_trait;
use std::time::Duration;

use crate::types::CandidateEntry;

pub use jservice::JServiceSource;

/// Result type for question provider operations
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors that can occur while fetching an entry.
///
/// All of them are transient from the round engine's point of view: the
/// fetch is retried after a fixed delay.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Response parsing failed: {0}")]
    Parse(String),

    #[error("Provider returned no entry")]
    Empty,
}

/// Supplier of random clue/answer/value tuples
#[async_trait]
pub trait EntrySource: Send + Sync {
    /// Fetch one random candidate entry
    async fn fetch_random_entry(&self) -> SourceResult<CandidateEntry>;

    /// Name of this source, for logs
    fn name(&self) -> &str;
}
