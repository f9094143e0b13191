//! Storage seam for the ingestion worker.
//!
//! A handler only ever sees one [`SinkTransaction`]: every read and write it
//! issues lands in the same atomic unit, which the router commits or rolls back.

use std::collections::HashSet;

use async_trait::async_trait;
use gradq_core::CandidateRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid view name: {0:?}")]
    InvalidViewName(String),
    #[error("sink rejected operation: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait IngestSink: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SinkError>;
}

#[async_trait]
pub trait SinkTransaction: Send {
    async fn read_watermark(&mut self, source: &str) -> Result<Option<String>, SinkError>;

    /// Identifiers of the `limit` most recently inserted records.
    async fn recent_identifiers(&mut self, limit: usize) -> Result<HashSet<String>, SinkError>;

    /// Conflict-tolerant insert. `Ok(false)` means the identifier was already present.
    async fn insert_record(&mut self, record: &CandidateRecord) -> Result<bool, SinkError>;

    /// Advance the cursor for `source`; a smaller `last_seen` than the stored one is ignored.
    async fn upsert_watermark(&mut self, source: &str, last_seen: &str) -> Result<(), SinkError>;

    async fn refresh_materialized_view(&mut self, name: &str) -> Result<(), SinkError>;

    async fn commit(self: Box<Self>) -> Result<(), SinkError>;

    async fn rollback(self: Box<Self>) -> Result<(), SinkError>;
}

/// View names are interpolated into SQL, so only plain identifiers are accepted.
pub fn validate_view_name(name: &str) -> Result<&str, SinkError> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(SinkError::InvalidViewName(name.to_string()))
    }
}
