use gradq_core::{max_external_id, CandidateRecord, Watermark};
use tracing::{info, warn};

use crate::sink::{IngestSink, SinkError, SinkTransaction};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub attempted: usize,
    pub inserted: usize,
    /// Cursor value after the batch; `None` when no record carried an identifier.
    pub watermark: Option<String>,
}

impl IngestOutcome {
    pub fn skipped(&self) -> usize {
        self.attempted - self.inserted
    }
}

/// Insert `records` and advance the watermark for `source`, inside the caller's
/// transaction. Nothing is committed here.
pub async fn apply_batch(
    tx: &mut dyn SinkTransaction,
    source: &str,
    records: &[CandidateRecord],
) -> Result<IngestOutcome, SinkError> {
    let mut inserted = 0usize;
    for record in records {
        if tx.insert_record(record).await? {
            inserted += 1;
        }
    }

    let watermark = match max_external_id(records) {
        Some(batch_max) => {
            let stored = tx.read_watermark(source).await?;
            tx.upsert_watermark(source, batch_max).await?;
            Watermark::next_value(stored.as_deref(), Some(batch_max))
        }
        None => None,
    };

    Ok(IngestOutcome {
        attempted: records.len(),
        inserted,
        watermark,
    })
}

/// One self-contained ingestion transaction: begin, apply, commit. Any failure
/// rolls the whole batch back.
pub async fn ingest_records(
    sink: &dyn IngestSink,
    source: &str,
    records: &[CandidateRecord],
) -> Result<IngestOutcome, SinkError> {
    let mut tx = sink.begin().await?;
    let outcome = match apply_batch(tx.as_mut(), source, records).await {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }
    };
    tx.commit().await?;

    info!(
        source,
        attempted = outcome.attempted,
        inserted = outcome.inserted,
        watermark = ?outcome.watermark,
        "ingestion committed"
    );
    Ok(outcome)
}
