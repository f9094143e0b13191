//! In-memory sink with the same observable semantics as the Postgres one:
//! unique identifiers, conflict-tolerant inserts, and writes that only become
//! visible on commit. Used by tests and dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use gradq_core::{CandidateRecord, Watermark};
use tracing::debug;

use crate::sink::{validate_view_name, IngestSink, SinkError, SinkTransaction};

#[derive(Debug, Default)]
struct MemoryState {
    records: Vec<CandidateRecord>,
    ids: HashSet<String>,
    watermarks: HashMap<String, Watermark>,
    refreshed_views: Vec<String>,
    commits: usize,
    rollbacks: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    fail_on_insert: Option<usize>,
    fail_on_commit: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th insert (1-based) of every transaction fail.
    pub fn fail_on_insert(mut self, n: usize) -> Self {
        self.fail_on_insert = Some(n);
        self
    }

    pub fn fail_on_commit(mut self) -> Self {
        self.fail_on_commit = true;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, SinkError> {
        lock_state(&self.state)
    }

    /// Committed records in insertion order.
    pub fn records(&self) -> Vec<CandidateRecord> {
        self.lock().map(|s| s.records.clone()).unwrap_or_default()
    }

    pub fn watermark(&self, source: &str) -> Option<Watermark> {
        self.lock().ok().and_then(|s| s.watermarks.get(source).cloned())
    }

    pub fn refreshed_views(&self) -> Vec<String> {
        self.lock().map(|s| s.refreshed_views.clone()).unwrap_or_default()
    }

    /// (commits, rollbacks) seen so far.
    pub fn transaction_counts(&self) -> (usize, usize) {
        self.lock().map(|s| (s.commits, s.rollbacks)).unwrap_or_default()
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, SinkError> {
    state
        .lock()
        .map_err(|_| SinkError::Rejected("memory sink lock poisoned".to_string()))
}

#[async_trait]
impl IngestSink for MemorySink {
    async fn begin(&self) -> Result<Box<dyn SinkTransaction>, SinkError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            fail_on_insert: self.fail_on_insert,
            fail_on_commit: self.fail_on_commit,
            inserts_attempted: 0,
            staged_records: Vec::new(),
            staged_ids: HashSet::new(),
            staged_watermarks: HashMap::new(),
            staged_refreshes: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    fail_on_insert: Option<usize>,
    fail_on_commit: bool,
    inserts_attempted: usize,
    staged_records: Vec<CandidateRecord>,
    staged_ids: HashSet<String>,
    staged_watermarks: HashMap<String, String>,
    staged_refreshes: Vec<String>,
}

#[async_trait]
impl SinkTransaction for MemoryTransaction {
    async fn read_watermark(&mut self, source: &str) -> Result<Option<String>, SinkError> {
        if let Some(staged) = self.staged_watermarks.get(source) {
            return Ok(Some(staged.clone()));
        }
        let state = lock_state(&self.state)?;
        Ok(state.watermarks.get(source).map(|w| w.last_seen.clone()))
    }

    async fn recent_identifiers(&mut self, limit: usize) -> Result<HashSet<String>, SinkError> {
        let state = lock_state(&self.state)?;
        Ok(state
            .records
            .iter()
            .chain(self.staged_records.iter())
            .rev()
            .filter_map(|r| r.external_id.clone())
            .take(limit)
            .collect())
    }

    async fn insert_record(&mut self, record: &CandidateRecord) -> Result<bool, SinkError> {
        self.inserts_attempted += 1;
        if self.fail_on_insert == Some(self.inserts_attempted) {
            return Err(SinkError::Rejected(format!(
                "injected failure on insert #{}",
                self.inserts_attempted
            )));
        }

        if let Some(id) = &record.external_id {
            let committed = lock_state(&self.state)?.ids.contains(id);
            if committed || !self.staged_ids.insert(id.clone()) {
                return Ok(false);
            }
        }
        self.staged_records.push(record.clone());
        Ok(true)
    }

    async fn upsert_watermark(&mut self, source: &str, last_seen: &str) -> Result<(), SinkError> {
        let stored = self.read_watermark(source).await?;
        if let Some(next) = Watermark::next_value(stored.as_deref(), Some(last_seen)) {
            self.staged_watermarks.insert(source.to_string(), next);
        }
        Ok(())
    }

    async fn refresh_materialized_view(&mut self, name: &str) -> Result<(), SinkError> {
        let name = validate_view_name(name)?;
        self.staged_refreshes.push(name.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), SinkError> {
        let this = *self;
        let mut state = lock_state(&this.state)?;
        if this.fail_on_commit {
            state.rollbacks += 1;
            return Err(SinkError::Rejected("injected commit failure".to_string()));
        }

        let mut applied = 0usize;
        for record in this.staged_records {
            if let Some(id) = &record.external_id {
                // a concurrent transaction may have committed the same id first
                if !state.ids.insert(id.clone()) {
                    continue;
                }
            }
            state.records.push(record);
            applied += 1;
        }

        let now = Utc::now();
        for (source, last_seen) in this.staged_watermarks {
            let stored = state.watermarks.get(&source).map(|w| w.last_seen.as_str());
            let Some(next) = Watermark::next_value(stored, Some(&last_seen)) else {
                continue;
            };
            state.watermarks.insert(
                source.clone(),
                Watermark {
                    source,
                    last_seen: next,
                    updated_at: now,
                },
            );
        }

        state.refreshed_views.extend(this.staged_refreshes);
        state.commits += 1;
        debug!(applied, "memory sink commit");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), SinkError> {
        let mut state = lock_state(&self.state)?;
        state.rollbacks += 1;
        Ok(())
    }
}
