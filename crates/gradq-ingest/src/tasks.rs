//! Task handlers and the router that runs one of them per message inside a
//! single sink transaction.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use gradq_core::{MessageError, TaskKind, TaskMessage, TaskPayload};
use tracing::{info, warn};

use crate::ingest::apply_batch;
use crate::scan::ScanController;
use crate::sink::{IngestSink, SinkTransaction};

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, tx: &mut dyn SinkTransaction, payload: &TaskPayload) -> anyhow::Result<()>;
}

pub struct ScrapeNewDataHandler {
    scan: ScanController,
    source: String,
    max_pages: u32,
    existing_window: usize,
}

impl ScrapeNewDataHandler {
    pub fn new(scan: ScanController, source: impl Into<String>, max_pages: u32, existing_window: usize) -> Self {
        Self {
            scan,
            source: source.into(),
            max_pages,
            existing_window,
        }
    }

    /// Page cap for one task: the payload may lower the configured cap, never raise it.
    pub fn page_cap(&self, payload: &TaskPayload) -> u32 {
        payload
            .get("max_pages")
            .and_then(|v| v.as_u64())
            .filter(|n| *n > 0)
            .map(|n| n.min(u64::from(self.max_pages)) as u32)
            .unwrap_or(self.max_pages)
    }
}

#[async_trait]
impl TaskHandler for ScrapeNewDataHandler {
    async fn handle(&self, tx: &mut dyn SinkTransaction, payload: &TaskPayload) -> anyhow::Result<()> {
        let previous = tx
            .read_watermark(&self.source)
            .await
            .context("reading watermark")?;
        let existing = tx
            .recent_identifiers(self.existing_window)
            .await
            .context("loading recent identifiers")?;
        info!(
            source = %self.source,
            watermark = ?previous,
            existing = existing.len(),
            "starting incremental scan"
        );

        let scan = self.scan.scan(&existing, self.page_cap(payload)).await;
        let outcome = apply_batch(tx, &self.source, &scan.records)
            .await
            .context("applying scraped batch")?;

        info!(
            source = %self.source,
            pages = scan.pages_fetched,
            stop_reason = scan.stop_reason.as_str(),
            inserted = outcome.inserted,
            skipped = outcome.skipped(),
            watermark = ?outcome.watermark,
            "scrape handled"
        );
        Ok(())
    }
}

pub struct RecomputeAnalyticsHandler {
    view: String,
}

impl RecomputeAnalyticsHandler {
    pub fn new(view: impl Into<String>) -> Self {
        Self { view: view.into() }
    }
}

#[async_trait]
impl TaskHandler for RecomputeAnalyticsHandler {
    async fn handle(&self, tx: &mut dyn SinkTransaction, _payload: &TaskPayload) -> anyhow::Result<()> {
        tx.refresh_materialized_view(&self.view)
            .await
            .with_context(|| format!("refreshing {}", self.view))?;
        info!(view = %self.view, "analytics refreshed");
        Ok(())
    }
}

/// What the consumer should tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Discard without requeue.
    Reject,
}

pub struct TaskRouter {
    sink: Arc<dyn IngestSink>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRouter {
    pub fn new(sink: Arc<dyn IngestSink>) -> Self {
        Self {
            sink,
            handlers: HashMap::new(),
        }
    }

    pub fn with_handler(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Decode a raw delivery body and run it. Bodies that can never be handled
    /// are rejected before any handler or transaction is touched.
    pub async fn process(&self, body: &[u8]) -> Disposition {
        let message = match TaskMessage::decode(body) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "rejecting undeliverable message");
                return Disposition::Reject;
            }
        };

        tracing::Span::current().record("kind", message.kind.as_str());
        match self.run(&message).await {
            Ok(()) => {
                info!(kind = %message.kind, "task succeeded");
                Disposition::Ack
            }
            Err(err) => {
                warn!(kind = %message.kind, error = %format!("{err:#}"), "task failed; rejecting");
                Disposition::Reject
            }
        }
    }

    /// Run the handler for `message` in one transaction; commit on success,
    /// roll back on any error.
    pub async fn run(&self, message: &TaskMessage) -> anyhow::Result<()> {
        let handler = self
            .handlers
            .get(&message.kind)
            .cloned()
            .ok_or_else(|| MessageError::UnknownKind(message.kind.to_string()))?;

        let mut tx = self.sink.begin().await.context("opening transaction")?;
        if let Err(err) = handler.handle(tx.as_mut(), &message.payload).await {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            return Err(err);
        }
        tx.commit().await.context("committing transaction")?;
        Ok(())
    }
}
