//! Ingestion side of the worker: incremental scan, transactional batch insert,
//! per-task handlers, and the sinks they write to.

pub mod config;
pub mod ingest;
pub mod memory;
pub mod pg;
pub mod scan;
pub mod seed;
pub mod sink;
pub mod tasks;

use std::sync::Arc;

use gradq_core::TaskKind;
use gradq_extract::RecordExtractor;
use gradq_fetch::{HttpPageFetcher, PageFetcher};

pub use config::IngestConfig;
pub use ingest::{apply_batch, ingest_records, IngestOutcome};
pub use memory::MemorySink;
pub use pg::PgSink;
pub use scan::{ScanController, ScanOutcome, StopReason, POLITENESS_DELAY};
pub use sink::{IngestSink, SinkError, SinkTransaction};
pub use tasks::{Disposition, RecomputeAnalyticsHandler, ScrapeNewDataHandler, TaskHandler, TaskRouter};

pub const CRATE_NAME: &str = "gradq-ingest";

/// Router with both task kinds wired to `sink` and the given page fetcher.
pub fn build_router(
    config: &IngestConfig,
    sink: Arc<dyn IngestSink>,
    fetcher: Arc<dyn PageFetcher>,
) -> TaskRouter {
    let scan = ScanController::new(fetcher, RecordExtractor::new(config.site_origin.clone()));
    TaskRouter::new(sink)
        .with_handler(
            TaskKind::ScrapeNewData,
            Arc::new(ScrapeNewDataHandler::new(
                scan,
                config.source_name.clone(),
                config.max_pages,
                config.existing_window,
            )),
        )
        .with_handler(
            TaskKind::RecomputeAnalytics,
            Arc::new(RecomputeAnalyticsHandler::new(config.analytics_view.clone())),
        )
}

/// Production router: HTTP fetcher against the live listing, Postgres sink.
pub async fn router_from_config(config: &IngestConfig) -> anyhow::Result<TaskRouter> {
    let sink = PgSink::connect(&config.database_url).await?;
    let fetcher = HttpPageFetcher::new(config.http_client_config())?;
    Ok(build_router(config, Arc::new(sink), Arc::new(fetcher)))
}
