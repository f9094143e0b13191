//! Incremental scan over the paginated listing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gradq_core::CandidateRecord;
use gradq_extract::RecordExtractor;
use gradq_fetch::PageFetcher;
use tracing::{info, warn};

/// Pause between two page fetches. The source throttles clients that skip it.
pub const POLITENESS_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A row's identifier was already ingested; everything older is assumed known.
    SeenExisting,
    /// The fetched page had no results table: end of listing, or a block page.
    NoResultsTable,
    PageCap,
    FetchFailed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SeenExisting => "seen_existing",
            Self::NoResultsTable => "no_results_table",
            Self::PageCap => "page_cap",
            Self::FetchFailed => "fetch_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// New records, in listing order across pages.
    pub records: Vec<CandidateRecord>,
    pub pages_fetched: u32,
    pub stop_reason: StopReason,
}

#[derive(Clone)]
pub struct ScanController {
    fetcher: Arc<dyn PageFetcher>,
    extractor: RecordExtractor,
    politeness: Duration,
}

impl ScanController {
    pub fn new(fetcher: Arc<dyn PageFetcher>, extractor: RecordExtractor) -> Self {
        Self {
            fetcher,
            extractor,
            politeness: POLITENESS_DELAY,
        }
    }

    pub fn with_politeness(mut self, politeness: Duration) -> Self {
        self.politeness = politeness;
        self
    }

    /// Walk pages 1..=`max_pages` collecting records until one is already in
    /// `existing`. Fetch errors end the scan early; whatever was collected is kept.
    pub async fn scan(&self, existing: &HashSet<String>, max_pages: u32) -> ScanOutcome {
        let mut records = Vec::new();
        let mut pages_fetched = 0u32;
        let mut stop_reason = StopReason::PageCap;

        'pages: for page in 1..=max_pages {
            if page > 1 {
                tokio::time::sleep(self.politeness).await;
            }

            let fetched = match self.fetcher.fetch_page(page).await {
                Ok(fetched) => fetched,
                Err(err) => {
                    warn!(page, error = %err, "page fetch failed; keeping partial scan");
                    stop_reason = StopReason::FetchFailed;
                    break;
                }
            };
            pages_fetched += 1;

            let Some(results) = self.extractor.parse_page(&fetched.body) else {
                stop_reason = StopReason::NoResultsTable;
                break;
            };

            for record in results.records() {
                let seen = record
                    .external_id
                    .as_ref()
                    .is_some_and(|id| existing.contains(id));
                if seen {
                    info!(page, external_id = ?record.external_id, "reached already-ingested record");
                    stop_reason = StopReason::SeenExisting;
                    break 'pages;
                }
                records.push(record);
            }
        }

        info!(
            pages_fetched,
            records = records.len(),
            stop_reason = stop_reason.as_str(),
            "scan finished"
        );
        ScanOutcome {
            records,
            pages_fetched,
            stop_reason,
        }
    }
}
