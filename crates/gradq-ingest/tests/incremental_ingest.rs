use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gradq_core::CandidateRecord;
use gradq_extract::RecordExtractor;
use gradq_fetch::{FetchError, FetchedPage, PageFetcher};
use gradq_ingest::{
    build_router, ingest_records, Disposition, IngestConfig, MemorySink, ScanController, StopReason,
};

const ORIGIN: &str = "https://www.thegradcafe.com";

struct FabricatedListing {
    pages: HashMap<u32, String>,
    calls: Mutex<Vec<u32>>,
}

impl FabricatedListing {
    fn new(pages: &[(u32, &[u32])]) -> Self {
        Self {
            pages: pages
                .iter()
                .map(|(page, ids)| (*page, listing_html(ids)))
                .collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for FabricatedListing {
    async fn fetch_page(&self, page: u32) -> Result<FetchedPage, FetchError> {
        self.calls.lock().unwrap().push(page);
        Ok(FetchedPage {
            page,
            url: format!("{ORIGIN}/survey/index.php?page={page}"),
            body: self
                .pages
                .get(&page)
                .cloned()
                .unwrap_or_else(|| "<html><body></body></html>".to_string()),
        })
    }
}

fn listing_html(ids: &[u32]) -> String {
    let mut rows = String::from("<tr><th>School</th><th>Program</th></tr>");
    for id in ids {
        rows.push_str(&format!(
            r#"<tr><td>University {id}Report</td><td>Mathematics PhD</td><td>March 0{d}, 2026</td><td>Accepted on 1 Mar</td><td><a href="/result/{id}">See More</a></td></tr>
               <tr><td>Fall 2026 American GPA 3.{d}0</td></tr>"#,
            d = id % 10
        ));
    }
    format!("<html><body><table>{rows}</table></body></html>")
}

fn result_url(id: u32) -> String {
    format!("{ORIGIN}/result/{id}")
}

#[tokio::test(start_paused = true)]
async fn scan_then_ingest_stops_on_first_known_record() {
    let fetcher = Arc::new(FabricatedListing::new(&[
        (1, &[503, 502, 501]),
        (2, &[500, 499, 498]),
        (3, &[497]),
    ]));
    let scan = ScanController::new(fetcher.clone(), RecordExtractor::new(ORIGIN));
    let existing = HashSet::from([result_url(500), result_url(499)]);

    let outcome = scan.scan(&existing, 50).await;

    assert_eq!(outcome.stop_reason, StopReason::SeenExisting);
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(fetcher.calls(), vec![1, 2]);

    let sink = MemorySink::new();
    let ingested = ingest_records(&sink, "gradcafe", &outcome.records)
        .await
        .unwrap();
    assert_eq!(ingested.inserted, 3);
    assert_eq!(ingested.watermark, Some(result_url(503)));
    assert_eq!(
        sink.watermark("gradcafe").unwrap().last_seen,
        result_url(503)
    );

    let stored = sink
        .records()
        .into_iter()
        .filter_map(|r| r.external_id)
        .collect::<Vec<_>>();
    assert_eq!(stored, vec![result_url(503), result_url(502), result_url(501)]);
}

#[tokio::test(start_paused = true)]
async fn scrape_task_uses_recent_identifiers_from_the_sink() {
    let sink = MemorySink::new();
    let previously_seen = [498u32, 499, 500]
        .into_iter()
        .map(|id| CandidateRecord::new("Earlier", "Physics PhD").with_external_id(result_url(id)))
        .collect::<Vec<_>>();
    ingest_records(&sink, "gradcafe", &previously_seen).await.unwrap();

    let fetcher = Arc::new(FabricatedListing::new(&[
        (1, &[503, 502, 501]),
        (2, &[500, 499, 498]),
    ]));
    let config = IngestConfig::default();
    let router = build_router(&config, Arc::new(sink.clone()), fetcher.clone());

    let disposition = router
        .process(br#"{"kind":"scrape_new_data","ts":"2026-03-01T12:00:00Z","payload":{}}"#)
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(fetcher.calls(), vec![1, 2]);
    assert_eq!(sink.records().len(), 6);
    assert_eq!(
        sink.watermark("gradcafe").unwrap().last_seen,
        result_url(503)
    );

    // redelivery of the same task is absorbed by the conflict-tolerant insert
    let again = router
        .process(br#"{"kind":"scrape_new_data","payload":{}}"#)
        .await;
    assert_eq!(again, Disposition::Ack);
    assert_eq!(sink.records().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn payload_can_lower_the_page_cap() {
    let sink = MemorySink::new();
    let fetcher = Arc::new(FabricatedListing::new(&[
        (1, &[503]),
        (2, &[502]),
        (3, &[501]),
    ]));
    let router = build_router(&IngestConfig::default(), Arc::new(sink.clone()), fetcher.clone());

    let disposition = router
        .process(br#"{"kind":"scrape_new_data","payload":{"max_pages":2}}"#)
        .await;

    assert_eq!(disposition, Disposition::Ack);
    assert_eq!(fetcher.calls(), vec![1, 2]);
    assert_eq!(sink.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failing_sink_leaves_no_partial_batch() {
    let sink = MemorySink::new();
    let fetcher = Arc::new(FabricatedListing::new(&[(1, &[503, 502, 501])]));
    let router = build_router(
        &IngestConfig::default(),
        Arc::new(sink.clone().fail_on_insert(3)),
        fetcher,
    );

    let disposition = router
        .process(br#"{"kind":"scrape_new_data","payload":{}}"#)
        .await;

    assert_eq!(disposition, Disposition::Reject);
    assert!(sink.records().is_empty());
    assert!(sink.watermark("gradcafe").is_none());
}
