//! Loader for previously scraped result dumps.
//!
//! Accepts a JSON array, newline-delimited objects, or objects simply
//! concatenated one after another. Keys follow the dump format
//! (`university`, `US/International`, `greScore`, ...).

use std::path::Path;

use anyhow::Context;
use gradq_core::{truncate_comment, CandidateRecord, Decision, Degree, Nationality};
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use crate::ingest::{ingest_records, IngestOutcome};
use crate::sink::IngestSink;

pub fn parse_seed(text: &str) -> Result<Vec<CandidateRecord>, serde_json::Error> {
    let mut out = Vec::new();
    for value in serde_json::Deserializer::from_str(text).into_iter::<JsonValue>() {
        match value? {
            JsonValue::Array(items) => {
                for item in items {
                    push_entry(&mut out, item);
                }
            }
            other => push_entry(&mut out, other),
        }
    }
    Ok(out)
}

fn push_entry(out: &mut Vec<CandidateRecord>, value: JsonValue) {
    match value {
        JsonValue::Object(entry) => out.push(record_from_entry(&entry)),
        other => warn!(entry = %other, "skipping non-object seed entry"),
    }
}

pub fn record_from_entry(entry: &Map<String, JsonValue>) -> CandidateRecord {
    let program = text(entry, "program").unwrap_or_default();
    let degree = text(entry, "degree")
        .map(|d| Degree::from_label(&d))
        .unwrap_or_else(|| Degree::classify(&program));

    CandidateRecord {
        external_id: text(entry, "url"),
        institution: text(entry, "university").unwrap_or_default(),
        degree,
        program,
        decision: text(entry, "status")
            .map(|s| Decision::from_label(&s))
            .unwrap_or(Decision::Unknown),
        decision_date: text(entry, "decisionDate"),
        listing_date: text(entry, "date_added").unwrap_or_default(),
        comment: text(entry, "comments")
            .map(|c| truncate_comment(&c))
            .unwrap_or_default(),
        term: text(entry, "term"),
        nationality: text(entry, "US/International").and_then(|n| Nationality::from_label(&n)),
        gpa: number(entry, "gpa"),
        gre_quant: number(entry, "greScore"),
        gre_verbal: number(entry, "greV"),
        gre_aw: number(entry, "greAW"),
        llm_generated_program: text(entry, "llm-generated-program"),
        llm_generated_university: text(entry, "llm-generated-university"),
    }
}

/// Non-empty string value; blanks count as missing.
fn text(entry: &Map<String, JsonValue>, key: &str) -> Option<String> {
    entry
        .get(key)
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// JSON number or numeric string.
fn number(entry: &Map<String, JsonValue>, key: &str) -> Option<f64> {
    match entry.get(key)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub async fn load_seed_file(path: &Path) -> anyhow::Result<Vec<CandidateRecord>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading seed file {}", path.display()))?;
    parse_seed(&text).with_context(|| format!("parsing seed file {}", path.display()))
}

/// Load a dump and push it through one ingestion transaction.
pub async fn seed_from_file(
    sink: &dyn IngestSink,
    source: &str,
    path: &Path,
) -> anyhow::Result<IngestOutcome> {
    let records = load_seed_file(path).await?;
    let outcome = ingest_records(sink, source, &records)
        .await
        .context("ingesting seed records")?;
    Ok(outcome)
}
