//! Core domain model and task envelope for gradq.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

pub const CRATE_NAME: &str = "gradq-core";

/// Applicant comments are capped to this many characters.
pub const COMMENT_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Degree {
    PhD,
    Masters,
    Other,
}

impl Degree {
    /// Case-sensitive substring match on the program text; "PhD" wins over "Masters".
    pub fn classify(program: &str) -> Self {
        if program.contains("PhD") {
            Self::PhD
        } else if program.contains("Masters") {
            Self::Masters
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhD => "PhD",
            Self::Masters => "Masters",
            Self::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "PhD" => Self::PhD,
            "Masters" => Self::Masters,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Accepted,
    Rejected,
    WaitListed,
    Interview,
    Unknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::WaitListed => "Wait listed",
            Self::Interview => "Interview",
            Self::Unknown => "Unknown",
        }
    }

    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_ascii_lowercase();
        match lower.as_str() {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "wait listed" | "waitlisted" | "wait-listed" => Self::WaitListed,
            "interview" => Self::Interview,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nationality {
    American,
    International,
    Other,
}

impl Nationality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::American => "American",
            Self::International => "International",
            Self::Other => "Other",
        }
    }

    /// `None` means the label carried no classification at all.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "" => None,
            "American" => Some(Self::American),
            "International" => Some(Self::International),
            _ => Some(Self::Other),
        }
    }
}

/// One parsed admissions-result entry, as produced by the extractor or the seed loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Canonical result URL; the dedup key in the sink.
    pub external_id: Option<String>,
    pub institution: String,
    pub program: String,
    pub degree: Degree,
    pub decision: Decision,
    pub decision_date: Option<String>,
    pub listing_date: String,
    pub comment: String,
    pub term: Option<String>,
    pub nationality: Option<Nationality>,
    pub gpa: Option<f64>,
    pub gre_quant: Option<f64>,
    pub gre_verbal: Option<f64>,
    pub gre_aw: Option<f64>,
    #[serde(default)]
    pub llm_generated_program: Option<String>,
    #[serde(default)]
    pub llm_generated_university: Option<String>,
}

impl CandidateRecord {
    pub fn new(institution: impl Into<String>, program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            external_id: None,
            institution: institution.into(),
            degree: Degree::classify(&program),
            program,
            decision: Decision::Unknown,
            decision_date: None,
            listing_date: String::new(),
            comment: String::new(),
            term: None,
            nationality: None,
            gpa: None,
            gre_quant: None,
            gre_verbal: None,
            gre_aw: None,
            llm_generated_program: None,
            llm_generated_university: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

pub fn truncate_comment(text: &str) -> String {
    text.chars().take(COMMENT_MAX_CHARS).collect()
}

/// Greatest external identifier in the batch, by byte-wise string order.
pub fn max_external_id<'a, I>(records: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a CandidateRecord>,
{
    records
        .into_iter()
        .filter_map(|r| r.external_id.as_deref())
        .max()
}

/// Per-source ingestion cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub source: String,
    pub last_seen: String,
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    /// Value the cursor should hold after a batch whose greatest identifier is
    /// `batch_max`. Never moves backwards; `None` means no write is needed.
    pub fn next_value(stored: Option<&str>, batch_max: Option<&str>) -> Option<String> {
        let batch_max = batch_max?;
        match stored {
            Some(current) if current >= batch_max => Some(current.to_string()),
            _ => Some(batch_max.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    ScrapeNewData,
    RecomputeAnalytics,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::ScrapeNewData, TaskKind::RecomputeAnalytics];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScrapeNewData => "scrape_new_data",
            Self::RecomputeAnalytics => "recompute_analytics",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MessageError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed task message: {0}")]
    Malformed(String),
    #[error("unknown task kind: {0}")]
    UnknownKind(String),
}

pub type TaskPayload = Map<String, JsonValue>;

/// Asynchronous work request as carried on the broker.
///
/// The body on the wire is `{"kind": .., "ts": .., "payload": {..}}`; `headers`
/// travel as AMQP message headers, not in the body.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskMessage {
    pub kind: TaskKind,
    pub ts: Option<DateTime<Utc>>,
    pub payload: TaskPayload,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct WireBody<'a> {
    kind: &'a str,
    ts: String,
    payload: &'a TaskPayload,
}

impl TaskMessage {
    pub fn new(kind: TaskKind, payload: TaskPayload) -> Self {
        Self {
            kind,
            ts: Some(Utc::now()),
            payload,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let ts = self.ts.unwrap_or_else(Utc::now);
        serde_json::to_vec(&WireBody {
            kind: self.kind.as_str(),
            ts: ts.to_rfc3339(),
            payload: &self.payload,
        })
    }

    /// Decode a broker body. Shape problems are `Malformed`; a well-formed
    /// message naming a kind nobody handles is `UnknownKind`.
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let value: JsonValue = serde_json::from_slice(body)
            .map_err(|e| MessageError::Malformed(format!("invalid JSON: {e}")))?;
        let JsonValue::Object(mut obj) = value else {
            return Err(MessageError::Malformed("body is not a JSON object".into()));
        };

        let kind = match obj.remove("kind") {
            Some(JsonValue::String(kind)) => kind,
            Some(_) => return Err(MessageError::Malformed("`kind` is not a string".into())),
            None => return Err(MessageError::Malformed("missing `kind`".into())),
        };

        let payload = match obj.remove("payload") {
            None | Some(JsonValue::Null) => TaskPayload::new(),
            Some(JsonValue::Object(map)) => map,
            Some(_) => return Err(MessageError::Malformed("`payload` is not an object".into())),
        };

        let ts = obj
            .get("ts")
            .and_then(JsonValue::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(Self {
            kind: kind.parse()?,
            ts,
            payload,
            headers: BTreeMap::new(),
        })
    }
}
