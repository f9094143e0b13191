//! Record extractor for the results listing table.
//!
//! A page is parsed once into an owned, indexed list of [`TableRow`]s. Record
//! derivation then walks that list with an explicit three-row window
//! (current, next, after-next), so the end-of-table boundary is just a `None`
//! in the window instead of a DOM sibling lookup.

pub mod fields;

use gradq_core::{truncate_comment, CandidateRecord, Degree};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

pub const CRATE_NAME: &str = "gradq-extract";

pub const DEFAULT_SITE_ORIGIN: &str = "https://www.thegradcafe.com";

/// Rows with fewer cells are spacers or detail rows, never data rows.
pub const MIN_DATA_CELLS: usize = 4;

static TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").expect("table selector"));
static ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").expect("row selector"));
static CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("td").expect("cell selector"));
static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("link selector"));

/// One `<tr>` lowered to the text views the field rules need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    /// Per-`<td>` text, whitespace-stripped fragments joined with nothing.
    pub cells: Vec<String>,
    /// Whole-row text joined with nothing.
    pub compact_text: String,
    /// Whole-row text joined with single spaces.
    pub spaced_text: String,
    /// First anchor target inside the row that points at a result page.
    pub result_href: Option<String>,
}

impl TableRow {
    fn from_element(row: ElementRef<'_>) -> Self {
        let cells = row.select(&CELL).map(|td| stripped_text(td, "")).collect();
        let result_href = row
            .select(&LINK)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| fields::is_result_href(href))
            .map(ToString::to_string);

        Self {
            cells,
            compact_text: stripped_text(row, ""),
            spaced_text: stripped_text(row, " "),
            result_href,
        }
    }

    pub fn is_data_row(&self) -> bool {
        self.cells.len() >= MIN_DATA_CELLS
    }
}

fn stripped_text(el: ElementRef<'_>, sep: &str) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

/// The primary results table of one listing page.
#[derive(Debug, Clone)]
pub struct ResultsPage {
    origin: String,
    rows: Vec<TableRow>,
}

impl ResultsPage {
    /// `None` when the page has no table at all, which marks the end of the listing.
    pub fn parse(html: &str) -> Option<Self> {
        Self::parse_with_origin(html, DEFAULT_SITE_ORIGIN)
    }

    pub fn parse_with_origin(html: &str, origin: &str) -> Option<Self> {
        let document = Html::parse_document(html);
        let table = document.select(&TABLE).next()?;
        let rows = table.select(&ROW).map(TableRow::from_element).collect();
        Some(Self {
            origin: origin.to_string(),
            rows,
        })
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    /// Lazily derive candidate records. Each call starts a fresh pass.
    pub fn records(&self) -> Records<'_> {
        Records {
            page: self,
            // row 0 is the header
            next_index: 1,
        }
    }

    fn record_at(&self, index: usize) -> Option<CandidateRecord> {
        let current = self.rows.get(index)?;
        if !current.is_data_row() {
            debug!(row = index, cells = current.cells.len(), "skipping non-data row");
            return None;
        }
        let next = self.rows.get(index + 1);
        let after_next = self.rows.get(index + 2);

        let program = current.cells[1].clone();
        let (decision, decision_date) = fields::parse_decision(&current.cells[3]);

        let comment = match after_next {
            Some(row) if row.cells.len() == 1 => truncate_comment(&row.compact_text),
            _ => String::new(),
        };

        let stats_text = [Some(current), next, after_next]
            .into_iter()
            .flatten()
            .map(|row| row.spaced_text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let stats = fields::parse_stats(&stats_text);

        Some(CandidateRecord {
            external_id: current
                .result_href
                .as_deref()
                .map(|href| fields::absolutize_result_href(&self.origin, href)),
            institution: fields::institution_name(&current.cells[0]),
            degree: Degree::classify(&program),
            program,
            decision,
            decision_date,
            listing_date: current.cells[2].clone(),
            comment,
            term: stats.term,
            nationality: stats.nationality,
            gpa: stats.gpa,
            gre_quant: stats.gre_quant,
            gre_verbal: stats.gre_verbal,
            gre_aw: stats.gre_aw,
            llm_generated_program: None,
            llm_generated_university: None,
        })
    }
}

/// Iterator over the candidate records of a [`ResultsPage`], in table order.
pub struct Records<'a> {
    page: &'a ResultsPage,
    next_index: usize,
}

impl Iterator for Records<'_> {
    type Item = CandidateRecord;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_index < self.page.rows.len() {
            let index = self.next_index;
            self.next_index += 1;
            if let Some(record) = self.page.record_at(index) {
                return Some(record);
            }
        }
        None
    }
}

/// Convenience wrapper carrying the origin used to absolutize result links.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    origin: String,
}

impl Default for RecordExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_SITE_ORIGIN)
    }
}

impl RecordExtractor {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn parse_page(&self, html: &str) -> Option<ResultsPage> {
        ResultsPage::parse_with_origin(html, &self.origin)
    }

    /// All records on the page; empty when there is no results table.
    pub fn extract(&self, html: &str) -> Vec<CandidateRecord> {
        self.parse_page(html)
            .map(|page| page.records().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradq_core::{Decision, Nationality};
    use std::path::Path;

    fn fixture(name: &str) -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/gradcafe")
            .join(name);
        std::fs::read_to_string(path).unwrap()
    }

    fn table(rows: &str) -> String {
        format!("<html><body><table><tr><th>h</th></tr>{rows}</table></body></html>")
    }

    const DATA_ROW: &str = r#"<tr><td>MITReport</td><td>Physics PhD</td><td>Jan 5, 2026</td><td>Accepted on 4 Jan</td><td><a href="/result/42">x</a></td></tr>"#;

    #[test]
    fn fixture_page_yields_every_data_row_in_order() {
        let records = RecordExtractor::default().extract(&fixture("listing_page.html"));
        let institutions = records.iter().map(|r| r.institution.as_str()).collect::<Vec<_>>();
        assert_eq!(
            institutions,
            vec![
                "Stanford University",
                "University of Michigan",
                "Rhode Island School of Design",
                "Georgia Institute of Technology",
            ]
        );
    }

    #[test]
    fn fixture_first_record_has_all_fields() {
        let records = RecordExtractor::default().extract(&fixture("listing_page.html"));
        let r = &records[0];
        assert_eq!(
            r.external_id.as_deref(),
            Some("https://www.thegradcafe.com/result/990001")
        );
        assert_eq!(r.program, "Computer SciencePhD");
        assert_eq!(r.degree, Degree::PhD);
        assert_eq!(r.decision, Decision::Accepted);
        assert_eq!(r.decision_date.as_deref(), Some("28 Feb"));
        assert_eq!(r.listing_date, "March 01, 2026");
        assert_eq!(r.comment, "Funded offer, visit weekend in March.");
        assert_eq!(r.term.as_deref(), Some("Fall 2026"));
        assert_eq!(r.nationality, Some(Nationality::International));
        assert_eq!(r.gpa, Some(3.91));
        assert_eq!(r.gre_quant, Some(331.0));
        assert_eq!(r.gre_verbal, Some(162.0));
        assert_eq!(r.gre_aw, Some(4.5));
    }

    #[test]
    fn fixture_absolute_links_and_missing_links() {
        let records = RecordExtractor::default().extract(&fixture("listing_page.html"));

        let michigan = &records[1];
        assert_eq!(
            michigan.external_id.as_deref(),
            Some("https://www.thegradcafe.com/result/990000")
        );
        assert_eq!(michigan.degree, Degree::Masters);
        assert_eq!(michigan.decision, Decision::Rejected);
        // the row two below is a two-cell spacer
        assert_eq!(michigan.comment, "");
        assert_eq!(michigan.nationality, Some(Nationality::American));

        let risd = &records[2];
        assert_eq!(risd.external_id, None);
        assert_eq!(risd.degree, Degree::Other);
        assert_eq!(risd.decision, Decision::Interview);
        assert_eq!(risd.decision_date, None);
        assert_eq!(risd.comment, "Portfolio review scheduled.");
        assert_eq!(risd.nationality, None);
        assert_eq!(risd.gpa, Some(3.2));
        assert_eq!(risd.term.as_deref(), Some("Fall 2025"));
    }

    #[test]
    fn fixture_last_record_handles_table_end() {
        let records = RecordExtractor::default().extract(&fixture("listing_page.html"));
        let gatech = records.last().unwrap();
        assert_eq!(gatech.decision, Decision::WaitListed);
        assert_eq!(gatech.decision_date.as_deref(), Some("20 Feb"));
        assert_eq!(gatech.comment, "");
        assert_eq!(gatech.nationality, Some(Nationality::American));
        assert_eq!(gatech.gre_quant, Some(320.0));
        assert_eq!(gatech.term.as_deref(), Some("Fall 2026"));
    }

    #[test]
    fn page_without_table_is_none_and_extracts_nothing() {
        let html = "<html><body><p>No results</p></body></html>";
        assert!(ResultsPage::parse(html).is_none());
        assert!(RecordExtractor::default().extract(html).is_empty());
    }

    #[test]
    fn short_rows_are_skipped_without_stopping_extraction() {
        let html = table(&format!(
            "<tr><td>a</td><td>b</td><td>c</td></tr>{DATA_ROW}<tr><td>only</td></tr>"
        ));
        let records = RecordExtractor::default().extract(&html);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].institution, "MIT");
        assert_eq!(records[0].comment, "");
    }

    #[test]
    fn header_row_is_never_a_record() {
        let html = format!("<table>{DATA_ROW}{DATA_ROW}</table>");
        let records = RecordExtractor::default().extract(&html);
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn data_row_as_last_row_has_empty_window() {
        let records = RecordExtractor::default().extract(&table(DATA_ROW));
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.external_id.as_deref(), Some("https://www.thegradcafe.com/result/42"));
        assert_eq!(r.comment, "");
        assert_eq!(r.gpa, None);
        assert_eq!(r.term, None);
    }

    #[test]
    fn comments_are_capped() {
        let long = "x".repeat(700);
        let html = table(&format!(
            "{DATA_ROW}<tr><td>GPA 3.0</td></tr><tr><td>{long}</td></tr>"
        ));
        let records = RecordExtractor::default().extract(&html);
        assert_eq!(records[0].comment.chars().count(), 500);
        assert_eq!(records[0].gpa, Some(3.0));
    }

    #[test]
    fn relative_links_use_configured_origin() {
        let records = RecordExtractor::new("http://mirror.test/").extract(&table(DATA_ROW));
        assert_eq!(
            records[0].external_id.as_deref(),
            Some("http://mirror.test/result/42")
        );
    }

    #[test]
    fn non_result_links_are_ignored_in_favour_of_result_links() {
        let row = r#"<tr><td>A</td><td>B</td><td>C</td><td>Rejected</td><td><a href="/survey/?q=A">s</a><a href="/result/7">r</a></td></tr>"#;
        let records = RecordExtractor::default().extract(&table(row));
        assert_eq!(
            records[0].external_id.as_deref(),
            Some("https://www.thegradcafe.com/result/7")
        );
    }

    #[test]
    fn records_can_be_restarted() {
        let page = ResultsPage::parse(&fixture("listing_page.html")).unwrap();
        let first = page.records().take(2).collect::<Vec<_>>();
        let again = page.records().collect::<Vec<_>>();
        assert_eq!(first.len(), 2);
        assert_eq!(again.len(), 4);
        assert_eq!(first[0], again[0]);
    }
}
