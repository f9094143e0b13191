//! Text-in, optional-fields-out derivations for a single results row.
//!
//! None of these fail: a field that cannot be found is simply absent.

use gradq_core::{Decision, Nationality};
use once_cell::sync::Lazy;
use regex::Regex;

static RESULT_HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r"/result/\d+").expect("static regex"));
static REPORT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"Report$").expect("static regex"));
static DECISION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(Accepted|Rejected|Wait listed|Interview)").expect("static regex"));
static DECISION_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)on\s*(.*)").expect("static regex"));
static GPA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)GPA\s*([\d.]+)").expect("static regex"));
static GRE_QUANT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)GRE\s*(\d+)").expect("static regex"));
static GRE_VERBAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)GRE V\s*(\d+)").expect("static regex"));
static GRE_AW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)GRE AW\s*([\d.]+)").expect("static regex"));
static TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(Fall|Spring|Summer|Winter)\s*(\d{4})").expect("static regex"));

/// Institution cell text minus the trailing "Report" button label.
pub fn institution_name(cell_text: &str) -> String {
    REPORT_SUFFIX.replace(cell_text, "").trim().to_string()
}

/// Decision status and the free-text date following "on", if any.
pub fn parse_decision(text: &str) -> (Decision, Option<String>) {
    let decision = DECISION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| Decision::from_label(m.as_str()))
        .unwrap_or(Decision::Unknown);
    let date = DECISION_DATE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    (decision, date)
}

pub fn is_result_href(href: &str) -> bool {
    RESULT_HREF.is_match(href)
}

/// Root-relative result paths are anchored to the site origin; anything else is kept as-is.
pub fn absolutize_result_href(origin: &str, href: &str) -> String {
    if href.starts_with('/') {
        format!("{}{}", origin.trim_end_matches('/'), href)
    } else {
        href.to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicantStats {
    pub gpa: Option<f64>,
    pub gre_quant: Option<f64>,
    pub gre_verbal: Option<f64>,
    pub gre_aw: Option<f64>,
    pub term: Option<String>,
    pub nationality: Option<Nationality>,
}

/// Best-effort metric search over the concatenated text of a row and its neighbours.
pub fn parse_stats(text: &str) -> ApplicantStats {
    let nationality = if text.contains("International") {
        Some(Nationality::International)
    } else if text.contains("American") {
        Some(Nationality::American)
    } else {
        None
    };

    let term = TERM
        .captures(text)
        .map(|c| format!("{} {}", &c[1], &c[2]));

    ApplicantStats {
        gpa: first_number(&GPA, text),
        gre_quant: first_number(&GRE_QUANT, text),
        gre_verbal: first_number(&GRE_VERBAL, text),
        gre_aw: first_number(&GRE_AW, text),
        term,
        nationality,
    }
}

fn first_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn institution_drops_report_suffix_only_at_end() {
        assert_eq!(institution_name("Stanford UniversityReport"), "Stanford University");
        assert_eq!(institution_name("  MIT Report "), "MIT Report");
        assert_eq!(institution_name("Report Card CollegeReport"), "Report Card College");
    }

    #[test]
    fn decision_and_date_are_split() {
        assert_eq!(
            parse_decision("Accepted on 28 Feb"),
            (Decision::Accepted, Some("28 Feb".to_string()))
        );
        assert_eq!(
            parse_decision("WAIT LISTED ON 3 Mar"),
            (Decision::WaitListed, Some("3 Mar".to_string()))
        );
        assert_eq!(parse_decision("Interview"), (Decision::Interview, None));
        assert_eq!(parse_decision("Other"), (Decision::Unknown, None));
    }

    #[test]
    fn decision_date_follows_first_on_match() {
        assert_eq!(
            parse_decision("Rejected via portal on 1 Apr").1,
            Some("1 Apr".to_string())
        );
        // not word-bounded
        assert_eq!(
            parse_decision("Accepted second round").1,
            Some("d round".to_string())
        );
        assert_eq!(parse_decision("Accepted on").1, Some(String::new()));
    }

    #[test]
    fn result_hrefs_are_recognised_and_absolutized() {
        assert!(is_result_href("/result/12345"));
        assert!(is_result_href("https://www.thegradcafe.com/result/7"));
        assert!(!is_result_href("/result/abc"));
        assert!(!is_result_href("/survey/?q=MIT"));

        assert_eq!(
            absolutize_result_href("https://www.thegradcafe.com/", "/result/5"),
            "https://www.thegradcafe.com/result/5"
        );
        assert_eq!(
            absolutize_result_href("https://www.thegradcafe.com", "https://mirror.example/result/5"),
            "https://mirror.example/result/5"
        );
    }

    #[test]
    fn stats_are_pulled_from_free_text() {
        let stats = parse_stats("Fall 2026 International GPA 3.91 GRE 331 GRE V 162 GRE AW 4.5");
        assert_eq!(
            stats,
            ApplicantStats {
                gpa: Some(3.91),
                gre_quant: Some(331.0),
                gre_verbal: Some(162.0),
                gre_aw: Some(4.5),
                term: Some("Fall 2026".to_string()),
                nationality: Some(Nationality::International),
            }
        );
    }

    #[test]
    fn international_wins_when_both_labels_appear() {
        let stats = parse_stats("American International");
        assert_eq!(stats.nationality, Some(Nationality::International));
    }

    #[test]
    fn missing_and_unparsable_stats_stay_absent() {
        assert_eq!(parse_stats("no metrics here"), ApplicantStats::default());
        let stats = parse_stats("GPA ... GRE V 150");
        assert_eq!(stats.gpa, None);
        assert_eq!(stats.gre_quant, None);
        assert_eq!(stats.gre_verbal, Some(150.0));
    }
}
