//! Rule-based visualization classification for query results.
//!
//! A deliberately small, ordered rule list rather than a statistical model:
//! every rule is a regex or count check over the question and result shape,
//! evaluated top-down with first match winning, so classification is
//! reproducible from `(question, row_count)` alone.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::VizType;

static EXPLICIT_CHART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(pie|line|bar)\s+(chart|graph)\b").expect("invalid chart pattern")
});

static GENERIC_CHART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\bgraph\b|\bchart\b|visuali[sz]e)").expect("invalid generic pattern")
});

static TOP_N: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btop\s+(\d+)\b").expect("invalid top-n pattern"));

const TABLE_PHRASES: &[&str] = &[
    "tabular",
    "table format",
    "in table",
    "as table",
    "show table",
    "list all",
    "show all",
    "all details",
    "full list",
    "complete list",
    "raw data",
    "detailed view",
    "spreadsheet",
    "export",
];

/// Classify a query result into a visualization category.
///
/// Pure function of the question text and result shape; never fails, the
/// weakest rule is the `None` default.
pub fn classify(question: &str, _columns: &[String], row_count: usize) -> VizType {
    if row_count == 0 {
        return VizType::None;
    }

    let question_lower = question.to_lowercase();

    // Explicit chart request wins when there is enough data to chart.
    if row_count >= 2 {
        if let Some(caps) = EXPLICIT_CHART.captures(&question_lower) {
            return match &caps[1] {
                "pie" => VizType::Pie,
                "line" => VizType::Line,
                _ => VizType::Bar,
            };
        }
        if GENERIC_CHART.is_match(&question_lower) {
            return VizType::Bar;
        }
    }

    if TABLE_PHRASES.iter().any(|p| question_lower.contains(p)) {
        return VizType::Table;
    }

    // "top N" beyond ten categories reads better as a table than a chart.
    if let Some(caps) = TOP_N.captures(&question_lower) {
        if let Ok(n) = caps[1].parse::<u32>() {
            if n > 10 {
                return VizType::Table;
            }
        }
    }

    VizType::None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_results_get_no_visualization() {
        assert_eq!(classify("bar chart of sales", &cols(&["region"]), 0), VizType::None);
    }

    #[test]
    fn explicit_chart_requests_win() {
        let c = cols(&["month", "total"]);
        assert_eq!(classify("show a pie chart of revenue share", &c, 5), VizType::Pie);
        assert_eq!(classify("line graph of monthly sales", &c, 12), VizType::Line);
        assert_eq!(classify("bar chart of sales by region", &c, 4), VizType::Bar);
    }

    #[test]
    fn explicit_chart_needs_at_least_two_rows() {
        assert_eq!(classify("pie chart of totals", &cols(&["total"]), 1), VizType::None);
    }

    #[test]
    fn generic_chart_request_defaults_to_bar() {
        let c = cols(&["region", "total"]);
        assert_eq!(classify("visualize sales by region", &c, 4), VizType::Bar);
        assert_eq!(classify("graph revenue per city", &c, 8), VizType::Bar);
    }

    #[test]
    fn tabular_intent_returns_table() {
        let c = cols(&["id", "name", "amount"]);
        assert_eq!(classify("show all orders in raw data", &c, 200), VizType::Table);
        assert_eq!(classify("export the full list of customers", &c, 50), VizType::Table);
    }

    #[test]
    fn aggregate_answer_stays_text_only() {
        assert_eq!(classify("total sales", &cols(&["total"]), 1), VizType::None);
    }

    #[test]
    fn large_top_n_returns_table() {
        let c = cols(&["customer", "revenue"]);
        assert_eq!(classify("top 15 customers by revenue", &c, 15), VizType::Table);
        assert_eq!(classify("top 5 customers by revenue", &c, 5), VizType::None);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = cols(&["month", "total"]);
        let first = classify("monthly sales as a line chart", &c, 12);
        for _ in 0..10 {
            assert_eq!(classify("monthly sales as a line chart", &c, 12), first);
        }
    }
}
