//! Storage-type inference for ingested columns.
//!
//! Each column is classified independently by examining its name (hint only)
//! and a reproducible sample of its values. A wrong numeric/date decision
//! would reject valid rows at write time, so every ambiguous case falls back
//! to text; inference itself never fails.

use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use regex::Regex;

/// Fixed seed so repeated ingestion of the same file samples identically.
const SAMPLE_SEED: u64 = 42;
const DATE_SAMPLE_SIZE: usize = 100;
const NUMERIC_SAMPLE_SIZE: usize = 200;
const TIME_COMPONENT_SAMPLE_SIZE: usize = 20;
const DATE_SUCCESS_THRESHOLD: f64 = 0.8;

/// One parsed cell from an uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn to_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Storage type assigned to a column in the backing PostgreSQL schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    BigInt,
    Numeric,
    Boolean,
    Date,
    Timestamp,
    VarChar(u32),
    Text,
}

impl StorageType {
    pub fn pg_type(&self) -> String {
        match self {
            StorageType::BigInt => "BIGINT".to_string(),
            StorageType::Numeric => "NUMERIC".to_string(),
            StorageType::Boolean => "BOOLEAN".to_string(),
            StorageType::Date => "DATE".to_string(),
            StorageType::Timestamp => "TIMESTAMP".to_string(),
            StorageType::VarChar(n) => format!("VARCHAR({})", n),
            StorageType::Text => "TEXT".to_string(),
        }
    }

    /// Cast target applied to text parameters in INSERT statements
    /// (`($n::text)::bigint` etc).
    pub fn cast(&self) -> &'static str {
        match self {
            StorageType::BigInt => "bigint",
            StorageType::Numeric => "numeric",
            StorageType::Boolean => "boolean",
            StorageType::Date => "date",
            StorageType::Timestamp => "timestamp",
            StorageType::VarChar(_) | StorageType::Text => "text",
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, StorageType::Date | StorageType::Timestamp)
    }
}

/// Outcome of inference for one column, with the evidence that produced it.
#[derive(Debug, Clone)]
pub struct ColumnTypeDecision {
    pub column: String,
    pub storage_type: StorageType,
    /// Column name matched a date-hint pattern. Hints alone never decide;
    /// sampled data does.
    pub name_hint: bool,
    /// Classification was confirmed against sampled values (false for the
    /// native-typed short-circuit and the text fallback).
    pub verified_by_sample: bool,
}

// Column name patterns that suggest date content. Hints only: the data must
// still validate as dates.
static DATE_NAME_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bdate\b",
        r"_dt$",
        r"_date$",
        r"^date_",
        r"^dt_",
        r"\bcreated\b",
        r"\bupdated\b",
        r"\bmodified\b",
        r"\btimestamp\b",
        r"_time$",
        r"_at$",
        r"\bdob\b",
        r"\bbirth\b",
        r"\bexpir",
        r"\bdeadline\b",
        r"\bdue_",
        r"^start_",
        r"^end_",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid date name pattern"))
    .collect()
});

/// Day-first and month-first date formats tried during detection.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",  // 2024-01-15
    "%d-%m-%Y",  // 15-01-2024
    "%d/%m/%Y",  // 15/01/2024
    "%m/%d/%Y",  // 01/15/2024
    "%Y/%m/%d",  // 2024/01/15
    "%d-%b-%Y",  // 15-Jan-2024
    "%d %b %Y",  // 15 Jan 2024
    "%b %d, %Y", // Jan 15, 2024
    "%d-%m-%y",  // 15-01-24
    "%d/%m/%y",  // 15/01/24
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

static TIME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,2}:\d{2}(:\d{2})?").expect("invalid time pattern"));
static MIDNIGHT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"00:00(:00)?$").expect("invalid midnight pattern"));

/// Infer storage types for every column of a parsed table.
pub fn infer_columns(columns: &[String], rows: &[Vec<CellValue>]) -> Vec<ColumnTypeDecision> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let values: Vec<&CellValue> = rows.iter().filter_map(|r| r.get(idx)).collect();
            let decision = infer_column(name, &values);
            tracing::debug!(
                column = %name,
                storage_type = ?decision.storage_type,
                "Inferred column type"
            );
            decision
        })
        .collect()
}

/// Infer the storage type for a single column.
pub fn infer_column(name: &str, values: &[&CellValue]) -> ColumnTypeDecision {
    let name_hint = has_date_name_hint(name);
    let non_null: Vec<&CellValue> = values.iter().copied().filter(|v| !v.is_null()).collect();

    if non_null.is_empty() {
        return ColumnTypeDecision {
            column: name.to_string(),
            storage_type: StorageType::Text,
            name_hint,
            verified_by_sample: false,
        };
    }

    // Natively typed values skip text analysis entirely.
    if let Some(native) = native_storage_type(&non_null) {
        return ColumnTypeDecision {
            column: name.to_string(),
            storage_type: native,
            name_hint,
            verified_by_sample: false,
        };
    }

    let texts: Vec<String> = non_null.iter().map(|v| v.to_text()).collect();

    if is_date_column(&texts) {
        let storage_type = if has_time_component(&texts) {
            StorageType::Timestamp
        } else {
            StorageType::Date
        };
        return ColumnTypeDecision {
            column: name.to_string(),
            storage_type,
            name_hint,
            verified_by_sample: true,
        };
    }

    if is_numeric_string_column(&texts) {
        let storage_type = if is_integer_string_column(&texts) {
            StorageType::BigInt
        } else {
            StorageType::Numeric
        };
        return ColumnTypeDecision {
            column: name.to_string(),
            storage_type,
            name_hint,
            verified_by_sample: true,
        };
    }

    let max_len = texts.iter().map(|s| s.chars().count()).max().unwrap_or(0);
    let storage_type = if max_len <= 255 {
        // 20% headroom, floor 50, capped at 255.
        let buffered = ((max_len as f64) * 1.2).ceil() as u32;
        StorageType::VarChar(buffered.max(50).min(255))
    } else {
        StorageType::Text
    };

    ColumnTypeDecision {
        column: name.to_string(),
        storage_type,
        name_hint,
        verified_by_sample: false,
    }
}

pub fn has_date_name_hint(name: &str) -> bool {
    let lower = name.to_lowercase();
    DATE_NAME_PATTERNS.iter().any(|p| p.is_match(&lower))
}

fn native_storage_type(non_null: &[&CellValue]) -> Option<StorageType> {
    let mut ints = 0usize;
    let mut floats = 0usize;
    let mut bools = 0usize;
    let mut datetimes = 0usize;
    for v in non_null {
        match v {
            CellValue::Int(_) => ints += 1,
            CellValue::Float(_) => floats += 1,
            CellValue::Bool(_) => bools += 1,
            CellValue::DateTime(_) => datetimes += 1,
            CellValue::Text(_) => return None,
            CellValue::Null => {}
        }
    }
    let total = non_null.len();
    if datetimes == total {
        Some(StorageType::Timestamp)
    } else if bools == total {
        Some(StorageType::Boolean)
    } else if ints == total {
        Some(StorageType::BigInt)
    } else if ints + floats == total {
        Some(StorageType::Numeric)
    } else {
        // Mixed kinds degrade to the text path.
        None
    }
}

/// Reproducible sample of up to `n` values.
fn sample<'a>(values: &'a [String], n: usize) -> Vec<&'a str> {
    if values.len() <= n {
        return values.iter().map(|s| s.as_str()).collect();
    }
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    rand::seq::index::sample(&mut rng, values.len(), n)
        .iter()
        .map(|i| values[i].as_str())
        .collect()
}

fn is_date_column(texts: &[String]) -> bool {
    let sampled = sample(texts, DATE_SAMPLE_SIZE);
    if sampled.is_empty() {
        return false;
    }
    let sample_size = sampled.len() as f64;

    for fmt in DATE_FORMATS.iter().chain(DATETIME_FORMATS.iter()) {
        let successes = sampled
            .iter()
            .filter(|v| {
                let trimmed = v.trim();
                !trimmed.is_empty() && parse_with_format(trimmed, fmt).is_some()
            })
            .count();
        if successes as f64 / sample_size >= DATE_SUCCESS_THRESHOLD {
            return true;
        }
    }

    // Locale-flexible day-first parse as a fallback.
    let successes = sampled
        .iter()
        .filter(|v| {
            let trimmed = v.trim();
            !trimmed.is_empty() && parse_datetime_dayfirst(trimmed).is_some()
        })
        .count();
    successes as f64 / sample_size >= DATE_SUCCESS_THRESHOLD
}

fn has_time_component(texts: &[String]) -> bool {
    texts.iter().take(TIME_COMPONENT_SAMPLE_SIZE).any(|v| {
        let trimmed = v.trim();
        TIME_PATTERN.is_match(trimmed) && !MIDNIGHT_PATTERN.is_match(trimmed)
    })
}

fn is_numeric_string_column(texts: &[String]) -> bool {
    let sampled = sample(texts, NUMERIC_SAMPLE_SIZE);
    for v in sampled {
        let stripped = v.trim().replace(',', "");
        if stripped.is_empty() {
            continue;
        }
        // Any letter disqualifies outright; catches IDs like "INV-1023".
        if stripped.chars().any(|c| c.is_alphabetic()) {
            return false;
        }
        if stripped.parse::<f64>().is_err() {
            return false;
        }
    }
    true
}

fn is_integer_string_column(texts: &[String]) -> bool {
    let sampled = sample(texts, NUMERIC_SAMPLE_SIZE);
    for v in sampled {
        let stripped = v.trim().replace(',', "");
        if stripped.contains('.') {
            return false;
        }
    }
    true
}

fn parse_with_format(value: &str, fmt: &str) -> Option<NaiveDateTime> {
    if fmt.contains("%H") {
        NaiveDateTime::parse_from_str(value, fmt).ok()
    } else {
        NaiveDate::parse_from_str(value, fmt)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}

/// Flexible day-first parse used for detection fallback and normalization.
pub fn parse_datetime_dayfirst(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in DATETIME_FORMATS.iter().chain(DATE_FORMATS.iter()) {
        if let Some(dt) = parse_with_format(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }

    // Normalize separators and retry, day-first orderings before month-first.
    let normalized = trimmed.replace(['/', '.'], "-");
    for fmt in [
        "%d-%m-%Y %H:%M:%S",
        "%d-%m-%Y %H:%M",
        "%d-%m-%Y",
        "%Y-%m-%d",
        "%d-%b-%Y",
        "%m-%d-%Y",
        "%d-%m-%y",
    ] {
        if let Some(dt) = parse_with_format(&normalized, fmt) {
            return Some(dt);
        }
    }
    None
}

/// Convert a date/timestamp column's cells to canonical text before the
/// ingestion write. Invalid entries become NULL; the storage layer does not
/// re-validate.
pub fn normalize_temporal_cell(value: &CellValue, storage_type: StorageType) -> CellValue {
    let parsed = match value {
        CellValue::Null => None,
        CellValue::DateTime(dt) => Some(*dt),
        other => parse_datetime_dayfirst(&other.to_text()),
    };
    match parsed {
        Some(dt) => match storage_type {
            StorageType::Date => CellValue::Text(dt.format("%Y-%m-%d").to_string()),
            _ => CellValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        },
        None => CellValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<CellValue> {
        values
            .iter()
            .map(|v| CellValue::Text(v.to_string()))
            .collect()
    }

    fn infer(name: &str, values: &[CellValue]) -> ColumnTypeDecision {
        let refs: Vec<&CellValue> = values.iter().collect();
        infer_column(name, &refs)
    }

    #[test]
    fn empty_column_defaults_to_text() {
        let values = vec![CellValue::Null, CellValue::Null];
        assert_eq!(infer("anything", &values).storage_type, StorageType::Text);
    }

    #[test]
    fn native_types_short_circuit() {
        let ints = vec![CellValue::Int(1), CellValue::Int(2), CellValue::Null];
        assert_eq!(infer("qty", &ints).storage_type, StorageType::BigInt);

        let mixed = vec![CellValue::Int(1), CellValue::Float(2.5)];
        assert_eq!(infer("amount", &mixed).storage_type, StorageType::Numeric);

        let bools = vec![CellValue::Bool(true), CellValue::Bool(false)];
        assert_eq!(infer("active", &bools).storage_type, StorageType::Boolean);

        let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let dates = vec![CellValue::DateTime(dt)];
        assert_eq!(infer("created", &dates).storage_type, StorageType::Timestamp);
    }

    #[test]
    fn iso_date_strings_become_date() {
        let values = texts(&["2024-01-15", "2024-02-20", "2024-03-25", "2024-04-30"]);
        let decision = infer("order_date", &values);
        assert_eq!(decision.storage_type, StorageType::Date);
        assert!(decision.name_hint);
        assert!(decision.verified_by_sample);
    }

    #[test]
    fn datetime_strings_become_timestamp() {
        let values = texts(&[
            "2024-01-15 14:30:00",
            "2024-02-20 09:15:30",
            "2024-03-25 23:59:59",
        ]);
        assert_eq!(
            infer("created_at", &values).storage_type,
            StorageType::Timestamp
        );
    }

    #[test]
    fn midnight_only_timestamps_become_date() {
        let values = texts(&["2024-01-15 00:00:00", "2024-02-20 00:00:00"]);
        assert_eq!(infer("d", &values).storage_type, StorageType::Date);
    }

    #[test]
    fn date_detection_requires_eighty_percent() {
        // 3 of 5 parse: below threshold, stays text-like.
        let values = texts(&["2024-01-15", "2024-02-20", "2024-03-25", "n/a", "pending"]);
        let decision = infer("ship_date", &values);
        assert!(!decision.storage_type.is_temporal());
    }

    #[test]
    fn name_hint_alone_is_not_enough() {
        let values = texts(&["north", "south", "east", "west"]);
        let decision = infer("created_at", &values);
        assert!(decision.name_hint);
        assert!(!decision.storage_type.is_temporal());
    }

    #[test]
    fn numeric_strings_classify_integer_vs_decimal() {
        let ints = texts(&["1,200", "3400", "56"]);
        assert_eq!(infer("units", &ints).storage_type, StorageType::BigInt);

        let decimals = texts(&["1200.50", "34.00", "5.6"]);
        assert_eq!(infer("price", &decimals).storage_type, StorageType::Numeric);
    }

    #[test]
    fn alphabetic_values_never_classify_numeric() {
        let values = texts(&["INV-100", "INV-200", "300"]);
        let st = infer("invoice", &values).storage_type;
        assert!(!matches!(st, StorageType::BigInt | StorageType::Numeric));
    }

    #[test]
    fn short_text_gets_buffered_varchar() {
        // Max length 10 -> buffer 12 but floor is 50.
        let values = texts(&["electronics", "toys"]);
        assert_eq!(infer("category", &values).storage_type, StorageType::VarChar(50));

        let long = "x".repeat(200);
        let values = vec![CellValue::Text(long)];
        assert_eq!(infer("notes", &values).storage_type, StorageType::VarChar(240));
    }

    #[test]
    fn oversized_text_becomes_unbounded() {
        let values = vec![CellValue::Text("y".repeat(300))];
        assert_eq!(infer("description", &values).storage_type, StorageType::Text);
    }

    #[test]
    fn inference_is_reproducible() {
        let values: Vec<CellValue> = (0..500)
            .map(|i| CellValue::Text(format!("{:02}/{:02}/2024", (i % 28) + 1, (i % 12) + 1)))
            .collect();
        let first = infer("dob", &values).storage_type;
        let second = infer("dob", &values).storage_type;
        assert_eq!(first, second);
        assert_eq!(first, StorageType::Date);
    }

    #[test]
    fn normalization_coerces_invalid_entries_to_null() {
        let good = CellValue::Text("15/01/2024".into());
        let bad = CellValue::Text("not a date".into());
        assert_eq!(
            normalize_temporal_cell(&good, StorageType::Date),
            CellValue::Text("2024-01-15".into())
        );
        assert_eq!(normalize_temporal_cell(&bad, StorageType::Date), CellValue::Null);
    }

    #[test]
    fn dayfirst_parse_prefers_day_before_month() {
        let dt = parse_datetime_dayfirst("03/04/2024").unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 4, 3).unwrap());
    }
}
