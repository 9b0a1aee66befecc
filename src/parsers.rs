//! Tabular file parsing for the ingestion path.
//!
//! Each parser turns raw upload bytes into a [`ParsedTable`] of cell values;
//! type inference and storage happen downstream. Parsers are selected by
//! file extension through a fixed registry.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::catalog::FileType;
use crate::error::EngineError;
use crate::type_inference::CellValue;

/// Parsed contents of one uploaded file. Rows are rectangular: every row has
/// one cell per column, padded with nulls where the source was ragged.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

pub trait TabularParser: Send + Sync {
    fn name(&self) -> &'static str;
    fn file_type(&self) -> FileType;
    fn supported_extensions(&self) -> &'static [&'static str];
    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedTable, EngineError>;

    fn can_parse(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.supported_extensions()
            .iter()
            .any(|ext| lower.ends_with(ext))
    }
}

pub struct CsvParser;

impl TabularParser for CsvParser {
    fn name(&self) -> &'static str {
        "CSV"
    }

    fn file_type(&self) -> FileType {
        FileType::Csv
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".csv", ".tsv"]
    }

    fn parse(&self, content: &[u8], filename: &str) -> Result<ParsedTable, EngineError> {
        let delimiter = if filename.to_lowercase().ends_with(".tsv") {
            b'\t'
        } else {
            b','
        };

        // UTF-8 first; latin1 as the fallback since it decodes any byte
        // sequence and covers the common non-UTF-8 uploads.
        let text = match std::str::from_utf8(content) {
            Ok(s) => s.to_string(),
            Err(_) => content.iter().map(|&b| b as char).collect(),
        };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| EngineError::FileUpload {
                message: format!("Could not read {} file: {}", self.name(), e),
            })?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if columns.is_empty() {
            return Err(EngineError::FileUpload {
                message: format!("{} file has no header row", self.name()),
            });
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| EngineError::FileUpload {
                message: format!("Could not read {} file: {}", self.name(), e),
            })?;
            let mut row = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let cell = record.get(idx).unwrap_or("");
                if cell.trim().is_empty() {
                    row.push(CellValue::Null);
                } else {
                    row.push(CellValue::Text(cell.to_string()));
                }
            }
            rows.push(row);
        }

        Ok(ParsedTable { columns, rows })
    }
}

pub struct ExcelParser;

impl ExcelParser {
    /// Pick the row that looks most like a header: the one among the first
    /// ten with the most non-empty string cells longer than one character.
    fn detect_header_row(grid: &[Vec<Data>]) -> usize {
        let mut header_row = 0;
        let mut max_valid = 0;
        for (i, row) in grid.iter().take(10).enumerate() {
            let valid = row
                .iter()
                .filter(|c| matches!(c, Data::String(s) if s.trim().len() > 1))
                .count();
            if valid > max_valid {
                max_valid = valid;
                header_row = i;
            }
        }
        header_row
    }

    fn cell_value(cell: &Data) -> CellValue {
        match cell {
            Data::Empty => CellValue::Null,
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(f) => CellValue::Float(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::String(s) => {
                if s.trim().is_empty() {
                    CellValue::Null
                } else {
                    CellValue::Text(s.clone())
                }
            }
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(naive) => CellValue::DateTime(naive),
                None => CellValue::Null,
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
            Data::Error(_) => CellValue::Null,
        }
    }
}

impl TabularParser for ExcelParser {
    fn name(&self) -> &'static str {
        "Excel"
    }

    fn file_type(&self) -> FileType {
        FileType::Excel
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[".xlsx", ".xls"]
    }

    fn parse(&self, content: &[u8], _filename: &str) -> Result<ParsedTable, EngineError> {
        let cursor = Cursor::new(content.to_vec());
        let mut workbook =
            open_workbook_auto_from_rs(cursor).map_err(|e| EngineError::FileUpload {
                message: format!("Failed to parse Excel file: {}", e),
            })?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| EngineError::FileUpload {
                message: "Excel workbook has no sheets".to_string(),
            })?
            .map_err(|e| EngineError::FileUpload {
                message: format!("Failed to parse Excel file: {}", e),
            })?;

        let grid: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
        if grid.is_empty() {
            return Err(EngineError::FileUpload {
                message: "Excel sheet is empty".to_string(),
            });
        }

        let header_row = Self::detect_header_row(&grid);
        let header = &grid[header_row];

        // Keep only columns with a real header and at least one value.
        let mut kept: Vec<(usize, String)> = Vec::new();
        for (idx, cell) in header.iter().enumerate() {
            let name = match cell {
                Data::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Data::Empty => continue,
                other => other.to_string(),
            };
            let has_values = grid
                .iter()
                .skip(header_row + 1)
                .any(|row| !matches!(row.get(idx), None | Some(Data::Empty)));
            if has_values {
                kept.push((idx, name));
            }
        }
        if kept.is_empty() {
            return Err(EngineError::FileUpload {
                message: "Excel sheet has no usable columns".to_string(),
            });
        }

        let columns: Vec<String> = kept.iter().map(|(_, name)| name.clone()).collect();
        let rows: Vec<Vec<CellValue>> = grid
            .iter()
            .skip(header_row + 1)
            .map(|row| {
                kept.iter()
                    .map(|(idx, _)| row.get(*idx).map(Self::cell_value).unwrap_or(CellValue::Null))
                    .collect()
            })
            .collect();

        Ok(ParsedTable { columns, rows })
    }
}

static PARSERS: Lazy<Vec<Box<dyn TabularParser>>> =
    Lazy::new(|| vec![Box::new(CsvParser), Box::new(ExcelParser)]);

pub fn get_parser(filename: &str) -> Option<&'static dyn TabularParser> {
    PARSERS
        .iter()
        .find(|p| p.can_parse(filename))
        .map(|p| p.as_ref())
}

pub fn supported_extensions_display() -> String {
    PARSERS
        .iter()
        .flat_map(|p| p.supported_extensions().iter())
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}

static NON_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9_]").expect("invalid identifier pattern"));

/// Normalize column names to lowercase snake_case identifiers safe to quote
/// into DDL. Names that clean to nothing get a positional fallback.
pub fn clean_column_names(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let cleaned = NON_IDENTIFIER
                .replace_all(&name.to_lowercase().replace(' ', "_"), "")
                .to_string();
            if cleaned.is_empty() {
                format!("column_{}", idx)
            } else {
                cleaned
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_routes_by_extension() {
        assert_eq!(get_parser("sales.csv").unwrap().name(), "CSV");
        assert_eq!(get_parser("Sales.TSV").unwrap().name(), "CSV");
        assert_eq!(get_parser("report.xlsx").unwrap().name(), "Excel");
        assert!(get_parser("photo.png").is_none());
    }

    #[test]
    fn csv_parse_produces_rectangular_rows() {
        let content = b"Region,Amount\nwest,120\neast,\n";
        let table = CsvParser.parse(content, "sales.csv").unwrap();
        assert_eq!(table.columns, vec!["Region", "Amount"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][0], CellValue::Text("west".into()));
        assert_eq!(table.rows[1][1], CellValue::Null);
    }

    #[test]
    fn tsv_uses_tab_delimiter() {
        let content = b"a\tb\n1\t2\n";
        let table = CsvParser.parse(content, "data.tsv").unwrap();
        assert_eq!(table.columns, vec!["a", "b"]);
        assert_eq!(table.rows[0][1], CellValue::Text("2".into()));
    }

    #[test]
    fn non_utf8_csv_falls_back_to_latin1() {
        // "café" with a latin1 e-acute byte.
        let content = b"name\ncaf\xe9\n";
        let table = CsvParser.parse(content, "names.csv").unwrap();
        assert_eq!(table.rows[0][0], CellValue::Text("café".into()));
    }

    #[test]
    fn short_rows_are_padded_with_nulls() {
        let content = b"a,b,c\n1,2\n";
        let table = CsvParser.parse(content, "x.csv").unwrap();
        assert_eq!(table.rows[0].len(), 3);
        assert_eq!(table.rows[0][2], CellValue::Null);
    }

    #[test]
    fn column_names_clean_to_identifiers() {
        let raw = vec![
            "Order Date".to_string(),
            "Amount ($)".to_string(),
            "%%%".to_string(),
        ];
        assert_eq!(
            clean_column_names(&raw),
            vec!["order_date", "amount_", "column_2"]
        );
    }
}
