use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FileType {
    #[serde(rename = "csv")]
    Csv,
    #[serde(rename = "excel")]
    Excel,
    #[serde(rename = "synced")]
    Synced,
    #[serde(rename = "unknown")]
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Excel => "excel",
            FileType::Synced => "synced",
            FileType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "csv" => FileType::Csv,
            "excel" => FileType::Excel,
            "synced" => FileType::Synced,
            _ => FileType::Unknown,
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One registered dataset. `table_name` is unique and immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: i32,
    pub table_name: String,
    pub file_name: String,
    pub file_type: FileType,
    pub columns: Vec<String>,
    pub row_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Declared storage type of one column, as reported by the store catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnType {
    pub name: String,
    pub data_type: String,
}

/// Bounded distinct-value listing for one categorical-looking text column.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DistinctValues {
    pub column: String,
    pub values: Vec<String>,
}

/// Cacheable schema summary used to build SQL-generation prompts.
///
/// Field order is fixed so serialization is deterministic: a cache hit must be
/// byte-identical to a fresh computation within the TTL window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableInfo {
    pub columns: Vec<ColumnType>,
    pub sample_rows: Vec<serde_json::Value>,
    pub distinct_values: Vec<DistinctValues>,
}

/// Visualization category for a query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VizType {
    Bar,
    Line,
    Pie,
    Table,
    None,
}

impl VizType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VizType::Bar => "bar",
            VizType::Line => "line",
            VizType::Pie => "pie",
            VizType::Table => "table",
            VizType::None => "none",
        }
    }
}

/// Transient product of the SQL-generation stage: what the model wrote,
/// what actually ran, and what came back. Never persisted.
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub question: String,
    pub table_used: String,
    pub raw_sql: String,
    pub validated_sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub row_count: usize,
}

/// Full response for one answered question.
#[derive(Debug, Clone, Serialize)]
pub struct AskOutcome {
    pub table_used: String,
    pub generated_sql: String,
    pub answer: String,
    pub columns: Vec<String>,
    pub data: Vec<serde_json::Value>,
    pub row_count: usize,
    pub viz_type: VizType,
}

/// One persisted chat thread. `message_count` is computed on listing, not
/// stored.
#[derive(Debug, Clone, Serialize)]
pub struct ChatThread {
    pub id: i32,
    pub title: String,
    pub dataset_id: Option<i32>,
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: i64,
}

/// One persisted message inside a chat thread.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i32,
    pub chat_id: i32,
    pub role: String,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// One stored Q&A turn in a chat's bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viz_type: Option<VizType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_round_trips() {
        for ft in [FileType::Csv, FileType::Excel, FileType::Synced] {
            assert_eq!(FileType::parse(ft.as_str()), ft);
        }
        assert_eq!(FileType::parse("parquet"), FileType::Unknown);
    }

    #[test]
    fn table_info_serialization_is_deterministic() {
        let info = TableInfo {
            columns: vec![ColumnType {
                name: "region".into(),
                data_type: "text".into(),
            }],
            sample_rows: vec![serde_json::json!({"region": "west"})],
            distinct_values: vec![DistinctValues {
                column: "region".into(),
                values: vec!["east".into(), "west".into()],
            }],
        };
        let first = serde_json::to_string(&info).unwrap();
        let round: TableInfo = serde_json::from_str(&first).unwrap();
        let second = serde_json::to_string(&round).unwrap();
        assert_eq!(first, second);
    }
}
