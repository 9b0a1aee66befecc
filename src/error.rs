use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Dataset not found: {dataset_id}")]
    DatasetNotFound { dataset_id: String },

    #[error("No datasets uploaded. Please upload a file first.")]
    NoDatasets,

    #[error("{message}")]
    SqlValidation { message: String, sql: String },

    #[error("{message}")]
    SqlExecution { message: String },

    #[error("File upload failed: {message}")]
    FileUpload { message: String },

    #[error("LLM call failed: {message}")]
    Llm { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// HTTP-equivalent status code, consumed by the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::DatasetNotFound { .. } => 404,
            EngineError::NoDatasets
            | EngineError::SqlValidation { .. }
            | EngineError::SqlExecution { .. }
            | EngineError::FileUpload { .. } => 400,
            EngineError::Llm { .. } | EngineError::Config { .. } | EngineError::Internal { .. } => {
                500
            }
        }
    }

    /// Structured payload surfaced at the request boundary. The offending SQL
    /// is attached for validation failures so callers can debug generation.
    pub fn to_payload(&self, table_used: Option<&str>) -> ErrorPayload {
        let generated_sql = match self {
            EngineError::SqlValidation { sql, .. } => Some(sql.clone()),
            _ => None,
        };
        ErrorPayload {
            error: self.to_string(),
            generated_sql,
            table_used: table_used.map(|t| t.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_used: Option<String>,
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<diesel::result::Error> for EngineError {
    fn from(err: diesel::result::Error) -> Self {
        EngineError::Internal {
            message: format!("Catalog store error: {}", err),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Llm {
            message: err.to_string(),
        }
    }
}
