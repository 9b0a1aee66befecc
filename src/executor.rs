//! Dynamic SQL execution against the ingested data tables.
//!
//! Generated queries reference columns unknown at compile time, so this path
//! speaks the simple-query protocol and gets every value back as text. The
//! catalog store keeps its typed diesel layer; this pool is only for DDL,
//! bulk ingestion, and validated SELECTs.

use std::str::FromStr;

use deadpool_postgres::{Client, Manager, ManagerConfig, Pool, RecyclingMethod};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::debug;

use crate::error::EngineError;

pub const MAX_ROWS: usize = 1000;
pub const QUERY_TIMEOUT_MS: u64 = 10_000;

static LIMIT_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").expect("invalid limit pattern"));

/// Append a row cap unless the query already carries a LIMIT anywhere in its
/// text. Matching anywhere (including subqueries) over-detects, which errs on
/// the side of trusting the model's own cap.
pub fn ensure_limit(sql: &str) -> String {
    if LIMIT_KEYWORD.is_match(sql) {
        return sql.to_string();
    }
    format!("{} LIMIT {}", sql.trim_end().trim_end_matches(';'), MAX_ROWS)
}

/// Text-protocol result set: every value is either NULL or its PostgreSQL
/// text rendering.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    /// Rows as JSON objects keyed by column name, for responses and prompts.
    pub fn to_json_rows(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (idx, name) in self.columns.iter().enumerate() {
                    let value = match row.get(idx).and_then(|v| v.as_deref()) {
                        Some(text) => serde_json::Value::String(text.to_string()),
                        None => serde_json::Value::Null,
                    };
                    object.insert(name.clone(), value);
                }
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct QueryExecutor {
    pool: Pool,
}

impl QueryExecutor {
    pub fn new(database_url: &str, pool_size: usize) -> Result<Self, EngineError> {
        let pg_config =
            tokio_postgres::Config::from_str(database_url).map_err(|e| EngineError::Config {
                message: format!("Invalid DATABASE_URL: {}", e),
            })?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(pool_size)
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("Failed to create executor pool: {}", e),
            })?;

        Ok(Self { pool })
    }

    pub async fn client(&self) -> Result<Client, EngineError> {
        self.pool.get().await.map_err(|e| EngineError::Internal {
            message: format!("Failed to get database connection: {}", e),
        })
    }

    /// Run a validated SELECT with the row cap and statement timeout applied.
    ///
    /// The timeout is set with `SET LOCAL` inside a transaction so it dies
    /// with the transaction; this pool is shared with DDL and bulk inserts,
    /// which must not inherit a 10s cap from a recycled connection.
    pub async fn run_select(&self, sql: &str) -> Result<QueryResult, EngineError> {
        let sql = ensure_limit(sql);
        debug!(sql = %sql, "Executing query");

        let mut client = self.client().await?;
        let transaction = client
            .transaction()
            .await
            .map_err(map_execution_error)?;
        transaction
            .batch_execute(&timeout_guard())
            .await
            .map_err(map_execution_error)?;

        let messages = transaction
            .simple_query(&sql)
            .await
            .map_err(map_execution_error)?;
        transaction.commit().await.map_err(map_execution_error)?;

        let mut columns: Vec<String> = Vec::new();
        let mut rows: Vec<Vec<Option<String>>> = Vec::new();
        for message in messages {
            match message {
                SimpleQueryMessage::RowDescription(description) => {
                    columns = description.iter().map(|c| c.name().to_string()).collect();
                }
                SimpleQueryMessage::Row(row) => {
                    let values = (0..row.len())
                        .map(|idx| row.get(idx).map(|v| v.to_string()))
                        .collect();
                    rows.push(values);
                }
                _ => {}
            }
        }

        Ok(QueryResult { columns, rows })
    }
}

fn timeout_guard() -> String {
    format!("SET LOCAL statement_timeout = '{}'", QUERY_TIMEOUT_MS)
}

fn map_execution_error(err: tokio_postgres::Error) -> EngineError {
    let message = err.to_string();
    if message.to_lowercase().contains("statement timeout") {
        return EngineError::SqlExecution {
            message: "Query timed out. Please try a simpler question.".to_string(),
        };
    }
    EngineError::SqlExecution {
        message: format!("Query execution failed: {}", message),
    }
}
