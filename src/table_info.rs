//! TableInfo assembly: column types from the catalog, a handful of sample
//! rows, and bounded distinct values for categorical-looking text columns.
//! Results are cached in Redis with a short TTL since schema churn only
//! happens on ingestion.

use tokio_postgres::SimpleQueryMessage;
use tracing::debug;

use crate::cache::{get_cached_table_info, set_cached_table_info, RedisCache};
use crate::catalog::{ColumnType, DistinctValues, TableInfo};
use crate::error::EngineError;
use crate::executor::QueryExecutor;

const SAMPLE_ROW_LIMIT: usize = 5;
const DISTINCT_VALUE_LIMIT: usize = 20;

/// Text column names containing any of these read as categorical and get a
/// distinct-value listing in the prompt.
const CATEGORY_KEYWORDS: &[&str] = &[
    "month", "date", "year", "category", "type", "status", "region", "city",
];

pub fn is_categorical_column(name: &str, data_type: &str) -> bool {
    let is_text = matches!(data_type, "text" | "character varying" | "varchar");
    if !is_text {
        return false;
    }
    let lower = name.to_lowercase();
    CATEGORY_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Fetch TableInfo through the cache. A hit within the TTL window returns the
/// cached summary byte-for-byte; a miss computes and stores it.
pub async fn get_table_info(
    executor: &QueryExecutor,
    cache: &RedisCache,
    table_name: &str,
) -> Result<TableInfo, EngineError> {
    if let Some(cached) = get_cached_table_info(cache, table_name).await {
        return Ok(cached);
    }

    let info = fetch_table_info(executor, table_name).await?;
    set_cached_table_info(cache, table_name, &info).await;
    Ok(info)
}

async fn fetch_table_info(
    executor: &QueryExecutor,
    table_name: &str,
) -> Result<TableInfo, EngineError> {
    let client = executor.client().await?;

    let type_rows = client
        .query(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = $1 ORDER BY ordinal_position",
            &[&table_name],
        )
        .await
        .map_err(|e| EngineError::Internal {
            message: format!("Failed to introspect {}: {}", table_name, e),
        })?;

    let columns: Vec<ColumnType> = type_rows
        .iter()
        .map(|row| ColumnType {
            name: row.get(0),
            data_type: row.get(1),
        })
        .collect();
    if columns.is_empty() {
        return Err(EngineError::DatasetNotFound {
            dataset_id: table_name.to_string(),
        });
    }
    drop(client);

    let sample = executor
        .run_select(&format!(
            "SELECT * FROM \"{}\" LIMIT {}",
            table_name, SAMPLE_ROW_LIMIT
        ))
        .await?;
    let sample_rows = sample.to_json_rows();

    let mut distinct_values = Vec::new();
    for column in &columns {
        if !is_categorical_column(&column.name, &column.data_type) {
            continue;
        }
        let values = fetch_distinct_values(executor, table_name, &column.name).await?;
        if !values.is_empty() {
            distinct_values.push(DistinctValues {
                column: column.name.clone(),
                values,
            });
        }
    }

    debug!(
        table_name,
        column_count = columns.len(),
        distinct_columns = distinct_values.len(),
        "Computed table info"
    );

    Ok(TableInfo {
        columns,
        sample_rows,
        distinct_values,
    })
}

async fn fetch_distinct_values(
    executor: &QueryExecutor,
    table_name: &str,
    column: &str,
) -> Result<Vec<String>, EngineError> {
    let client = executor.client().await?;
    let sql = format!(
        "SELECT DISTINCT \"{col}\" FROM \"{table}\" ORDER BY \"{col}\" LIMIT {limit}",
        col = column,
        table = table_name,
        limit = DISTINCT_VALUE_LIMIT
    );
    let messages = client
        .simple_query(&sql)
        .await
        .map_err(|e| EngineError::Internal {
            message: format!("Failed to list distinct values for {}: {}", column, e),
        })?;

    let mut values = Vec::new();
    for message in messages {
        if let SimpleQueryMessage::Row(row) = message {
            if let Some(value) = row.get(0) {
                values.push(value.to_string());
            }
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorical_detection_requires_text_type_and_keyword() {
        assert!(is_categorical_column("region", "text"));
        assert!(is_categorical_column("order_month", "character varying"));
        assert!(is_categorical_column("CITY", "varchar"));
        // Right keyword, wrong type.
        assert!(!is_categorical_column("year", "bigint"));
        // Right type, no keyword.
        assert!(!is_categorical_column("customer_name", "text"));
    }
}
