//! Ingestion pipeline: parse an uploaded file, infer storage types, create
//! the backing table, bulk-insert rows, and register metadata.
//!
//! Each upload gets a fresh `dataset_<8 hex>` table; re-uploading a file
//! never mutates an existing table in place.

use tokio_postgres::types::ToSql;
use tracing::info;

use crate::cache::{invalidate_all_table_caches, invalidate_table_cache, RedisCache};
use crate::catalog::{Dataset, FileType};
use crate::database::DatabaseManager;
use crate::error::EngineError;
use crate::executor::QueryExecutor;
use crate::parsers::{clean_column_names, get_parser, supported_extensions_display, ParsedTable};
use crate::registry::DatasetRegistry;
use crate::type_inference::{
    infer_columns, normalize_temporal_cell, CellValue, ColumnTypeDecision, StorageType,
};

// PostgreSQL caps bind parameters at 65535 per statement.
const MAX_BATCH_ROWS: usize = 500;
const MAX_BATCH_PARAMS: usize = 65_000;

pub fn new_table_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("dataset_{}", &id[..8])
}

/// Ingest one uploaded file end to end and return the registered dataset.
pub async fn ingest_file(
    executor: &QueryExecutor,
    db: &DatabaseManager,
    registry: &DatasetRegistry,
    content: &[u8],
    filename: &str,
) -> Result<Dataset, EngineError> {
    let parser = get_parser(filename).ok_or_else(|| EngineError::FileUpload {
        message: format!(
            "Unsupported file type. Supported: {}",
            supported_extensions_display()
        ),
    })?;

    info!(filename, parser = parser.name(), "Parsing upload");
    let mut table = parser.parse(content, filename)?;
    table.columns = clean_column_names(&table.columns);

    let decisions = infer_columns(&table.columns, &table.rows);
    normalize_temporal_columns(&mut table, &decisions);

    let table_name = new_table_name();
    let row_count = table.rows.len() as i64;

    create_table(executor, &table_name, &decisions).await?;
    insert_rows(executor, &table_name, &table, &decisions).await?;

    let dataset = db
        .upsert_dataset_metadata(
            &table_name,
            filename,
            parser.file_type(),
            &table.columns,
            row_count,
        )
        .await?;

    registry.refresh(db).await?;
    info!(
        %table_name,
        row_count,
        column_count = table.columns.len(),
        "Upload complete"
    );

    Ok(dataset)
}

fn normalize_temporal_columns(table: &mut ParsedTable, decisions: &[ColumnTypeDecision]) {
    for (idx, decision) in decisions.iter().enumerate() {
        if !decision.storage_type.is_temporal() {
            continue;
        }
        for row in table.rows.iter_mut() {
            if let Some(cell) = row.get_mut(idx) {
                *cell = normalize_temporal_cell(cell, decision.storage_type);
            }
        }
    }
}

async fn create_table(
    executor: &QueryExecutor,
    table_name: &str,
    decisions: &[ColumnTypeDecision],
) -> Result<(), EngineError> {
    let column_defs = decisions
        .iter()
        .map(|d| format!("\"{}\" {}", d.column, d.storage_type.pg_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let ddl = format!(
        "DROP TABLE IF EXISTS \"{table}\"; CREATE TABLE \"{table}\" ({defs})",
        table = table_name,
        defs = column_defs
    );

    let client = executor.client().await?;
    client
        .batch_execute(&ddl)
        .await
        .map_err(|e| EngineError::FileUpload {
            message: format!("Failed to create table {}: {}", table_name, e),
        })?;
    Ok(())
}

async fn insert_rows(
    executor: &QueryExecutor,
    table_name: &str,
    table: &ParsedTable,
    decisions: &[ColumnTypeDecision],
) -> Result<(), EngineError> {
    if table.rows.is_empty() {
        return Ok(());
    }

    let column_count = decisions.len();
    let batch_rows = (MAX_BATCH_PARAMS / column_count.max(1)).clamp(1, MAX_BATCH_ROWS);

    let client = executor.client().await?;
    for chunk in table.rows.chunks(batch_rows) {
        let sql = build_insert_statement(table_name, decisions, chunk.len());

        let values: Vec<Option<String>> = chunk
            .iter()
            .flat_map(|row| {
                decisions
                    .iter()
                    .enumerate()
                    .map(|(idx, d)| bind_value(row.get(idx).unwrap_or(&CellValue::Null), d))
            })
            .collect();
        let params: Vec<&(dyn ToSql + Sync)> =
            values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();

        client
            .execute(sql.as_str(), &params)
            .await
            .map_err(|e| EngineError::FileUpload {
                message: format!("Failed to insert rows into {}: {}", table_name, e),
            })?;
    }
    Ok(())
}

/// Multi-row INSERT statement over text parameters. Every placeholder is
/// typed text at prepare time; non-text columns cast from text in SQL
/// (`($n::text)::bigint`), so the binds never have to match the column type.
fn build_insert_statement(
    table_name: &str,
    decisions: &[ColumnTypeDecision],
    row_count: usize,
) -> String {
    let column_list = decisions
        .iter()
        .map(|d| format!("\"{}\"", d.column))
        .collect::<Vec<_>>()
        .join(", ");

    let mut placeholders = Vec::with_capacity(row_count);
    let mut param_index = 1;
    for _ in 0..row_count {
        let row_placeholders = decisions
            .iter()
            .map(|d| {
                let placeholder = match d.storage_type.cast() {
                    "text" => format!("${}", param_index),
                    cast => format!("(${}::text)::{}", param_index, cast),
                };
                param_index += 1;
                placeholder
            })
            .collect::<Vec<_>>()
            .join(", ");
        placeholders.push(format!("({})", row_placeholders));
    }

    format!(
        "INSERT INTO \"{}\" ({}) VALUES {}",
        table_name,
        column_list,
        placeholders.join(", ")
    )
}

/// Render a cell as the text form the server-side cast expects.
fn bind_value(cell: &CellValue, decision: &ColumnTypeDecision) -> Option<String> {
    match cell {
        CellValue::Null => None,
        _ => {
            let text = cell.to_text();
            match decision.storage_type {
                StorageType::BigInt | StorageType::Numeric => {
                    let stripped = text.trim().replace(',', "");
                    if stripped.is_empty() {
                        None
                    } else {
                        Some(stripped)
                    }
                }
                _ => Some(text),
            }
        }
    }
}

/// Register `dataset_*` tables that exist in the store but not in the
/// metadata catalog, and drop metadata rows whose table vanished.
pub async fn sync_datasets(
    executor: &QueryExecutor,
    db: &DatabaseManager,
    registry: &DatasetRegistry,
    cache: &RedisCache,
) -> Result<usize, EngineError> {
    let client = executor.client().await?;
    let rows = client
        .query(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name LIKE 'dataset_%'",
            &[],
        )
        .await
        .map_err(|e| EngineError::Internal {
            message: format!("Failed to list data tables: {}", e),
        })?;
    let live_tables: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
    drop(client);

    let known = db.list_dataset_metadata().await?;
    let mut registered = 0;

    for table_name in &live_tables {
        if known.iter().any(|d| &d.table_name == table_name) {
            continue;
        }
        let client = executor.client().await?;
        let column_rows = client
            .query(
                "SELECT column_name FROM information_schema.columns \
                 WHERE table_name = $1 ORDER BY ordinal_position",
                &[table_name],
            )
            .await
            .map_err(|e| EngineError::Internal {
                message: format!("Failed to introspect {}: {}", table_name, e),
            })?;
        let columns: Vec<String> = column_rows.iter().map(|r| r.get(0)).collect();

        let count_row = client
            .query_one(
                format!("SELECT COUNT(*) FROM \"{}\"", table_name).as_str(),
                &[],
            )
            .await
            .map_err(|e| EngineError::Internal {
                message: format!("Failed to count {}: {}", table_name, e),
            })?;
        let row_count: i64 = count_row.get(0);
        drop(client);

        db.upsert_dataset_metadata(table_name, table_name, FileType::Synced, &columns, row_count)
            .await?;
        info!(%table_name, "Registered orphan data table");
        registered += 1;
    }

    let mut removed = 0;
    for dataset in &known {
        if !live_tables.contains(&dataset.table_name) {
            db.delete_dataset_metadata(&dataset.table_name).await?;
            info!(table_name = %dataset.table_name, "Removed stale metadata");
            removed += 1;
        }
    }

    if registered > 0 || removed > 0 {
        invalidate_all_table_caches(cache).await;
    }
    registry.refresh(db).await?;
    Ok(registered)
}

/// Drop a dataset's table, metadata, and cached schema summary.
pub async fn delete_dataset(
    executor: &QueryExecutor,
    db: &DatabaseManager,
    registry: &DatasetRegistry,
    cache: &RedisCache,
    dataset_id: i32,
) -> Result<(), EngineError> {
    let dataset =
        registry
            .find_by_id(dataset_id)
            .await
            .ok_or_else(|| EngineError::DatasetNotFound {
                dataset_id: dataset_id.to_string(),
            })?;

    let client = executor.client().await?;
    client
        .batch_execute(&format!("DROP TABLE IF EXISTS \"{}\"", dataset.table_name))
        .await
        .map_err(|e| EngineError::Internal {
            message: format!("Failed to drop {}: {}", dataset.table_name, e),
        })?;
    drop(client);

    db.delete_dataset_metadata(&dataset.table_name).await?;
    invalidate_table_cache(cache, &dataset.table_name).await;
    registry.refresh(db).await?;

    info!(table_name = %dataset.table_name, "Deleted dataset");
    Ok(())
}
