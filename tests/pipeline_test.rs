use std::sync::Once;

use nlq_engine_service::catalog::VizType;
use nlq_engine_service::parsers::{clean_column_names, get_parser};
use nlq_engine_service::sql_guard::{extract_sql, fix_group_by_aliases, validate_and_fix};
use nlq_engine_service::type_inference::{infer_columns, StorageType};
use nlq_engine_service::viz::classify;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

#[tokio::test]
async fn test_csv_upload_flows_through_inference_to_storage_types() {
    init_test_logging();

    // Given: A CSV upload with mixed column shapes
    let content = b"Order Date,Region,Units Sold,Unit Price\n\
        15/01/2024,West,\"1,200\",10.50\n\
        16/01/2024,East,950,11.25\n\
        17/01/2024,South,1100,9.80\n\
        18/01/2024,West,800,12.00\n";

    // When: Parsing and cleaning the file the way ingestion does
    let parser = get_parser("sales.csv").expect("CSV parser should be registered");
    let mut table = parser
        .parse(content, "sales.csv")
        .expect("CSV should parse");
    table.columns = clean_column_names(&table.columns);

    // Then: Column names are SQL-safe identifiers
    assert_eq!(
        table.columns,
        vec!["order_date", "region", "units_sold", "unit_price"]
    );
    assert_eq!(table.rows.len(), 4);

    // And: Inference assigns each column its storage type from the data
    let decisions = infer_columns(&table.columns, &table.rows);
    assert_eq!(decisions[0].storage_type, StorageType::Date);
    assert!(matches!(decisions[1].storage_type, StorageType::VarChar(_)));
    assert_eq!(decisions[2].storage_type, StorageType::BigInt);
    assert_eq!(decisions[3].storage_type, StorageType::Numeric);
}

#[tokio::test]
async fn test_generated_sql_is_cleaned_rewritten_and_gated() {
    init_test_logging();

    // Given: A fenced LLM response using a select-list alias in GROUP BY
    let response = "```sql\nSELECT DATE_TRUNC('month', order_date) AS month, \
        SUM(units_sold) AS total FROM dataset_ab12cd34 GROUP BY month\n```";

    // When: Running the full validation pipeline
    let sql = validate_and_fix(response).expect("valid SELECT should pass");

    // Then: The fence is stripped and the alias is rewritten positionally
    assert!(!sql.contains("```"));
    assert!(sql.contains("GROUP BY 1"), "got: {}", sql);

    // And: Validation is idempotent on its own output
    assert_eq!(validate_and_fix(&sql).expect("still valid"), sql);

    // And: Destructive statements are rejected even when stacked after a SELECT
    let attack = "DROP TABLE dataset_ab12cd34; SELECT 1";
    assert!(validate_and_fix(attack).is_err());

    // And: The raw extraction keeps unfenced responses untouched
    assert_eq!(extract_sql("SELECT 1"), "SELECT 1");
}

#[tokio::test]
async fn test_alias_rewrite_reports_when_it_does_not_apply() {
    init_test_logging();

    // Given: A query grouping by a real column, not an alias
    let sql = "SELECT region, SUM(units_sold) AS total FROM dataset_ab12cd34 GROUP BY region";

    // When: Attempting the rewrite
    let outcome = fix_group_by_aliases(sql);

    // Then: The SQL passes through unchanged
    assert_eq!(outcome.sql(), sql);
}

#[tokio::test]
async fn test_visualization_classification_follows_rule_order() {
    init_test_logging();

    let columns = vec!["month".to_string(), "total".to_string()];

    // Explicit chart phrasing beats the table keywords appearing later
    assert_eq!(
        classify("show all regions as a bar chart", &columns, 5),
        VizType::Bar
    );

    // Tabular intent without chart phrasing
    assert_eq!(
        classify("show all order details", &columns, 200),
        VizType::Table
    );

    // A single aggregate row gets no visualization
    assert_eq!(classify("total sales", &["total".to_string()], 1), VizType::None);

    // Top-N beyond ten categories falls back to a table
    assert_eq!(
        classify("top 15 customers by revenue", &columns, 15),
        VizType::Table
    );

    // Empty results never chart, whatever the question says
    assert_eq!(classify("line chart of sales", &columns, 0), VizType::None);
}
