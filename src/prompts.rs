//! Prompt templates for SQL generation, answer synthesis, and table
//! selection. Kept in one place so wording changes never touch pipeline
//! logic.

use crate::catalog::{Dataset, TableInfo};

/// Prompt asking the model for a single PostgreSQL query over one table.
pub fn build_sql_prompt(question: &str, table: &str, info: &TableInfo, history: &str) -> String {
    let columns_formatted = info
        .columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.data_type))
        .collect::<Vec<_>>()
        .join(", ");

    let sample_data =
        serde_json::to_string(&info.sample_rows).unwrap_or_else(|_| "[]".to_string());

    let distinct_section = if info.distinct_values.is_empty() {
        String::new()
    } else {
        let mut map = serde_json::Map::new();
        for dv in &info.distinct_values {
            map.insert(
                dv.column.clone(),
                serde_json::Value::Array(
                    dv.values
                        .iter()
                        .map(|v| serde_json::Value::String(v.clone()))
                        .collect(),
                ),
            );
        }
        format!(
            "\nKey column values: {}",
            serde_json::Value::Object(map)
        )
    };

    let history_section = if history.is_empty() {
        String::new()
    } else {
        format!("\n{}\n", history)
    };

    format!(
        r#"You are a PostgreSQL expert. Generate an accurate SQL query for this question.

TABLE: {table}
COLUMNS (with types): {columns_formatted}
SAMPLE DATA: {sample_data}{distinct_section}
{history_section}
QUERY PATTERNS (use the appropriate pattern):

1. RANKING ("what rank is X", "position of X"):
   CRITICAL: Calculate rank for ALL rows first, then filter OUTSIDE the CTE!
   WITH ranked AS (
     SELECT entity, SUM(metric) as total,
            ROW_NUMBER() OVER (ORDER BY SUM(metric) DESC) as rank
     FROM table
     GROUP BY entity  -- NO WHERE clause here!
   )
   SELECT * FROM ranked WHERE entity ILIKE '%search%'  -- Filter AFTER ranking!

2. TOP N ("top 5", "best 10"):
   SELECT entity, SUM(metric) as total FROM table
   GROUP BY entity ORDER BY total DESC LIMIT N

3. COMPARISON ("X vs Y", "compare"):
   SELECT entity, SUM(metric) as total FROM table
   WHERE entity ILIKE '%X%' OR entity ILIKE '%Y%' GROUP BY entity

4. PERCENTAGE ("% of total", "share"):
   SELECT entity, SUM(metric) as value,
          ROUND((100.0 * SUM(metric) / (SELECT SUM(metric) FROM table))::numeric, 2) as percentage
   FROM table GROUP BY entity

5. FILTERING ("in region X", "where"):
   Use ILIKE '%value%' for text columns, = for exact matches

6. AGGREGATION ("total", "sum", "average", "count"):
   Use SUM(), AVG(), COUNT(), MIN(), MAX() with GROUP BY
   IMPORTANT: For numeric columns, use them directly - no casting needed!
   Example: AVG(numeric_column), not NULLIF(column,'')::numeric

7. TREND ("by month", "over time"):
   GROUP BY time_column ORDER BY time_column

IMPORTANT PostgreSQL Rules:
- ROUND with decimals MUST cast to numeric: ROUND(value::numeric, 2) NOT ROUND(value, 2)
- For already numeric columns, just use: ROUND(AVG(column)::numeric, 2)
- Do NOT use NULLIF or empty string checks on numeric columns - they already handle NULL properly
- Only use NULLIF for TEXT columns that might have empty strings

QUESTION: {question}

OUTPUT: Only the SQL query, nothing else."#
    )
}

/// Prompt converting query results into a readable natural-language answer.
pub fn build_answer_prompt(question: &str, data: &[serde_json::Value]) -> String {
    let sample: Vec<&serde_json::Value> = data.iter().take(10).collect();
    let sample_json = serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"Answer the question in natural language based on the query results below.

Question: {question}

Data ({} rows):
{sample_json}

RESPONSE GUIDELINES:
1. Start with a brief, friendly sentence answering the question directly
2. Present data as a simple numbered or bulleted list - DO NOT use markdown tables
3. Each list item should be clear and readable, like: "April: 87.23 days"
4. Format values for readability:
   - Round decimals to 2 places
5. Keep the response concise and easy to scan
6. Do not use markdown table syntax (no | or --- characters)"#,
        data.len()
    )
}

/// Prompt asking the model to pick the best table for a question. The reply
/// must be a JSON object with a single `table_name` field.
pub fn build_table_selection_prompt(question: &str, datasets: &[Dataset]) -> String {
    let summary: Vec<serde_json::Value> = datasets
        .iter()
        .map(|d| {
            serde_json::json!({
                "table_name": d.table_name,
                "columns": d.columns,
            })
        })
        .collect();
    let summary_json =
        serde_json::to_string_pretty(&summary).unwrap_or_else(|_| "[]".to_string());

    format!(
        r#"You are a data analyst. Select the best table for this question.

Available Tables:
{summary_json}

Question: "{question}"

Return ONLY the table_name in JSON format: {{"table_name": "..."}}"#
    )
}
