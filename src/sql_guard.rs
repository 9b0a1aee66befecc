//! Validation and rewriting of LLM-generated SQL before execution.
//!
//! Generated text goes through three stages: markdown fence stripping, a
//! GROUP BY alias rewrite (PostgreSQL rejects select-list aliases inside
//! GROUP BY expressions that the model likes to emit), and a safety gate
//! that admits only single SELECT statements.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{Expr, GroupByExpr, SelectItem, SetExpr, Statement, Value};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::EngineError;

static FENCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:sql)?\s*(.*?)\s*```").expect("invalid fence pattern")
});

static FORBIDDEN_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(DROP|DELETE|UPDATE|INSERT|TRUNCATE|ALTER|CREATE)\b")
        .expect("invalid keyword pattern")
});

/// Whether the alias rewrite changed the statement, and why not if it didn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    Rewritten(String),
    /// Input passed through untouched, with the reason the rewrite did not
    /// apply.
    Original { sql: String, reason: String },
}

impl RewriteOutcome {
    pub fn sql(&self) -> &str {
        match self {
            RewriteOutcome::Rewritten(sql) => sql,
            RewriteOutcome::Original { sql, .. } => sql,
        }
    }
}

fn original(sql: &str, reason: impl Into<String>) -> RewriteOutcome {
    RewriteOutcome::Original {
        sql: sql.to_string(),
        reason: reason.into(),
    }
}

/// Strip a markdown code fence if present, otherwise trim whitespace.
pub fn extract_sql(response: &str) -> String {
    if let Some(caps) = FENCE_PATTERN.captures(response) {
        return caps[1].trim().to_string();
    }
    response.trim().to_string()
}

/// Replace select-list aliases referenced in GROUP BY with their ordinal
/// position. `SELECT DATE_TRUNC('month', d) AS month ... GROUP BY month`
/// becomes `GROUP BY 1`, which PostgreSQL accepts regardless of whether
/// `month` shadows a column name.
///
/// Any parse or shape problem leaves the input untouched; the executor will
/// surface the database's own error if the SQL is genuinely bad.
pub fn fix_group_by_aliases(sql: &str) -> RewriteOutcome {
    let dialect = PostgreSqlDialect {};
    let mut statements = match Parser::parse_sql(&dialect, sql) {
        Ok(stmts) => stmts,
        Err(e) => return original(sql, format!("unparseable: {}", e)),
    };
    if statements.len() != 1 {
        return original(sql, "not a single statement");
    }

    let query = match &mut statements[0] {
        Statement::Query(query) => query,
        _ => return original(sql, "not a query"),
    };
    let select = match query.body.as_mut() {
        SetExpr::Select(select) => select,
        _ => return original(sql, "not a plain select"),
    };

    // Alias -> 1-based select-list ordinal.
    let aliases: Vec<(String, u64)> = select
        .projection
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| match item {
            SelectItem::ExprWithAlias { alias, .. } => {
                Some((alias.value.to_lowercase(), idx as u64 + 1))
            }
            _ => None,
        })
        .collect();
    if aliases.is_empty() {
        return original(sql, "no aliases in select list");
    }

    let exprs = match &mut select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs,
        _ => return original(sql, "no group by expressions"),
    };

    let mut changed = false;
    for expr in exprs.iter_mut() {
        if let Expr::Identifier(ident) = expr {
            let lowered = ident.value.to_lowercase();
            if let Some((_, ordinal)) = aliases.iter().find(|(a, _)| *a == lowered) {
                *expr = Expr::Value(Value::Number(ordinal.to_string(), false));
                changed = true;
            }
        }
    }

    if changed {
        RewriteOutcome::Rewritten(statements[0].to_string())
    } else {
        original(sql, "no group by aliases matched")
    }
}

/// Full pipeline: fence strip, alias rewrite, then the safety gate.
///
/// Accepts exactly one statement whose root is a query; rejects anything
/// containing a data-modification keyword as a standalone word, even inside
/// string literals. Column names like `created_at` pass the word-boundary
/// scan; a literal `'DROP-IN'` does not. That imprecision is accepted:
/// rejecting a valid query is recoverable, executing a destructive one is
/// not.
pub fn validate_and_fix(response: &str) -> Result<String, EngineError> {
    let sql = extract_sql(response);
    let sql = fix_group_by_aliases(&sql).sql().to_string();

    let dialect = PostgreSqlDialect {};
    let statements = Parser::parse_sql(&dialect, &sql).map_err(|e| EngineError::SqlValidation {
        message: format!("Invalid SQL syntax: {}", e),
        sql: sql.clone(),
    })?;

    if statements.len() != 1 {
        return Err(EngineError::SqlValidation {
            message: "Only a single statement is allowed".to_string(),
            sql,
        });
    }
    if !matches!(statements[0], Statement::Query(_)) {
        return Err(EngineError::SqlValidation {
            message: "Only SELECT queries are allowed".to_string(),
            sql,
        });
    }

    let upper = sql.to_uppercase();
    if let Some(m) = FORBIDDEN_KEYWORD.find(&upper) {
        return Err(EngineError::SqlValidation {
            message: format!("Query contains forbidden keyword: {}", m.as_str()),
            sql,
        });
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_sql_fences() {
        assert_eq!(
            extract_sql("```sql\nSELECT 1\n```"),
            "SELECT 1"
        );
        assert_eq!(extract_sql("```\nSELECT 2\n```"), "SELECT 2");
        assert_eq!(extract_sql("  SELECT 3  "), "SELECT 3");
    }

    #[test]
    fn rewrites_group_by_alias_to_ordinal() {
        let sql = "SELECT DATE_TRUNC('month', order_date) AS month, SUM(amount) AS total \
                   FROM dataset_ab12cd34 GROUP BY month ORDER BY month";
        let outcome = fix_group_by_aliases(sql);
        match outcome {
            RewriteOutcome::Rewritten(rewritten) => {
                assert!(rewritten.contains("GROUP BY 1"), "got: {}", rewritten);
                // ORDER BY aliases are legal in PostgreSQL and stay as-is.
                assert!(rewritten.to_lowercase().contains("order by month"));
            }
            RewriteOutcome::Original { reason, .. } => {
                panic!("expected rewrite, got: {}", reason)
            }
        }
    }

    #[test]
    fn leaves_plain_column_group_by_alone() {
        let sql = "SELECT region, SUM(amount) AS total FROM t GROUP BY region";
        let outcome = fix_group_by_aliases(sql);
        assert!(matches!(outcome, RewriteOutcome::Original { .. }));
        // The untouched SQL must survive, not the explanation.
        assert_eq!(outcome.sql(), sql);
    }

    #[test]
    fn unrewritten_queries_still_validate() {
        let sql = "SELECT created_at, updated_total FROM dataset_x";
        match fix_group_by_aliases(sql) {
            RewriteOutcome::Original { sql: kept, .. } => assert_eq!(kept, sql),
            RewriteOutcome::Rewritten(other) => panic!("unexpected rewrite: {}", other),
        }
        assert_eq!(validate_and_fix(sql).unwrap(), sql);
    }

    #[test]
    fn validation_is_idempotent() {
        let first = validate_and_fix("SELECT region, COUNT(*) FROM dataset_x GROUP BY region")
            .unwrap();
        let second = validate_and_fix(&first).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_non_select_statements() {
        let err = validate_and_fix("DELETE FROM dataset_x").unwrap_err();
        assert!(matches!(err, EngineError::SqlValidation { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn rejects_stacked_statements() {
        let err = validate_and_fix("SELECT 1; SELECT 2").unwrap_err();
        assert!(err.to_string().contains("single statement"));
    }

    #[test]
    fn rejects_embedded_forbidden_keyword() {
        let err = validate_and_fix("SELECT * FROM t WHERE note = 'please DROP this'").unwrap_err();
        assert!(err.to_string().contains("DROP"));
    }

    #[test]
    fn allows_keyword_substrings_inside_identifiers() {
        let sql = "SELECT created_at, updated_total FROM dataset_x";
        assert!(validate_and_fix(sql).is_ok());
    }

    #[test]
    fn rejects_unparseable_text() {
        let err = validate_and_fix("this is not sql at all;;;").unwrap_err();
        assert!(err.to_string().contains("Invalid SQL syntax"));
    }

    #[test]
    fn validation_error_carries_offending_sql() {
        let err = validate_and_fix("DROP TABLE dataset_x").unwrap_err();
        match err {
            EngineError::SqlValidation { sql, .. } => assert_eq!(sql, "DROP TABLE dataset_x"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
