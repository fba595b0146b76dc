//! Statement classification and result handling.

use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::database::types::{SqlValue, TypeMapper};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo};
use std::collections::HashMap;

/// Leading keyword after any whitespace and SQL comments.
static LEADING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^(?:\s+|--[^\n]*(?:\n|$)|/\*.*?\*/)*\(*\s*([A-Za-z]+)")
        .expect("leading keyword pattern is valid")
});

/// Whether a statement yields rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// `SELECT`, `WITH`, `SHOW`, `VALUES`, `TABLE`, `EXPLAIN`.
    RowReturning,
    /// DML, DDL and everything else.
    NonRowReturning,
}

impl StatementKind {
    /// Classify a statement by its leading keyword.
    pub fn classify(statement: &str) -> Self {
        let keyword = LEADING_KEYWORD
            .captures(statement)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_ascii_uppercase());

        match keyword.as_deref() {
            Some("SELECT" | "WITH" | "SHOW" | "VALUES" | "TABLE" | "EXPLAIN") => {
                StatementKind::RowReturning
            }
            _ => StatementKind::NonRowReturning,
        }
    }
}

/// A single row of query results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    /// Column values indexed by column name.
    #[serde(flatten)]
    pub columns: HashMap<String, SqlValue>,
}

impl ResultRow {
    /// Create a new result row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    /// Insert a value.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.insert(column.into(), value);
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, column: impl Into<String>, value: SqlValue) -> Self {
        self.insert(column, value);
        self
    }
}

/// Information about a result column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// SQL type name.
    pub sql_type: String,
}

/// Result of a statement execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in order.
    pub columns: Vec<ColumnInfo>,

    /// Result rows (empty for non-row-returning statements).
    pub rows: Vec<ResultRow>,

    /// Number of rows affected (for INSERT/UPDATE/DELETE).
    pub rows_affected: u64,

    /// Execution time in milliseconds.
    pub execution_time_ms: u64,
}

impl QueryResult {
    /// Create an empty query result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Result of a non-row-returning statement.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Build a result from fetched rows.
    pub fn from_pg_rows(pg_rows: &[PgRow]) -> Self {
        let columns: Vec<ColumnInfo> = pg_rows
            .first()
            .map(|row| {
                row.columns()
                    .iter()
                    .map(|c| ColumnInfo {
                        name: c.name().to_string(),
                        sql_type: c.type_info().name().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows = pg_rows
            .iter()
            .map(|row| {
                let mut result_row = ResultRow::new();
                for (idx, col) in columns.iter().enumerate() {
                    result_row.insert(col.name.clone(), TypeMapper::extract_column(row, idx));
                }
                result_row
            })
            .collect();

        Self {
            columns,
            rows,
            rows_affected: 0,
            execution_time_ms: 0,
        }
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&ResultRow> {
        self.rows.first()
    }

    /// Rows as a JSON array of objects.
    pub fn rows_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.rows).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    }

    /// Format the result as a markdown table.
    pub fn to_markdown_table(&self) -> String {
        if self.columns.is_empty() {
            if self.rows_affected > 0 {
                return format!(
                    "Statement executed successfully. {} row(s) affected.",
                    self.rows_affected
                );
            }
            return "Statement executed successfully. No results returned.".to_string();
        }

        let mut output = String::new();

        let headers: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        output.push_str("| ");
        output.push_str(&headers.join(" | "));
        output.push_str(" |\n| ");
        output.push_str(
            &headers
                .iter()
                .map(|h| "-".repeat(h.len().max(3)))
                .collect::<Vec<_>>()
                .join(" | "),
        );
        output.push_str(" |\n");

        for row in &self.rows {
            let values: Vec<String> = self
                .columns
                .iter()
                .map(|col| {
                    row.get(&col.name)
                        .map(|v| v.to_display_string())
                        .unwrap_or_else(|| "NULL".to_string())
                })
                .collect();
            output.push_str("| ");
            output.push_str(&values.join(" | "));
            output.push_str(" |\n");
        }

        output.push_str(&format!(
            "\n_{} row(s)_ _({} ms)_",
            self.rows.len(),
            self.execution_time_ms
        ));
        output
    }
}

/// Truncate a statement for logging purposes.
pub fn truncate_for_log(s: &str) -> String {
    let compact: String = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.chars().count() <= LOG_QUERY_TRUNCATE_LENGTH {
        compact
    } else {
        let head: String = compact.chars().take(LOG_QUERY_TRUNCATE_LENGTH).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_row_returning() {
        assert_eq!(StatementKind::classify("SELECT 1"), StatementKind::RowReturning);
        assert_eq!(
            StatementKind::classify("\n   select * from t"),
            StatementKind::RowReturning
        );
        assert_eq!(
            StatementKind::classify("WITH x AS (SELECT 1) SELECT * FROM x"),
            StatementKind::RowReturning
        );
        assert_eq!(StatementKind::classify("show server_version"), StatementKind::RowReturning);
        assert_eq!(
            StatementKind::classify("-- report\n/* multi\nline */ SELECT now()"),
            StatementKind::RowReturning
        );
        assert_eq!(StatementKind::classify("(SELECT 1)"), StatementKind::RowReturning);
    }

    #[test]
    fn test_classify_non_row_returning() {
        assert_eq!(
            StatementKind::classify("INSERT INTO t VALUES (1)"),
            StatementKind::NonRowReturning
        );
        assert_eq!(
            StatementKind::classify("  update t set a = 1"),
            StatementKind::NonRowReturning
        );
        assert_eq!(
            StatementKind::classify("CREATE TABLE t (id int)"),
            StatementKind::NonRowReturning
        );
        assert_eq!(StatementKind::classify(""), StatementKind::NonRowReturning);
        assert_eq!(StatementKind::classify("   "), StatementKind::NonRowReturning);
    }

    #[test]
    fn test_result_row() {
        let row = ResultRow::new()
            .with("id", SqlValue::I32(1))
            .with("name", SqlValue::String("test".to_string()));

        assert_eq!(row.get("id"), Some(&SqlValue::I32(1)));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn test_markdown_table() {
        let result = QueryResult {
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    sql_type: "INT4".to_string(),
                },
                ColumnInfo {
                    name: "name".to_string(),
                    sql_type: "TEXT".to_string(),
                },
            ],
            rows: vec![
                ResultRow::new()
                    .with("id", SqlValue::I32(1))
                    .with("name", SqlValue::String("Alice".to_string())),
                ResultRow::new()
                    .with("id", SqlValue::I32(2))
                    .with("name", SqlValue::Null),
            ],
            rows_affected: 0,
            execution_time_ms: 5,
        };

        let md = result.to_markdown_table();
        assert!(md.contains("| id | name |"));
        assert!(md.contains("| 1 | Alice |"));
        assert!(md.contains("| 2 | NULL |"));
        assert!(md.contains("2 row(s)"));
    }

    #[test]
    fn test_affected_markdown() {
        assert!(QueryResult::affected(3)
            .to_markdown_table()
            .contains("3 row(s) affected"));
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("SELECT\n   1"), "SELECT 1");
        let long = "x".repeat(300);
        let out = truncate_for_log(&long);
        assert!(out.ends_with("..."));
        assert_eq!(out.chars().count(), LOG_QUERY_TRUNCATE_LENGTH + 3);
    }
}
