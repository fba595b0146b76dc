//! Capacity snapshots and growth trends.
//!
//! Snapshots are read from the target and written to the metadata store;
//! trends are computed from the metadata store for the target's current
//! database.

use super::{ParamType, Tool, ToolDeps, ToolOutput, ToolParameter, ToolParams};
use crate::constants::{
    DEFAULT_TREND_DAYS, DEFAULT_TREND_LIMIT, TREND_DAYS_RANGE, TREND_LIMIT_RANGE,
};
use crate::database::SqlValue;
use crate::error::ServerError;
use crate::repository::TrendScope;
use crate::telemetry::RequestContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

const CURRENT_DATABASE_SQL: &str = "SELECT current_database() AS dbname";

const DATABASE_SNAPSHOT_SQL: &str = "SELECT current_database() AS dbname, \
     pg_database_size(current_database()) AS size_bytes";

const TABLE_SNAPSHOT_SQL: &str = r#"
SELECT
    current_database() AS dbname,
    schemaname,
    relname,
    pg_total_relation_size(format('%I.%I', schemaname, relname)) AS size_bytes
FROM pg_stat_user_tables
"#;

fn parse_scope(raw: &str) -> Result<TrendScope, ServerError> {
    match raw {
        "db" => Ok(TrendScope::Db),
        "table" => Ok(TrendScope::Table),
        other => Err(ServerError::validation(format!(
            "scope must be 'db' or 'table', got '{}'",
            other
        ))),
    }
}

fn text(row: &crate::database::ResultRow, column: &str) -> Result<String, ServerError> {
    row.get(column)
        .and_then(SqlValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| ServerError::query(format!("Snapshot row has no '{}' value", column)))
}

fn size(row: &crate::database::ResultRow) -> Result<i64, ServerError> {
    row.get("size_bytes")
        .and_then(SqlValue::as_i64)
        .ok_or_else(|| ServerError::query("Snapshot row has no 'size_bytes' value"))
}

pub(crate) fn tools(deps: &Arc<ToolDeps>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GrowthTrendTool(deps.clone())),
        Arc::new(DatabaseCapacityInsert(deps.clone())),
        Arc::new(TableCapacityInsert(deps.clone())),
    ]
}

pub struct GrowthTrendTool(Arc<ToolDeps>);

#[async_trait]
impl Tool for GrowthTrendTool {
    fn name(&self) -> &'static str {
        "pg_capacity_growth_trend"
    }

    fn description(&self) -> &'static str {
        "Capacity growth (MB/day) and percentage growth over a look-back window"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::connection_id(),
            ToolParameter::optional("scope", ParamType::String, "'db' or 'table'", json!("db")),
            ToolParameter::optional(
                "days",
                ParamType::Integer,
                "Look-back window in days (1-365)",
                json!(DEFAULT_TREND_DAYS),
            ),
            ToolParameter::optional(
                "limit",
                ParamType::Integer,
                "Tables to list for table scope (1-100)",
                json!(DEFAULT_TREND_LIMIT),
            ),
        ]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let scope = parse_scope(params.optional_str("scope")?.unwrap_or("db"))?;
        let days = params.clamped_i64("days", DEFAULT_TREND_DAYS, TREND_DAYS_RANGE)?;
        let limit = params.clamped_i64("limit", DEFAULT_TREND_LIMIT, TREND_LIMIT_RANGE)?;

        let current = self
            .0
            .query(params.connection_id()?, CURRENT_DATABASE_SQL, &[])
            .await?;
        let dbname = current
            .first()
            .map(|row| text(row, "dbname"))
            .transpose()?
            .ok_or_else(|| ServerError::query("current_database() returned no row"))?;

        let trend = self
            .0
            .trends
            .growth_trend(scope, &dbname, days as i32, limit)
            .await?;
        let data = serde_json::to_value(&trend).unwrap_or(Value::Array(Vec::new()));

        let title = match scope {
            TrendScope::Db => "Capacity Growth Trend (Database)".to_string(),
            TrendScope::Table => format!("Capacity Growth Trend (Top {} Tables)", limit),
        };
        Ok(ToolOutput::report(title, data))
    }
}

pub struct DatabaseCapacityInsert(Arc<ToolDeps>);

#[async_trait]
impl Tool for DatabaseCapacityInsert {
    fn name(&self) -> &'static str {
        "pg_capacity_growth_trend_database_capacity_insert"
    }

    fn description(&self) -> &'static str {
        "Record the current database size as a capacity snapshot"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let result = self
            .0
            .query(params.connection_id()?, DATABASE_SNAPSHOT_SQL, &[])
            .await?;

        let mut inserted = 0;
        if let Some(row) = result.first() {
            let dbname = text(row, "dbname")?;
            self.0.trends.add_database_snapshot(&dbname, size(row)?).await?;
            inserted = 1;
        }
        info!("{} Stored {} database snapshot(s)", ctx.log_prefix(), inserted);
        Ok(ToolOutput::report(
            "Database Capacity Snapshot",
            json!({ "inserted": inserted }),
        ))
    }
}

pub struct TableCapacityInsert(Arc<ToolDeps>);

#[async_trait]
impl Tool for TableCapacityInsert {
    fn name(&self) -> &'static str {
        "pg_capacity_growth_trend_table_capacity_insert"
    }

    fn description(&self) -> &'static str {
        "Record the current size of every user table as capacity snapshots"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let result = self
            .0
            .query(params.connection_id()?, TABLE_SNAPSHOT_SQL, &[])
            .await?;

        for row in &result.rows {
            self.0
                .trends
                .add_table_snapshot(
                    &text(row, "dbname")?,
                    &text(row, "schemaname")?,
                    &text(row, "relname")?,
                    size(row)?,
                )
                .await?;
        }
        info!("{} Stored {} table snapshot(s)", ctx.log_prefix(), result.rows.len());
        Ok(ToolOutput::report(
            "Table Capacity Snapshot",
            json!({ "inserted": result.rows.len() }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ColumnInfo, QueryResult, ResultRow};
    use crate::repository::{CapacitySnapshot, TrendRepository};
    use crate::tools::test_support::{args, fixture};
    use chrono::{Duration, Utc};

    fn result(rows: Vec<ResultRow>) -> QueryResult {
        QueryResult {
            columns: vec![ColumnInfo {
                name: "dbname".into(),
                sql_type: "NAME".into(),
            }],
            rows,
            ..QueryResult::default()
        }
    }

    fn orders_db() -> ResultRow {
        ResultRow::new().with("dbname", SqlValue::String("orders".into()))
    }

    #[tokio::test]
    async fn test_table_snapshot_insert() {
        let fx = fixture().await;
        fx.connector.respond(
            "pg_stat_user_tables",
            result(vec![
                orders_db()
                    .with("schemaname", SqlValue::String("public".into()))
                    .with("relname", SqlValue::String("lines".into()))
                    .with("size_bytes", SqlValue::I64(8192)),
                orders_db()
                    .with("schemaname", SqlValue::String("public".into()))
                    .with("relname", SqlValue::String("items".into()))
                    .with("size_bytes", SqlValue::I64(16384)),
            ]),
        );

        let output = TableCapacityInsert(fx.deps.clone())
            .call(&RequestContext::new(), args(json!({"connection_id": fx.connection_id})))
            .await
            .unwrap();
        assert_eq!(output.data["inserted"], json!(2));

        let trend = fx
            .repo
            .growth_trend(TrendScope::Table, "orders", 30, 10)
            .await
            .unwrap();
        assert_eq!(trend.len(), 2);
    }

    #[tokio::test]
    async fn test_database_snapshot_insert() {
        let fx = fixture().await;
        fx.connector.respond(
            "pg_database_size",
            result(vec![orders_db().with("size_bytes", SqlValue::I64(1_048_576))]),
        );
        let output = DatabaseCapacityInsert(fx.deps.clone())
            .call(&RequestContext::new(), args(json!({"connection_id": fx.connection_id})))
            .await
            .unwrap();
        assert_eq!(output.data["inserted"], json!(1));

        let trend = fx.repo.growth_trend(TrendScope::Db, "orders", 30, 10).await.unwrap();
        assert_eq!(trend[0].end_size, 1_048_576);
    }

    #[tokio::test]
    async fn test_growth_trend_uses_target_database() {
        let fx = fixture().await;
        fx.connector.respond("current_database()", result(vec![orders_db()]));
        let now = Utc::now();
        for (days_ago, size) in [(10, 100 * 1_048_576_i64), (0, 110 * 1_048_576)] {
            fx.repo.push_snapshot(CapacitySnapshot {
                snapshot_ts: now - Duration::days(days_ago),
                scope: "db".into(),
                dbname: "orders".into(),
                schemaname: None,
                relname: None,
                size_bytes: size,
            });
        }
        fx.repo.push_snapshot(CapacitySnapshot {
            snapshot_ts: now,
            scope: "db".into(),
            dbname: "other".into(),
            schemaname: None,
            relname: None,
            size_bytes: 1,
        });

        let output = GrowthTrendTool(fx.deps.clone())
            .call(
                &RequestContext::new(),
                args(json!({"connection_id": fx.connection_id, "days": 9999})),
            )
            .await
            .unwrap();

        assert!(output.text.starts_with("# Capacity Growth Trend (Database)"));
        assert_eq!(output.data[0]["growth_mb"], json!(10.0));
        assert_eq!(output.data[0]["growth_pct"], json!(10.0));
    }

    #[tokio::test]
    async fn test_growth_trend_rejects_unknown_scope() {
        let fx = fixture().await;
        let err = GrowthTrendTool(fx.deps.clone())
            .call(
                &RequestContext::new(),
                args(json!({"connection_id": fx.connection_id, "scope": "schema"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }
}
