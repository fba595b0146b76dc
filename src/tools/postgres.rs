//! Catalog introspection and ad-hoc statements on a target.

use super::{ParamType, Tool, ToolDeps, ToolOutput, ToolParameter, ToolParams};
use crate::database::SqlValue;
use crate::error::ServerError;
use crate::security::qualified_name;
use crate::telemetry::RequestContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const ALL_TABLES_SQL: &str =
    "SELECT * FROM information_schema.tables ORDER BY table_schema, table_name";

const TABLES_IN_SCHEMA_SQL: &str = "SELECT * FROM information_schema.tables \
     WHERE table_schema = $1 ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT * FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position";

const BLOAT_SQL: &str = "SELECT dead_tuple_percent FROM pgstattuple($1::regclass)";

const DATABASE_SIZE_SQL: &str = "SELECT current_database() AS dbname, \
     pg_database_size(current_database()) AS size_bytes, \
     pg_size_pretty(pg_database_size(current_database())) AS size_pretty";

fn schema_param() -> ToolParameter {
    ToolParameter::required("schema_name", ParamType::String, "Schema name")
}

fn table_param() -> ToolParameter {
    ToolParameter::required("table_name", ParamType::String, "Table name")
}

pub(crate) fn tools(deps: &Arc<ToolDeps>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListAllTables(deps.clone())),
        Arc::new(ListTablesInSchema(deps.clone())),
        Arc::new(ListColumnsInTable(deps.clone())),
        Arc::new(CheckBloat(deps.clone())),
        Arc::new(DatabaseSize(deps.clone())),
        Arc::new(CountRows(deps.clone())),
        Arc::new(RunQuery(deps.clone())),
    ]
}

pub struct ListAllTables(Arc<ToolDeps>);

#[async_trait]
impl Tool for ListAllTables {
    fn name(&self) -> &'static str {
        "list-all-tables"
    }

    fn description(&self) -> &'static str {
        "List all tables in a connected PostgreSQL database"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let rows = self.0.query(params.connection_id()?, ALL_TABLES_SQL, &[]).await?;
        Ok(ToolOutput::report("Tables", rows.rows_json()))
    }
}

pub struct ListTablesInSchema(Arc<ToolDeps>);

#[async_trait]
impl Tool for ListTablesInSchema {
    fn name(&self) -> &'static str {
        "list-all-tables-in-schema"
    }

    fn description(&self) -> &'static str {
        "List all tables in a given schema"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id(), schema_param()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let schema = params.require_str("schema_name")?;
        let rows = self
            .0
            .query(params.connection_id()?, TABLES_IN_SCHEMA_SQL, &[json!(schema)])
            .await?;
        Ok(ToolOutput::report(
            format!("Tables in schema {}", schema),
            rows.rows_json(),
        ))
    }
}

pub struct ListColumnsInTable(Arc<ToolDeps>);

#[async_trait]
impl Tool for ListColumnsInTable {
    fn name(&self) -> &'static str {
        "list-all-columns-in-table"
    }

    fn description(&self) -> &'static str {
        "List all columns in a specified table"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id(), schema_param(), table_param()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let schema = params.require_str("schema_name")?;
        let table = params.require_str("table_name")?;
        let rows = self
            .0
            .query(
                params.connection_id()?,
                COLUMNS_SQL,
                &[json!(schema), json!(table)],
            )
            .await?;
        Ok(ToolOutput::report(
            format!("Columns of {}.{}", schema, table),
            rows.rows_json(),
        ))
    }
}

pub struct CheckBloat(Arc<ToolDeps>);

#[async_trait]
impl Tool for CheckBloat {
    fn name(&self) -> &'static str {
        "check-bloat"
    }

    fn description(&self) -> &'static str {
        "Dead tuple percentage of a table, measured with pgstattuple"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id(), schema_param(), table_param()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let schema = params.require_str("schema_name")?;
        let table = params.require_str("table_name")?;
        let relation = qualified_name(schema, table)?;
        let result = self
            .0
            .query(params.connection_id()?, BLOAT_SQL, &[json!(relation)])
            .await?;
        let percent = result
            .first()
            .and_then(|row| row.get("dead_tuple_percent"))
            .map(SqlValue::to_json)
            .unwrap_or_else(|| json!(0));
        Ok(ToolOutput::report(
            format!("Bloat of {}.{}", schema, table),
            json!({
                "schemaname": schema,
                "relname": table,
                "dead_tuple_percent": percent,
            }),
        ))
    }
}

pub struct DatabaseSize(Arc<ToolDeps>);

#[async_trait]
impl Tool for DatabaseSize {
    fn name(&self) -> &'static str {
        "database-size"
    }

    fn description(&self) -> &'static str {
        "Find the size of the connected PostgreSQL database"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let result = self
            .0
            .query(params.connection_id()?, DATABASE_SIZE_SQL, &[])
            .await?;
        let row = result
            .first()
            .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
            .unwrap_or_else(|| json!({}));
        Ok(ToolOutput::report("Database Size", row))
    }
}

pub struct CountRows(Arc<ToolDeps>);

#[async_trait]
impl Tool for CountRows {
    fn name(&self) -> &'static str {
        "count-rows"
    }

    fn description(&self) -> &'static str {
        "Count the rows of a table"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id(), schema_param(), table_param()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let schema = params.require_str("schema_name")?;
        let table = params.require_str("table_name")?;
        let sql = format!("SELECT count(*) AS count FROM {}", qualified_name(schema, table)?);
        let result = self.0.query(params.connection_id()?, &sql, &[]).await?;
        let count = result
            .first()
            .and_then(|row| row.get("count"))
            .and_then(SqlValue::as_i64)
            .unwrap_or(0);
        Ok(ToolOutput::report(
            format!("Row count of {}.{}", schema, table),
            json!({ "schemaname": schema, "relname": table, "count": count }),
        ))
    }
}

pub struct RunQuery(Arc<ToolDeps>);

#[async_trait]
impl Tool for RunQuery {
    fn name(&self) -> &'static str {
        "query"
    }

    fn description(&self) -> &'static str {
        "Run a raw SQL statement on the connected database"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::connection_id(),
            ToolParameter::required("query", ParamType::String, "SQL statement to run"),
        ]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let statement = params.require_str("query")?;
        let result = self.0.query(params.connection_id()?, statement, &[]).await?;
        Ok(ToolOutput::table(&result))
    }
}
