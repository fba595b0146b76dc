//! Health, activity and capacity reports for a target.

use super::{ParamType, Tool, ToolDeps, ToolOutput, ToolParameter, ToolParams};
use crate::constants::{
    DEFAULT_BLOAT_REPORT_LIMIT, DEFAULT_CAPACITY_TOP_TABLES, DEFAULT_TOP_QUERIES_LIMIT,
    PG_CHECKPOINTER_VERSION_NUM,
};
use crate::database::{QueryResult, SqlValue};
use crate::error::ServerError;
use crate::security::qualified_name;
use crate::telemetry::RequestContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

const HEALTH_SQL: &str = r#"
SELECT
    now()              AS collected_at,
    current_database() AS db_name,
    numbackends,
    xact_commit,
    xact_rollback,
    blks_read,
    blks_hit,
    CASE
        WHEN (blks_hit + blks_read) = 0 THEN NULL
        ELSE round(blks_hit::numeric * 100.0 / (blks_hit + blks_read), 2)
    END                AS cache_hit_ratio,
    tup_returned,
    tup_fetched,
    tup_inserted,
    tup_updated,
    tup_deleted,
    deadlocks,
    temp_files,
    temp_bytes,
    blk_read_time,
    blk_write_time
FROM pg_stat_database
WHERE datname = current_database()
"#;

const CONNECTIONS_SUMMARY_SQL: &str = r#"
SELECT
    count(*)                                              AS total_connections,
    count(*) FILTER (WHERE state = 'active')              AS active_connections,
    count(*) FILTER (WHERE state = 'idle')                AS idle_connections,
    count(*) FILTER (WHERE state = 'idle in transaction') AS idle_in_tx_connections,
    max(EXTRACT(EPOCH FROM (now() - xact_start)))::float8  AS max_tx_age_seconds,
    max(EXTRACT(EPOCH FROM (now() - query_start)))::float8 AS max_query_age_seconds
FROM pg_stat_activity
WHERE datname = current_database()
"#;

const CONNECTIONS_DETAIL_SQL: &str = r#"
SELECT
    pid,
    usename,
    application_name,
    client_addr::text                                  AS client_addr,
    state,
    EXTRACT(EPOCH FROM (now() - xact_start))::float8  AS tx_age_seconds,
    EXTRACT(EPOCH FROM (now() - query_start))::float8 AS query_age_seconds,
    wait_event_type,
    wait_event,
    substring(query, 1, 200)                           AS query_sample
FROM pg_stat_activity
WHERE datname = current_database()
ORDER BY tx_age_seconds DESC NULLS LAST
LIMIT 20
"#;

const TOP_QUERIES_SQL: &str = r#"
SELECT
    queryid,
    calls,
    round(total_exec_time::numeric, 2) AS total_exec_time_ms,
    round(mean_exec_time::numeric, 2)  AS mean_exec_time_ms,
    rows,
    shared_blks_hit,
    shared_blks_read,
    CASE
        WHEN (shared_blks_hit + shared_blks_read) = 0 THEN NULL
        ELSE round(shared_blks_hit::numeric * 100.0 / (shared_blks_hit + shared_blks_read), 2)
    END                                AS cache_hit_ratio,
    substring(query, 1, 500)           AS query_sample
FROM pg_stat_statements
WHERE dbid = (SELECT oid FROM pg_database WHERE datname = current_database())
ORDER BY total_exec_time DESC
LIMIT $1
"#;

const HAS_PGSTATTUPLE_SQL: &str = r#"
SELECT EXISTS (
    SELECT 1
    FROM pg_available_extensions
    WHERE name = 'pgstattuple'
      AND installed_version IS NOT NULL
) AS has_pgstattuple
"#;

const BLOAT_CANDIDATES_SQL: &str = r#"
SELECT
    schemaname,
    relname,
    n_live_tup,
    n_dead_tup,
    CASE
        WHEN (n_live_tup + n_dead_tup) = 0 THEN 0
        ELSE round(n_dead_tup::numeric * 100.0 / (n_live_tup + n_dead_tup), 2)
    END AS dead_tuple_pct
FROM pg_stat_user_tables
ORDER BY dead_tuple_pct DESC
LIMIT $1
"#;

const PGSTATTUPLE_SQL: &str = "SELECT * FROM pgstattuple($1::regclass)";

const VACUUM_PROGRESS_SQL: &str = r#"
SELECT
    datname,
    relid::regclass::text AS table_name,
    phase,
    heap_blks_total,
    heap_blks_scanned,
    heap_blks_vacuumed,
    index_vacuum_count
FROM pg_stat_progress_vacuum
WHERE datname = current_database()
"#;

const TABLE_HEALTH_SQL: &str = r#"
SELECT
    schemaname,
    relname,
    n_live_tup,
    n_dead_tup,
    last_vacuum,
    last_autovacuum,
    last_analyze,
    last_autoanalyze
FROM pg_stat_user_tables
ORDER BY n_dead_tup DESC
LIMIT 50
"#;

const SERVER_VERSION_SQL: &str =
    "SELECT current_setting('server_version_num')::int AS version_num";

const BGWRITER_SQL: &str =
    "SELECT buffers_clean, maxwritten_clean, buffers_alloc, stats_reset FROM pg_stat_bgwriter";

const CHECKPOINTER_SQL: &str = "SELECT num_timed, num_requested, buffers_written, \
     write_time, sync_time, stats_reset FROM pg_stat_checkpointer";

const LEGACY_CHECKPOINT_SQL: &str = "SELECT checkpoints_timed, checkpoints_req, \
     checkpoint_write_time, checkpoint_sync_time, buffers_checkpoint FROM pg_stat_bgwriter";

const DATABASE_SIZES_SQL: &str = r#"
SELECT
    datname,
    pg_database_size(datname) AS size_bytes
FROM pg_database
ORDER BY pg_database_size(datname) DESC
"#;

const TABLE_SIZES_SQL: &str = r#"
SELECT
    schemaname,
    relname,
    pg_total_relation_size(format('%I.%I', schemaname, relname)) AS size_bytes
FROM pg_stat_user_tables
ORDER BY size_bytes DESC
LIMIT $1
"#;

const REPLICATION_SQL: &str = r#"
SELECT
    pid,
    usesysid,
    usename,
    application_name,
    client_addr::text AS client_addr,
    state,
    sync_state,
    write_lag::text   AS write_lag,
    flush_lag::text   AS flush_lag,
    replay_lag::text  AS replay_lag,
    sent_lsn::text    AS sent_lsn,
    write_lsn::text   AS write_lsn,
    flush_lsn::text   AS flush_lsn,
    replay_lsn::text  AS replay_lsn
FROM pg_stat_replication
"#;

fn first_row(result: &QueryResult) -> Value {
    result
        .first()
        .and_then(|row| serde_json::to_value(row).ok())
        .unwrap_or_else(|| json!({}))
}

fn limit_param(description: &'static str, default: i64) -> ToolParameter {
    ToolParameter::optional("limit", ParamType::Integer, description, json!(default))
}

pub(crate) fn tools(deps: &Arc<ToolDeps>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(HealthOverview(deps.clone())),
        Arc::new(ConnectionsReport(deps.clone())),
        Arc::new(TopQueriesReport(deps.clone())),
        Arc::new(BloatReport(deps.clone())),
        Arc::new(AutovacuumActivity(deps.clone())),
        Arc::new(WalActivityReport(deps.clone())),
        Arc::new(CapacityReport(deps.clone())),
        Arc::new(ReplicationStatus(deps.clone())),
    ]
}

pub struct HealthOverview(Arc<ToolDeps>);

#[async_trait]
impl Tool for HealthOverview {
    fn name(&self) -> &'static str {
        "pg_health_overview"
    }

    fn description(&self) -> &'static str {
        "Health summary of the database: backends, commits, cache hit ratio, temp usage, deadlocks"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let result = self.0.query(params.connection_id()?, HEALTH_SQL, &[]).await?;
        Ok(ToolOutput::report("PostgreSQL Health Overview", result.rows_json()))
    }
}

pub struct ConnectionsReport(Arc<ToolDeps>);

#[async_trait]
impl Tool for ConnectionsReport {
    fn name(&self) -> &'static str {
        "pg_connections_report"
    }

    fn description(&self) -> &'static str {
        "Active, idle and idle-in-transaction session counts with the longest running transactions"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let id = params.connection_id()?;
        let summary = self.0.query(id, CONNECTIONS_SUMMARY_SQL, &[]).await?;
        let details = self.0.query(id, CONNECTIONS_DETAIL_SQL, &[]).await?;
        Ok(ToolOutput::report(
            "PostgreSQL Connections Report",
            json!({
                "summary": first_row(&summary),
                "top_long_running": details.rows_json(),
            }),
        ))
    }
}

pub struct TopQueriesReport(Arc<ToolDeps>);

#[async_trait]
impl Tool for TopQueriesReport {
    fn name(&self) -> &'static str {
        "pg_top_queries_report"
    }

    fn description(&self) -> &'static str {
        "Most expensive statements by total execution time, from pg_stat_statements"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::connection_id(),
            limit_param("Number of statements to list", DEFAULT_TOP_QUERIES_LIMIT),
        ]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let limit = params
            .optional_i64("limit")?
            .unwrap_or(DEFAULT_TOP_QUERIES_LIMIT)
            .max(1);
        let result = self
            .0
            .query(params.connection_id()?, TOP_QUERIES_SQL, &[json!(limit)])
            .await?;
        Ok(ToolOutput::report(
            format!("Top {} Queries (pg_stat_statements)", limit),
            result.rows_json(),
        ))
    }
}

/// Dead-tuple ranking, refined with pgstattuple when the extension is
/// installed. A failure on one table is reported in that table's entry.
pub struct BloatReport(Arc<ToolDeps>);

#[async_trait]
impl Tool for BloatReport {
    fn name(&self) -> &'static str {
        "pg_bloat_report"
    }

    fn description(&self) -> &'static str {
        "Table bloat analysis using pgstattuple when installed, dead tuple ratios otherwise"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::connection_id(),
            limit_param("Number of tables to inspect", DEFAULT_BLOAT_REPORT_LIMIT),
        ]
    }

    async fn call(&self, ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let id = params.connection_id()?;
        let limit = params
            .optional_i64("limit")?
            .unwrap_or(DEFAULT_BLOAT_REPORT_LIMIT)
            .max(1);

        let has_extension = self
            .0
            .query(id, HAS_PGSTATTUPLE_SQL, &[])
            .await?
            .first()
            .and_then(|row| row.get("has_pgstattuple"))
            .is_some_and(|v| matches!(v, SqlValue::Bool(true)));

        let candidates = self.0.query(id, BLOAT_CANDIDATES_SQL, &[json!(limit)]).await?;

        if !has_extension {
            return Ok(ToolOutput::report(
                "Table Bloat Report (Fallback Mode)",
                json!({
                    "mode": "dead_tuple_only_fallback",
                    "tables": candidates.rows_json(),
                    "note": "pgstattuple is not installed; showing estimates from pg_stat_user_tables only.",
                }),
            ));
        }

        let mut tables = Vec::with_capacity(candidates.rows.len());
        for row in &candidates.rows {
            let schema = row.get("schemaname").and_then(SqlValue::as_str).unwrap_or_default();
            let table = row.get("relname").and_then(SqlValue::as_str).unwrap_or_default();
            let estimated = row
                .get("dead_tuple_pct")
                .map(SqlValue::to_json)
                .unwrap_or(Value::Null);

            let measured = match qualified_name(schema, table) {
                Ok(relation) => self.0.query(id, PGSTATTUPLE_SQL, &[json!(relation)]).await,
                Err(e) => Err(e),
            };
            let mut entry = json!({
                "schemaname": schema,
                "relname": table,
                "dead_tuple_pct_estimated": estimated,
            });
            match measured {
                Ok(result) => entry["pgstattuple"] = first_row(&result),
                Err(e) => {
                    debug!("{} pgstattuple failed for {}.{}: {}", ctx.log_prefix(), schema, table, e);
                    entry["error"] = json!(e.to_string());
                }
            }
            tables.push(entry);
        }

        Ok(ToolOutput::report(
            "Table Bloat Report (pgstattuple)",
            json!({ "mode": "pgstattuple", "tables": tables }),
        ))
    }
}

pub struct AutovacuumActivity(Arc<ToolDeps>);

#[async_trait]
impl Tool for AutovacuumActivity {
    fn name(&self) -> &'static str {
        "pg_autovacuum_activity"
    }

    fn description(&self) -> &'static str {
        "Running VACUUM processes and the last vacuum/analyze times of tables"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let id = params.connection_id()?;
        let progress = self.0.query(id, VACUUM_PROGRESS_SQL, &[]).await?;
        let stats = self.0.query(id, TABLE_HEALTH_SQL, &[]).await?;
        Ok(ToolOutput::report(
            "Autovacuum Activity & Table Health",
            json!({
                "active_vacuum_processes": progress.rows_json(),
                "table_health": stats.rows_json(),
            }),
        ))
    }
}

/// Checkpoint statistics moved to `pg_stat_checkpointer` in PostgreSQL 17.
pub struct WalActivityReport(Arc<ToolDeps>);

#[async_trait]
impl Tool for WalActivityReport {
    fn name(&self) -> &'static str {
        "pg_wal_activity_report"
    }

    fn description(&self) -> &'static str {
        "Checkpoint, buffer and WAL writer behaviour"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let id = params.connection_id()?;
        let version = self
            .0
            .query(id, SERVER_VERSION_SQL, &[])
            .await?
            .first()
            .and_then(|row| row.get("version_num"))
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| ServerError::query("Could not read server_version_num"))?;

        let bgwriter = self.0.query(id, BGWRITER_SQL, &[]).await?;
        let checkpoint_sql = if version >= PG_CHECKPOINTER_VERSION_NUM {
            CHECKPOINTER_SQL
        } else {
            LEGACY_CHECKPOINT_SQL
        };
        let checkpointer = self.0.query(id, checkpoint_sql, &[]).await?;

        Ok(ToolOutput::report(
            "WAL & Checkpoint Activity",
            json!({
                "server_version_num": version,
                "bgwriter": bgwriter.rows_json(),
                "checkpointer": checkpointer.rows_json(),
            }),
        ))
    }
}

pub struct CapacityReport(Arc<ToolDeps>);

#[async_trait]
impl Tool for CapacityReport {
    fn name(&self) -> &'static str {
        "pg_capacity_report"
    }

    fn description(&self) -> &'static str {
        "Sizes of all databases and of the largest tables"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::connection_id(),
            ToolParameter::optional(
                "top_tables",
                ParamType::Integer,
                "Number of tables to list",
                json!(DEFAULT_CAPACITY_TOP_TABLES),
            ),
        ]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let id = params.connection_id()?;
        let top = params
            .optional_i64("top_tables")?
            .unwrap_or(DEFAULT_CAPACITY_TOP_TABLES)
            .max(1);
        let databases = self.0.query(id, DATABASE_SIZES_SQL, &[]).await?;
        let tables = self.0.query(id, TABLE_SIZES_SQL, &[json!(top)]).await?;
        Ok(ToolOutput::report(
            "PostgreSQL Capacity Report",
            json!({
                "databases": databases.rows_json(),
                "top_tables": tables.rows_json(),
            }),
        ))
    }
}

pub struct ReplicationStatus(Arc<ToolDeps>);

#[async_trait]
impl Tool for ReplicationStatus {
    fn name(&self) -> &'static str {
        "pg_replication_status"
    }

    fn description(&self) -> &'static str {
        "Standbys and replication lag as seen from the primary"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let result = self
            .0
            .query(params.connection_id()?, REPLICATION_SQL, &[])
            .await?;
        Ok(ToolOutput::report(
            "Replication Status",
            json!({
                "replicas": result.rows_json(),
                "note": "Only meaningful on a primary; pg_stat_replication is empty on a standby.",
            }),
        ))
    }
}
