//! Metadata repository over PostgreSQL.

use super::models::{
    ConnectionInput, ConnectionRecord, DatabaseType, GrowthTrend, NewJob, ScheduledJob, TrendScope,
};
use super::schema::METADATA_SCHEMA;
use super::{JobRepository, TargetRepository, TrendRepository};
use crate::config::MetadataDbConfig;
use crate::constants::DEFAULT_CONNECT_TIMEOUT;
use crate::error::ServerError;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, instrument};

const CONNECTION_COLUMNS: &str = "c.id, c.database_type_id, t.name AS database_type_name, \
     c.host, c.port, c.database_name, c.username, c.is_active, c.description, c.connect_at_startup";

const CONNECTION_ORDER: &str = "ORDER BY t.name, c.host, c.port, c.database_name";

/// Growth per database or per table. For the database scope the name
/// columns are NULL and the grouping collapses to a single row.
const GROWTH_TREND_SQL: &str = r#"
WITH base AS (
    SELECT schemaname, relname, snapshot_ts::date AS d, max(size_bytes) AS size_bytes
    FROM trends.pg_capacity_snapshots
    WHERE scope = $1
      AND dbname = $2
      AND snapshot_ts >= now() - make_interval(days => $3)
    GROUP BY 1, 2, 3
),
agg AS (
    SELECT schemaname,
           relname,
           min(d) AS start_date,
           max(d) AS end_date,
           (array_agg(size_bytes ORDER BY d))[1]      AS start_size,
           (array_agg(size_bytes ORDER BY d DESC))[1] AS end_size,
           count(*) AS points
    FROM base
    GROUP BY 1, 2
)
SELECT schemaname,
       relname,
       start_date,
       end_date,
       start_size,
       end_size,
       points,
       round((end_size - start_size) / 1048576.0, 2)::float8 AS growth_mb,
       round((end_size - start_size)::numeric / nullif(start_size, 0) * 100, 2)::float8 AS growth_pct,
       round((end_size - start_size) / 1048576.0 / nullif(end_date - start_date, 0), 2)::float8
           AS growth_mb_per_day
FROM agg
ORDER BY growth_mb DESC
LIMIT $4
"#;

/// Repository backed by the metadata database.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connect to the metadata database.
    pub async fn connect(config: &MetadataDbConfig) -> Result<Self, ServerError> {
        info!(
            "Connecting to metadata database {}:{}/{}",
            config.host, config.port, config.database
        );
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(DEFAULT_CONNECT_TIMEOUT)
            .connect(&config.connection_url())
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create schemas, tables and indexes that do not exist yet.
    #[instrument(level = "info", skip(self))]
    pub async fn migrate(&self) -> Result<(), ServerError> {
        sqlx::raw_sql(METADATA_SCHEMA).execute(&self.pool).await?;
        debug!("Metadata schema is up to date");
        Ok(())
    }

    async fn fetch_connection(
        &self,
        id: i32,
        with_secret: bool,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        let secret = if with_secret {
            "c.encrypted_password"
        } else {
            "NULL::text AS encrypted_password"
        };
        let sql = format!(
            "SELECT {}, {} FROM repository.database_connections c \
             LEFT JOIN repository.database_types t ON c.database_type_id = t.id \
             WHERE c.id = $1",
            CONNECTION_COLUMNS, secret
        );
        Ok(sqlx::query_as::<_, ConnectionRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

/// Re-select a just-written connection row with its type name joined in.
fn joined_returning(write: &str) -> String {
    format!(
        "WITH c AS ({}) SELECT {}, NULL::text AS encrypted_password FROM c \
         LEFT JOIN repository.database_types t ON c.database_type_id = t.id",
        write, CONNECTION_COLUMNS
    )
}

#[async_trait]
impl TargetRepository for PgRepository {
    async fn list_types(&self) -> Result<Vec<DatabaseType>, ServerError> {
        Ok(sqlx::query_as::<_, DatabaseType>(
            "SELECT id, name FROM repository.database_types ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?)
    }

    async fn get_type(&self, id: i32) -> Result<Option<DatabaseType>, ServerError> {
        Ok(sqlx::query_as::<_, DatabaseType>(
            "SELECT id, name FROM repository.database_types WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn add_type(&self, name: &str) -> Result<DatabaseType, ServerError> {
        Ok(sqlx::query_as::<_, DatabaseType>(
            "INSERT INTO repository.database_types (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn update_type(&self, id: i32, name: &str) -> Result<Option<DatabaseType>, ServerError> {
        Ok(sqlx::query_as::<_, DatabaseType>(
            "UPDATE repository.database_types SET name = $1 WHERE id = $2 RETURNING id, name",
        )
        .bind(name)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn delete_type(&self, id: i32) -> Result<bool, ServerError> {
        let done = sqlx::query("DELETE FROM repository.database_types WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_connections(
        &self,
        connect_at_startup: Option<bool>,
    ) -> Result<Vec<ConnectionRecord>, ServerError> {
        let mut sql = format!(
            "SELECT {}, NULL::text AS encrypted_password FROM repository.database_connections c \
             LEFT JOIN repository.database_types t ON c.database_type_id = t.id",
            CONNECTION_COLUMNS
        );
        if connect_at_startup.is_some() {
            sql.push_str(" WHERE c.connect_at_startup = $1");
        }
        sql.push(' ');
        sql.push_str(CONNECTION_ORDER);

        let mut query = sqlx::query_as::<_, ConnectionRecord>(&sql);
        if let Some(flag) = connect_at_startup {
            query = query.bind(flag);
        }
        Ok(query.fetch_all(&self.pool).await?)
    }

    async fn get_connection(&self, id: i32) -> Result<Option<ConnectionRecord>, ServerError> {
        self.fetch_connection(id, false).await
    }

    async fn get_connection_with_secret(
        &self,
        id: i32,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        self.fetch_connection(id, true).await
    }

    async fn add_connection(
        &self,
        input: &ConnectionInput,
        encrypted_password: &str,
    ) -> Result<ConnectionRecord, ServerError> {
        let sql = joined_returning(
            "INSERT INTO repository.database_connections \
             (database_type_id, host, port, database_name, username, encrypted_password, \
              is_active, description, connect_at_startup) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        );
        Ok(sqlx::query_as::<_, ConnectionRecord>(&sql)
            .bind(input.database_type_id)
            .bind(&input.host)
            .bind(input.port)
            .bind(&input.database_name)
            .bind(&input.username)
            .bind(encrypted_password)
            .bind(input.is_active)
            .bind(&input.description)
            .bind(input.connect_at_startup)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_connection(
        &self,
        id: i32,
        input: &ConnectionInput,
        encrypted_password: Option<&str>,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        let sql = joined_returning(
            "UPDATE repository.database_connections \
             SET database_type_id = $1, host = $2, port = $3, database_name = $4, username = $5, \
                 encrypted_password = COALESCE($6, encrypted_password), is_active = $7, \
                 description = $8, connect_at_startup = $9 \
             WHERE id = $10 RETURNING *",
        );
        Ok(sqlx::query_as::<_, ConnectionRecord>(&sql)
            .bind(input.database_type_id)
            .bind(&input.host)
            .bind(input.port)
            .bind(&input.database_name)
            .bind(&input.username)
            .bind(encrypted_password)
            .bind(input.is_active)
            .bind(&input.description)
            .bind(input.connect_at_startup)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_connection(&self, id: i32) -> Result<bool, ServerError> {
        let done = sqlx::query("DELETE FROM repository.database_connections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn deactivate_all(&self) -> Result<u64, ServerError> {
        let done = sqlx::query("UPDATE repository.database_connections SET is_active = FALSE")
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn set_active(
        &self,
        id: i32,
        active: bool,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        let sql = joined_returning(
            "UPDATE repository.database_connections SET is_active = $1 WHERE id = $2 RETURNING *",
        );
        Ok(sqlx::query_as::<_, ConnectionRecord>(&sql)
            .bind(active)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Metadata pool closed");
    }
}

const JOB_COLUMNS: &str = "job_id, job_name, tool_name, tool_params, trigger_type, \
     interval_seconds, cron_expression, is_active, last_run_at, created_at, updated_at";

#[async_trait]
impl JobRepository for PgRepository {
    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError> {
        let sql = format!(
            "SELECT {} FROM scheduler.scheduled_jobs ORDER BY job_id",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScheduledJob>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError> {
        let sql = format!(
            "SELECT {} FROM scheduler.scheduled_jobs WHERE is_active = TRUE ORDER BY job_id",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScheduledJob>(&sql)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_job(&self, job_id: i32) -> Result<Option<ScheduledJob>, ServerError> {
        let sql = format!(
            "SELECT {} FROM scheduler.scheduled_jobs WHERE job_id = $1",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScheduledJob>(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn add_job(&self, job: &NewJob) -> Result<ScheduledJob, ServerError> {
        let sql = format!(
            "INSERT INTO scheduler.scheduled_jobs \
             (job_name, tool_name, tool_params, trigger_type, interval_seconds, cron_expression, \
              is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScheduledJob>(&sql)
            .bind(&job.job_name)
            .bind(&job.tool_name)
            .bind(job.tool_params.clone())
            .bind(&job.trigger_type)
            .bind(job.interval_seconds)
            .bind(&job.cron_expression)
            .bind(job.is_active)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn update_job(&self, job: &ScheduledJob) -> Result<Option<ScheduledJob>, ServerError> {
        let sql = format!(
            "UPDATE scheduler.scheduled_jobs \
             SET job_name = $1, tool_name = $2, tool_params = $3, trigger_type = $4, \
                 interval_seconds = $5, cron_expression = $6, is_active = $7, updated_at = now() \
             WHERE job_id = $8 RETURNING {}",
            JOB_COLUMNS
        );
        Ok(sqlx::query_as::<_, ScheduledJob>(&sql)
            .bind(&job.job_name)
            .bind(&job.tool_name)
            .bind(job.tool_params.clone())
            .bind(&job.trigger_type)
            .bind(job.interval_seconds)
            .bind(&job.cron_expression)
            .bind(job.is_active)
            .bind(job.job_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_job(&self, job_id: i32) -> Result<bool, ServerError> {
        let done = sqlx::query("DELETE FROM scheduler.scheduled_jobs WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn touch_last_run(&self, job_id: i32) -> Result<(), ServerError> {
        let done =
            sqlx::query("UPDATE scheduler.scheduled_jobs SET last_run_at = now() WHERE job_id = $1")
                .bind(job_id)
                .execute(&self.pool)
                .await?;
        if done.rows_affected() == 0 {
            return Err(ServerError::not_found("Job", job_id));
        }
        Ok(())
    }
}

#[async_trait]
impl TrendRepository for PgRepository {
    async fn add_database_snapshot(
        &self,
        dbname: &str,
        size_bytes: i64,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO trends.pg_capacity_snapshots (scope, dbname, size_bytes) \
             VALUES ('db', $1, $2)",
        )
        .bind(dbname)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_table_snapshot(
        &self,
        dbname: &str,
        schemaname: &str,
        relname: &str,
        size_bytes: i64,
    ) -> Result<(), ServerError> {
        sqlx::query(
            "INSERT INTO trends.pg_capacity_snapshots \
             (scope, dbname, schemaname, relname, size_bytes) VALUES ('table', $1, $2, $3, $4)",
        )
        .bind(dbname)
        .bind(schemaname)
        .bind(relname)
        .bind(size_bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn growth_trend(
        &self,
        scope: TrendScope,
        dbname: &str,
        days: i32,
        limit: i64,
    ) -> Result<Vec<GrowthTrend>, ServerError> {
        Ok(sqlx::query_as::<_, GrowthTrend>(GROWTH_TREND_SQL)
            .bind(scope.as_str())
            .bind(dbname)
            .bind(days)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_returning_wraps_write() {
        let sql = joined_returning("UPDATE x SET y = 1 RETURNING *");
        assert!(sql.starts_with("WITH c AS (UPDATE x"));
        assert!(sql.contains("t.name AS database_type_name"));
        assert!(sql.contains("NULL::text AS encrypted_password"));
    }

    #[test]
    fn test_growth_sql_binds_dbname() {
        assert!(GROWTH_TREND_SQL.contains("dbname = $2"));
        assert!(!GROWTH_TREND_SQL.contains("current_database()"));
    }
}
