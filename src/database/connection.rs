//! Target database kinds and their native connection pools.
//!
//! Every supported engine implements the same small capability contract
//! ([`TargetPool`]: probe, fetch, execute, close) and is selected from the
//! closed [`DatabaseKind`] set by the connection record's type name.

use crate::config::PoolConfig;
use crate::constants::PROBE_STATEMENT;
use crate::database::query::QueryResult;
use crate::error::ServerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Supported target database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// PostgreSQL via the native wire protocol.
    Postgres,
}

impl DatabaseKind {
    /// Resolve a kind from a `database_types.name` value.
    pub fn from_type_name(name: &str) -> Result<Self, ServerError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(DatabaseKind::Postgres),
            other => Err(ServerError::config(format!(
                "Unsupported database type: '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseKind::Postgres => write!(f, "postgresql"),
        }
    }
}

/// Everything needed to open a pool for one logical connection.
///
/// Holds the plaintext password, so it only lives for the duration of a
/// single connect attempt.
#[derive(Clone)]
pub struct ConnectTarget {
    /// Logical connection id.
    pub id: i32,
    /// Engine to use.
    pub kind: DatabaseKind,
    /// Target host.
    pub host: String,
    /// Target port.
    pub port: u16,
    /// Database name.
    pub database_name: String,
    /// Login user.
    pub username: String,
    /// Decrypted password; empty when the record stores none.
    pub password: String,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pool status information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Total number of connections in the pool.
    pub total_connections: u32,
    /// Number of idle connections.
    pub idle_connections: usize,
}

/// Capability contract of a live pool for one target.
#[async_trait]
pub trait TargetPool: Send + Sync {
    /// Cheap liveness round-trip.
    async fn probe(&self) -> Result<(), ServerError>;

    /// Run a row-returning statement.
    async fn fetch(&self, statement: &str, params: &[Value]) -> Result<QueryResult, ServerError>;

    /// Run a statement that returns no rows; yields the affected row count.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, ServerError>;

    /// Release every connection held by the pool.
    async fn close(&self);

    /// Current pool occupancy.
    fn status(&self) -> PoolStatus {
        PoolStatus::default()
    }
}

/// Opens pools for connect targets.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a pool and verify it with a probe.
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn TargetPool>, ServerError>;
}

/// Connector that dispatches to the native client of each [`DatabaseKind`].
#[derive(Debug, Clone, Default)]
pub struct NativeConnector {
    pool: PoolConfig,
}

impl NativeConnector {
    /// Create a connector applying the given pool settings to every target.
    pub fn new(pool: PoolConfig) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Connector for NativeConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn TargetPool>, ServerError> {
        match target.kind {
            DatabaseKind::Postgres => {
                let pool = PgTargetPool::connect(target, &self.pool).await?;
                Ok(Arc::new(pool))
            }
        }
    }
}

/// PostgreSQL pool backed by sqlx.
pub struct PgTargetPool {
    pool: PgPool,
}

impl PgTargetPool {
    /// Build a pool for a target and run the liveness probe once.
    pub async fn connect(target: &ConnectTarget, config: &PoolConfig) -> Result<Self, ServerError> {
        info!(
            "Creating pool for connection {} ({}:{}/{}, min: {}, max: {})",
            target.id,
            target.host,
            target.port,
            target.database_name,
            config.min_connections,
            config.max_connections
        );

        let mut options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .database(&target.database_name)
            .username(&target.username)
            .application_name("dbmcp-server")
            .statement_cache_capacity(config.statement_cache_capacity);
        if !target.password.is_empty() {
            options = options.password(&target.password);
        }

        let connect = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(options);

        let pool = tokio::time::timeout(config.connect_timeout, connect)
            .await
            .map_err(|_| {
                ServerError::connectivity(format!(
                    "Timed out after {}s connecting to {}:{}",
                    config.connect_timeout.as_secs(),
                    target.host,
                    target.port
                ))
            })??;

        let pool = Self { pool };
        pool.probe().await?;
        debug!("Initial probe for connection {} succeeded", target.id);
        Ok(pool)
    }
}

#[async_trait]
impl TargetPool for PgTargetPool {
    async fn probe(&self) -> Result<(), ServerError> {
        sqlx::query(PROBE_STATEMENT).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch(&self, statement: &str, params: &[Value]) -> Result<QueryResult, ServerError> {
        let start = Instant::now();
        let rows = bind_params(sqlx::query(statement), params)
            .fetch_all(&self.pool)
            .await?;
        let mut result = QueryResult::from_pg_rows(&rows);
        result.execution_time_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, ServerError> {
        let done = bind_params(sqlx::query(statement), params)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            total_connections: self.pool.size(),
            idle_connections: self.pool.num_idle(),
        }
    }
}

/// Bind JSON parameters positionally.
///
/// Integers bind as `int8`, other numbers as `float8`, arrays and objects
/// as `jsonb`.
pub fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s.clone()),
            other => query.bind(sqlx::types::Json(other.clone())),
        };
    }
    query
}
