//! Connection registry: one live pool per logical connection id.
//!
//! Mutations for a single id (`connect`, `disconnect`, `reconnect`) run
//! under that id's async mutex, so two recoveries can never race to
//! install two pools for the same id. Startup activation is guarded by a
//! separate lock and runs every target concurrently.

use super::connection::{ConnectTarget, Connector, DatabaseKind, PoolStatus, TargetPool};
use super::query::{truncate_for_log, QueryResult, StatementKind};
use crate::error::ServerError;
use crate::repository::{ConnectionRecord, TargetRepository};
use crate::telemetry::SharedMetrics;
use crate::vault::CredentialVault;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Runtime state of one connected id.
pub struct PooledConnection {
    /// Record snapshot the pool was built from (no secret).
    pub record: ConnectionRecord,
    /// When the pool was installed.
    pub connected_at: DateTime<Utc>,
    pool: Arc<dyn TargetPool>,
}

impl PooledConnection {
    /// Live pool handle.
    pub fn pool(&self) -> Arc<dyn TargetPool> {
        Arc::clone(&self.pool)
    }
}

/// Row of [`ConnectionRegistry::list_pools`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolInfo {
    pub id: i32,
    pub host: String,
    pub port: i32,
    pub database: String,
    pub username: String,
    pub connected: bool,
    pub active: bool,
    pub connected_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: PoolStatus,
}

/// Maps logical connection ids to live pools and recovers dropped ones.
pub struct ConnectionRegistry {
    repository: Arc<dyn TargetRepository>,
    vault: Arc<CredentialVault>,
    connector: Arc<dyn Connector>,
    metrics: SharedMetrics,
    pools: RwLock<HashMap<i32, Arc<PooledConnection>>>,
    id_locks: parking_lot::Mutex<HashMap<i32, Arc<Mutex<()>>>>,
    startup: Mutex<bool>,
    active: RwLock<Option<i32>>,
    last_errors: RwLock<HashMap<i32, String>>,
}

impl ConnectionRegistry {
    pub fn new(
        repository: Arc<dyn TargetRepository>,
        vault: Arc<CredentialVault>,
        connector: Arc<dyn Connector>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            repository,
            vault,
            connector,
            metrics,
            pools: RwLock::new(HashMap::new()),
            id_locks: parking_lot::Mutex::new(HashMap::new()),
            startup: Mutex::new(false),
            active: RwLock::new(None),
            last_errors: RwLock::new(HashMap::new()),
        }
    }

    fn id_lock(&self, id: i32) -> Arc<Mutex<()>> {
        Arc::clone(self.id_locks.lock().entry(id).or_default())
    }

    fn current(&self, id: i32) -> Option<Arc<PooledConnection>> {
        self.pools.read().get(&id).cloned()
    }

    /// Connect every record flagged `connect_at_startup`.
    ///
    /// All records are first marked inactive; each successful activation
    /// marks its record active again. Targets are activated concurrently
    /// and a failing target never affects the others. Runs at most once;
    /// later calls return 0.
    pub async fn activate_startup_set(&self) -> Result<usize, ServerError> {
        let mut initialized = self.startup.lock().await;
        if *initialized {
            debug!("Startup activation already ran");
            return Ok(0);
        }

        self.repository.deactivate_all().await?;
        let records = self.repository.list_connections(Some(true)).await?;
        info!("Activating {} startup connection(s)", records.len());

        let attempts = records.iter().map(|record| self.activate_one(record.id));
        let activated = join_all(attempts).await.into_iter().filter(|ok| *ok).count();

        *initialized = true;
        info!(
            "Startup activation finished: {}/{} connection(s) active",
            activated,
            records.len()
        );
        Ok(activated)
    }

    async fn activate_one(&self, id: i32) -> bool {
        if !self.connect(id).await {
            return false;
        }
        match self.repository.set_active(id, true).await {
            Ok(Some(_)) => {
                info!("Connection {} activated", id);
                true
            }
            Ok(None) => {
                warn!("Connection {} vanished during activation", id);
                self.disconnect(id).await;
                false
            }
            Err(e) => {
                warn!("Connection {} connected but could not be marked active: {}", id, e);
                true
            }
        }
    }

    /// Build (or rebuild) the pool for `id`.
    ///
    /// Returns `false` on any failure; the reason is kept in
    /// [`last_error`](Self::last_error).
    pub async fn connect(&self, id: i32) -> bool {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        self.connect_locked(id).await.is_ok()
    }

    /// Release the pool for `id`. Safe to call when nothing is connected.
    pub async fn disconnect(&self, id: i32) {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        self.disconnect_locked(id).await;
    }

    /// Disconnect, then connect again.
    pub async fn reconnect(&self, id: i32) -> bool {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        self.metrics.record_reconnect();
        self.disconnect_locked(id).await;
        self.connect_locked(id).await.is_ok()
    }

    async fn connect_locked(&self, id: i32) -> Result<(), ServerError> {
        let result = self.open(id).await;
        self.metrics.record_connect(result.is_ok());

        match result {
            Ok((record, pool)) => {
                let superseded = self.pools.write().remove(&id);
                if let Some(old) = superseded {
                    debug!("Releasing superseded pool for connection {}", id);
                    old.pool.close().await;
                }
                info!(
                    "Connected: {}@{}:{}/{} [id={}]",
                    record.username, record.host, record.port, record.database_name, id
                );
                self.pools.write().insert(
                    id,
                    Arc::new(PooledConnection {
                        record,
                        connected_at: Utc::now(),
                        pool,
                    }),
                );
                self.last_errors.write().remove(&id);
                Ok(())
            }
            Err(e) => {
                error!("Connection failed for id={}: {}", id, e);
                self.last_errors.write().insert(id, e.to_string());
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        id: i32,
    ) -> Result<(ConnectionRecord, Arc<dyn TargetPool>), ServerError> {
        let record = self
            .repository
            .get_connection_with_secret(id)
            .await?
            .ok_or_else(|| ServerError::not_found("Connection", id))?;

        let kind = DatabaseKind::from_type_name(record.database_type_name.as_deref().unwrap_or(""))?;
        let password = match record.encrypted_password.as_deref() {
            Some(cipher) if !cipher.is_empty() => self.vault.decrypt(cipher)?,
            _ => String::new(),
        };
        let port = u16::try_from(record.port)
            .map_err(|_| ServerError::config(format!("Invalid port {}", record.port)))?;

        let target = ConnectTarget {
            id,
            kind,
            host: record.host.clone(),
            port,
            database_name: record.database_name.clone(),
            username: record.username.clone(),
            password,
        };
        let pool = self.connector.connect(&target).await?;
        Ok((record.without_secret(), pool))
    }

    async fn disconnect_locked(&self, id: i32) {
        let removed = self.pools.write().remove(&id);
        if let Some(entry) = removed {
            entry.pool.close().await;
            info!("Disconnected id={}", id);
        }
        let mut active = self.active.write();
        if *active == Some(id) {
            *active = None;
        }
    }

    /// Replace `stale` with a fresh pool unless another caller already did.
    async fn recover(&self, id: i32, stale: &Arc<dyn TargetPool>) -> Result<(), ServerError> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        if let Some(current) = self.current(id) {
            if !Arc::ptr_eq(&current.pool, stale) {
                debug!("Connection {} was already recovered by another caller", id);
                return Ok(());
            }
        }

        self.metrics.record_reconnect();
        self.disconnect_locked(id).await;
        self.connect_locked(id).await
    }

    async fn ensure_connected(&self, id: i32) -> Result<Arc<dyn TargetPool>, ServerError> {
        if let Some(entry) = self.current(id) {
            return Ok(entry.pool());
        }

        let lock = self.id_lock(id);
        let _guard = lock.lock().await;
        if self.current(id).is_none() {
            self.connect_locked(id).await.map_err(|e| {
                if e.is_connectivity() {
                    ServerError::connectivity(format!("Cannot connect id={}: {}", id, e))
                } else {
                    e
                }
            })?;
        }
        self.current(id)
            .map(|entry| entry.pool())
            .ok_or_else(|| ServerError::connectivity(format!("Cannot connect id={}", id)))
    }

    /// A pool for `id` that just answered a liveness probe.
    ///
    /// Connects first when the id is absent. A connectivity failure of the
    /// probe triggers exactly one reconnect and one more probe; any other
    /// probe failure is returned as is.
    pub async fn acquire_healthy(&self, id: i32) -> Result<Arc<dyn TargetPool>, ServerError> {
        let pool = self.ensure_connected(id).await?;

        match pool.probe().await {
            Ok(()) => Ok(pool),
            Err(e) if e.is_connectivity() => {
                warn!("Pool unhealthy ({}). Reconnecting id={} ...", e, id);
                self.recover(id, &pool).await?;
                let fresh = self
                    .current(id)
                    .map(|entry| entry.pool())
                    .ok_or_else(|| ServerError::connectivity(format!("Reconnect failed id={}", id)))?;
                fresh.probe().await?;
                Ok(fresh)
            }
            Err(e) => Err(e),
        }
    }

    /// Run one statement against `id`.
    ///
    /// Row-returning statements yield their rows; everything else yields
    /// an empty result carrying the affected row count. A connectivity
    /// failure during execution is retried once on a fresh pool.
    pub async fn execute(
        &self,
        id: i32,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, ServerError> {
        let kind = StatementKind::classify(statement);
        debug!(
            "Executing on connection {} ({:?}): {}",
            id,
            kind,
            truncate_for_log(statement)
        );

        let started = Instant::now();
        let result = match self.acquire_healthy(id).await {
            Ok(pool) => self.run_with_retry(id, &pool, kind, statement, params).await,
            Err(e) => Err(e),
        };

        self.metrics.record_query(result.is_ok(), started.elapsed());
        result
    }

    async fn run_with_retry(
        &self,
        id: i32,
        pool: &Arc<dyn TargetPool>,
        kind: StatementKind,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, ServerError> {
        match run(pool.as_ref(), kind, statement, params).await {
            Err(e) if e.is_connectivity() => {
                warn!(
                    "Lost connection while running query ({}). Reconnecting id={} ...",
                    e, id
                );
                self.recover(id, pool).await?;
                match self.current(id) {
                    Some(entry) => run(entry.pool.as_ref(), kind, statement, params).await,
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    /// Every live pool, ordered by id.
    pub fn list_pools(&self) -> Vec<PoolInfo> {
        let active = *self.active.read();
        let mut pools: Vec<PoolInfo> = self
            .pools
            .read()
            .iter()
            .map(|(id, entry)| PoolInfo {
                id: *id,
                host: entry.record.host.clone(),
                port: entry.record.port,
                database: entry.record.database_name.clone(),
                username: entry.record.username.clone(),
                connected: true,
                active: active == Some(*id),
                connected_at: entry.connected_at,
                status: entry.pool.status(),
            })
            .collect();
        pools.sort_by_key(|p| p.id);
        pools
    }

    /// Whether a live pool exists for `id`.
    pub fn is_connected(&self, id: i32) -> bool {
        self.pools.read().contains_key(&id)
    }

    /// Number of live pools.
    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    /// Point the "active" slot at a connected id.
    pub fn set_active_connection(&self, id: i32) -> Result<(), ServerError> {
        if !self.is_connected(id) {
            return Err(ServerError::validation(format!(
                "Connection {} is not connected",
                id
            )));
        }
        *self.active.write() = Some(id);
        Ok(())
    }

    /// Id held by the "active" slot.
    pub fn active_connection(&self) -> Option<i32> {
        *self.active.read()
    }

    /// Message of the most recent failed connect for `id`.
    pub fn last_error(&self, id: i32) -> Option<String> {
        self.last_errors.read().get(&id).cloned()
    }

    /// Disconnect every id.
    pub async fn close_all(&self) {
        let ids: Vec<i32> = self.pools.read().keys().copied().collect();
        info!("Closing {} pool(s)", ids.len());
        for id in ids {
            self.disconnect(id).await;
        }
    }
}

async fn run(
    pool: &dyn TargetPool,
    kind: StatementKind,
    statement: &str,
    params: &[Value],
) -> Result<QueryResult, ServerError> {
    match kind {
        StatementKind::RowReturning => pool.fetch(statement, params).await,
        StatementKind::NonRowReturning => {
            let started = Instant::now();
            let affected = pool.execute(statement, params).await?;
            let mut result = QueryResult::affected(affected);
            result.execution_time_ms = started.elapsed().as_millis() as u64;
            Ok(result)
        }
    }
}
