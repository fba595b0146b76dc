//! In-process repository.
//!
//! Mirrors the constraints of the PostgreSQL schema closely enough for the
//! registry, scheduler and admin routes to be exercised without a database.

use super::models::{
    CapacitySnapshot, ConnectionInput, ConnectionRecord, DatabaseType, GrowthTrend, NewJob,
    ScheduledJob, TrendScope,
};
use super::{compute_growth, JobRepository, TargetRepository, TrendRepository};
use crate::error::ServerError;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;

const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

#[derive(Default)]
struct State {
    types: BTreeMap<i32, DatabaseType>,
    connections: BTreeMap<i32, ConnectionRecord>,
    jobs: BTreeMap<i32, ScheduledJob>,
    snapshots: Vec<CapacitySnapshot>,
    next_type_id: i32,
    next_connection_id: i32,
    next_job_id: i32,
}

impl State {
    fn type_name(&self, id: i32) -> Option<String> {
        self.types.get(&id).map(|t| t.name.clone())
    }
}

fn unique_violation(what: &str) -> ServerError {
    ServerError::QuerySemantic {
        message: format!("duplicate key value violates unique constraint on {}", what),
        sql_state: Some(UNIQUE_VIOLATION.to_string()),
    }
}

fn check_trigger_type(trigger_type: &str) -> Result<(), ServerError> {
    if matches!(trigger_type, "interval" | "cron") {
        Ok(())
    } else {
        Err(ServerError::QuerySemantic {
            message: "new row violates check constraint on trigger_type".to_string(),
            sql_state: Some(CHECK_VIOLATION.to_string()),
        })
    }
}

/// Repository holding everything in memory.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite `last_run_at` for a job.
    #[cfg(test)]
    pub(crate) fn set_last_run(&self, job_id: i32, at: Option<chrono::DateTime<Utc>>) {
        if let Some(job) = self.state.lock().jobs.get_mut(&job_id) {
            job.last_run_at = at;
        }
    }

    /// Add a snapshot with an explicit timestamp.
    pub fn push_snapshot(&self, snapshot: CapacitySnapshot) {
        self.state.lock().snapshots.push(snapshot);
    }
}

#[async_trait]
impl TargetRepository for InMemoryRepository {
    async fn list_types(&self) -> Result<Vec<DatabaseType>, ServerError> {
        Ok(self.state.lock().types.values().cloned().collect())
    }

    async fn get_type(&self, id: i32) -> Result<Option<DatabaseType>, ServerError> {
        Ok(self.state.lock().types.get(&id).cloned())
    }

    async fn add_type(&self, name: &str) -> Result<DatabaseType, ServerError> {
        let mut state = self.state.lock();
        if state.types.values().any(|t| t.name == name) {
            return Err(unique_violation("database_types.name"));
        }
        state.next_type_id += 1;
        let record = DatabaseType {
            id: state.next_type_id,
            name: name.to_string(),
        };
        state.types.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_type(&self, id: i32, name: &str) -> Result<Option<DatabaseType>, ServerError> {
        let mut state = self.state.lock();
        if state.types.values().any(|t| t.name == name && t.id != id) {
            return Err(unique_violation("database_types.name"));
        }
        let Some(record) = state.types.get_mut(&id) else {
            return Ok(None);
        };
        record.name = name.to_string();
        let record = record.clone();
        for conn in state.connections.values_mut() {
            if conn.database_type_id == id {
                conn.database_type_name = Some(name.to_string());
            }
        }
        Ok(Some(record))
    }

    async fn delete_type(&self, id: i32) -> Result<bool, ServerError> {
        let mut state = self.state.lock();
        let removed = state.types.remove(&id).is_some();
        if removed {
            state.connections.retain(|_, c| c.database_type_id != id);
        }
        Ok(removed)
    }

    async fn list_connections(
        &self,
        connect_at_startup: Option<bool>,
    ) -> Result<Vec<ConnectionRecord>, ServerError> {
        let state = self.state.lock();
        let mut records: Vec<ConnectionRecord> = state
            .connections
            .values()
            .filter(|c| connect_at_startup.is_none_or(|flag| c.connect_at_startup == flag))
            .map(ConnectionRecord::without_secret)
            .collect();
        records.sort_by(|a, b| {
            (&a.database_type_name, &a.host, a.port, &a.database_name).cmp(&(
                &b.database_type_name,
                &b.host,
                b.port,
                &b.database_name,
            ))
        });
        Ok(records)
    }

    async fn get_connection(&self, id: i32) -> Result<Option<ConnectionRecord>, ServerError> {
        Ok(self
            .state
            .lock()
            .connections
            .get(&id)
            .map(ConnectionRecord::without_secret))
    }

    async fn get_connection_with_secret(
        &self,
        id: i32,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        Ok(self.state.lock().connections.get(&id).cloned())
    }

    async fn add_connection(
        &self,
        input: &ConnectionInput,
        encrypted_password: &str,
    ) -> Result<ConnectionRecord, ServerError> {
        let mut state = self.state.lock();
        let Some(type_name) = state.type_name(input.database_type_id) else {
            return Err(ServerError::QuerySemantic {
                message: format!(
                    "database type {} referenced by connection does not exist",
                    input.database_type_id
                ),
                sql_state: Some("23503".to_string()),
            });
        };
        if state.connections.values().any(|c| {
            c.database_type_id == input.database_type_id
                && c.host == input.host
                && c.port == input.port
                && c.database_name == input.database_name
        }) {
            return Err(unique_violation("database_connections"));
        }

        state.next_connection_id += 1;
        let record = ConnectionRecord {
            id: state.next_connection_id,
            database_type_id: input.database_type_id,
            database_type_name: Some(type_name),
            host: input.host.clone(),
            port: input.port,
            database_name: input.database_name.clone(),
            username: input.username.clone(),
            encrypted_password: Some(encrypted_password.to_string()),
            is_active: input.is_active,
            description: input.description.clone(),
            connect_at_startup: input.connect_at_startup,
        };
        state.connections.insert(record.id, record.clone());
        Ok(record.without_secret())
    }

    async fn update_connection(
        &self,
        id: i32,
        input: &ConnectionInput,
        encrypted_password: Option<&str>,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        let mut state = self.state.lock();
        let type_name = state.type_name(input.database_type_id);
        let Some(record) = state.connections.get_mut(&id) else {
            return Ok(None);
        };
        record.database_type_id = input.database_type_id;
        record.database_type_name = type_name;
        record.host = input.host.clone();
        record.port = input.port;
        record.database_name = input.database_name.clone();
        record.username = input.username.clone();
        if let Some(secret) = encrypted_password {
            record.encrypted_password = Some(secret.to_string());
        }
        record.is_active = input.is_active;
        record.description = input.description.clone();
        record.connect_at_startup = input.connect_at_startup;
        Ok(Some(record.without_secret()))
    }

    async fn delete_connection(&self, id: i32) -> Result<bool, ServerError> {
        Ok(self.state.lock().connections.remove(&id).is_some())
    }

    async fn deactivate_all(&self) -> Result<u64, ServerError> {
        let mut state = self.state.lock();
        for record in state.connections.values_mut() {
            record.is_active = false;
        }
        Ok(state.connections.len() as u64)
    }

    async fn set_active(
        &self,
        id: i32,
        active: bool,
    ) -> Result<Option<ConnectionRecord>, ServerError> {
        let mut state = self.state.lock();
        Ok(state.connections.get_mut(&id).map(|record| {
            record.is_active = active;
            record.without_secret()
        }))
    }

    async fn close(&self) {}
}

#[async_trait]
impl JobRepository for InMemoryRepository {
    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError> {
        Ok(self.state.lock().jobs.values().cloned().collect())
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError> {
        Ok(self
            .state
            .lock()
            .jobs
            .values()
            .filter(|j| j.is_active)
            .cloned()
            .collect())
    }

    async fn get_job(&self, job_id: i32) -> Result<Option<ScheduledJob>, ServerError> {
        Ok(self.state.lock().jobs.get(&job_id).cloned())
    }

    async fn add_job(&self, job: &NewJob) -> Result<ScheduledJob, ServerError> {
        check_trigger_type(&job.trigger_type)?;
        let mut state = self.state.lock();
        if state.jobs.values().any(|j| j.job_name == job.job_name) {
            return Err(unique_violation("scheduled_jobs.job_name"));
        }
        state.next_job_id += 1;
        let now = Utc::now();
        let record = ScheduledJob {
            job_id: state.next_job_id,
            job_name: job.job_name.clone(),
            tool_name: job.tool_name.clone(),
            tool_params: job.tool_params.clone(),
            trigger_type: job.trigger_type.clone(),
            interval_seconds: job.interval_seconds,
            cron_expression: job.cron_expression.clone(),
            is_active: job.is_active,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        state.jobs.insert(record.job_id, record.clone());
        Ok(record)
    }

    async fn update_job(&self, job: &ScheduledJob) -> Result<Option<ScheduledJob>, ServerError> {
        check_trigger_type(&job.trigger_type)?;
        let mut state = self.state.lock();
        if state
            .jobs
            .values()
            .any(|j| j.job_name == job.job_name && j.job_id != job.job_id)
        {
            return Err(unique_violation("scheduled_jobs.job_name"));
        }
        let Some(stored) = state.jobs.get_mut(&job.job_id) else {
            return Ok(None);
        };
        stored.job_name = job.job_name.clone();
        stored.tool_name = job.tool_name.clone();
        stored.tool_params = job.tool_params.clone();
        stored.trigger_type = job.trigger_type.clone();
        stored.interval_seconds = job.interval_seconds;
        stored.cron_expression = job.cron_expression.clone();
        stored.is_active = job.is_active;
        stored.updated_at = Utc::now();
        Ok(Some(stored.clone()))
    }

    async fn delete_job(&self, job_id: i32) -> Result<bool, ServerError> {
        Ok(self.state.lock().jobs.remove(&job_id).is_some())
    }

    async fn touch_last_run(&self, job_id: i32) -> Result<(), ServerError> {
        let mut state = self.state.lock();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ServerError::not_found("Job", job_id))?;
        job.last_run_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl TrendRepository for InMemoryRepository {
    async fn add_database_snapshot(
        &self,
        dbname: &str,
        size_bytes: i64,
    ) -> Result<(), ServerError> {
        self.push_snapshot(CapacitySnapshot {
            snapshot_ts: Utc::now(),
            scope: TrendScope::Db.as_str().to_string(),
            dbname: dbname.to_string(),
            schemaname: None,
            relname: None,
            size_bytes,
        });
        Ok(())
    }

    async fn add_table_snapshot(
        &self,
        dbname: &str,
        schemaname: &str,
        relname: &str,
        size_bytes: i64,
    ) -> Result<(), ServerError> {
        self.push_snapshot(CapacitySnapshot {
            snapshot_ts: Utc::now(),
            scope: TrendScope::Table.as_str().to_string(),
            dbname: dbname.to_string(),
            schemaname: Some(schemaname.to_string()),
            relname: Some(relname.to_string()),
            size_bytes,
        });
        Ok(())
    }

    async fn growth_trend(
        &self,
        scope: TrendScope,
        dbname: &str,
        days: i32,
        limit: i64,
    ) -> Result<Vec<GrowthTrend>, ServerError> {
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        let state = self.state.lock();
        Ok(compute_growth(
            &state.snapshots,
            scope,
            dbname,
            since,
            usize::try_from(limit).unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(host: &str, startup: bool) -> ConnectionInput {
        ConnectionInput {
            database_type_id: 1,
            host: host.into(),
            port: 5432,
            database_name: "orders".into(),
            username: "app".into(),
            is_active: true,
            description: None,
            connect_at_startup: startup,
        }
    }

    fn new_job(name: &str) -> NewJob {
        NewJob {
            job_name: name.into(),
            tool_name: "database-size".into(),
            tool_params: Some(json!({"connection_id": 1})),
            trigger_type: "interval".into(),
            interval_seconds: Some(60),
            cron_expression: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_connection_lifecycle() {
        let repo = InMemoryRepository::new();
        repo.add_type("postgresql").await.unwrap();
        let a = repo.add_connection(&input("b-host", true), "cipher-a").await.unwrap();
        repo.add_connection(&input("a-host", false), "cipher-b").await.unwrap();

        assert!(a.encrypted_password.is_none());
        let with_secret = repo.get_connection_with_secret(a.id).await.unwrap().unwrap();
        assert_eq!(with_secret.encrypted_password.as_deref(), Some("cipher-a"));

        let all = repo.list_connections(None).await.unwrap();
        assert_eq!(all[0].host, "a-host");
        assert_eq!(repo.list_connections(Some(true)).await.unwrap().len(), 1);

        repo.update_connection(a.id, &input("b-host", true), None).await.unwrap();
        let kept = repo.get_connection_with_secret(a.id).await.unwrap().unwrap();
        assert_eq!(kept.encrypted_password.as_deref(), Some("cipher-a"));

        assert_eq!(repo.deactivate_all().await.unwrap(), 2);
        let active = repo.set_active(a.id, true).await.unwrap().unwrap();
        assert!(active.is_active);
        assert!(repo.set_active(999, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_connection_rejected() {
        let repo = InMemoryRepository::new();
        repo.add_type("postgresql").await.unwrap();
        repo.add_connection(&input("h", true), "c").await.unwrap();
        let err = repo.add_connection(&input("h", true), "c").await.unwrap_err();
        assert_eq!(err.sql_state(), Some(UNIQUE_VIOLATION));
    }

    #[tokio::test]
    async fn test_delete_type_cascades() {
        let repo = InMemoryRepository::new();
        let t = repo.add_type("postgresql").await.unwrap();
        repo.add_connection(&input("h", true), "c").await.unwrap();
        assert!(repo.delete_type(t.id).await.unwrap());
        assert!(repo.list_connections(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_job_keeps_last_run() {
        let repo = InMemoryRepository::new();
        let job = repo.add_job(&new_job("sizes")).await.unwrap();
        repo.touch_last_run(job.job_id).await.unwrap();
        let ran = repo.get_job(job.job_id).await.unwrap().unwrap();

        let mut changed = ran.clone();
        changed.job_name = "sizes-renamed".into();
        changed.last_run_at = None;
        let updated = repo.update_job(&changed).await.unwrap().unwrap();

        assert_eq!(updated.job_name, "sizes-renamed");
        assert_eq!(updated.last_run_at, ran.last_run_at);
        assert!(updated.updated_at >= ran.updated_at);
    }

    #[tokio::test]
    async fn test_job_name_unique_and_trigger_checked() {
        let repo = InMemoryRepository::new();
        repo.add_job(&new_job("a")).await.unwrap();
        assert!(repo.add_job(&new_job("a")).await.is_err());

        let mut bad = new_job("b");
        bad.trigger_type = "weekly".into();
        assert!(repo.add_job(&bad).await.is_err());
    }

    #[tokio::test]
    async fn test_touch_unknown_job() {
        let repo = InMemoryRepository::new();
        let err = repo.touch_last_run(42).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound { .. }));
    }
}
