//! Persistence of connection records, job records and capacity snapshots.
//!
//! The core only talks to storage through the traits in this module.
//! [`PgRepository`] implements them over the metadata PostgreSQL database;
//! [`InMemoryRepository`] implements them in process.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod schema;

pub use memory::InMemoryRepository;
pub use models::{
    CapacitySnapshot, ConnectionInput, ConnectionRecord, DatabaseType, GrowthTrend, JobPatch,
    NewJob, ScheduledJob, TrendScope,
};
pub use postgres::PgRepository;

use crate::error::ServerError;
use async_trait::async_trait;

/// Connection records and database types.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// All database types ordered by id.
    async fn list_types(&self) -> Result<Vec<DatabaseType>, ServerError>;

    /// One database type.
    async fn get_type(&self, id: i32) -> Result<Option<DatabaseType>, ServerError>;

    /// Insert a database type.
    async fn add_type(&self, name: &str) -> Result<DatabaseType, ServerError>;

    /// Rename a database type.
    async fn update_type(&self, id: i32, name: &str) -> Result<Option<DatabaseType>, ServerError>;

    /// Delete a database type and, by cascade, its connections.
    async fn delete_type(&self, id: i32) -> Result<bool, ServerError>;

    /// Connection records without secrets, optionally filtered by the
    /// startup flag, ordered by type name, host, port and database.
    async fn list_connections(
        &self,
        connect_at_startup: Option<bool>,
    ) -> Result<Vec<ConnectionRecord>, ServerError>;

    /// One connection record without its secret.
    async fn get_connection(&self, id: i32) -> Result<Option<ConnectionRecord>, ServerError>;

    /// One connection record including the ciphertext. Only used to connect.
    async fn get_connection_with_secret(
        &self,
        id: i32,
    ) -> Result<Option<ConnectionRecord>, ServerError>;

    /// Insert a connection record with an already encrypted password.
    async fn add_connection(
        &self,
        input: &ConnectionInput,
        encrypted_password: &str,
    ) -> Result<ConnectionRecord, ServerError>;

    /// Replace a connection record. The stored ciphertext is kept when
    /// `encrypted_password` is `None`.
    async fn update_connection(
        &self,
        id: i32,
        input: &ConnectionInput,
        encrypted_password: Option<&str>,
    ) -> Result<Option<ConnectionRecord>, ServerError>;

    /// Delete a connection record.
    async fn delete_connection(&self, id: i32) -> Result<bool, ServerError>;

    /// Mark every connection inactive.
    async fn deactivate_all(&self) -> Result<u64, ServerError>;

    /// Set the active flag of one connection. `None` when the id is unknown.
    async fn set_active(
        &self,
        id: i32,
        active: bool,
    ) -> Result<Option<ConnectionRecord>, ServerError>;

    /// Release storage resources.
    async fn close(&self);
}

/// Scheduled job definitions.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// All jobs ordered by id.
    async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError>;

    /// Jobs with `is_active = true`.
    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError>;

    /// One job.
    async fn get_job(&self, job_id: i32) -> Result<Option<ScheduledJob>, ServerError>;

    /// Insert a job.
    async fn add_job(&self, job: &NewJob) -> Result<ScheduledJob, ServerError>;

    /// Persist the mutable fields of a job, refreshing `updated_at`.
    /// `last_run_at` is never written here.
    async fn update_job(&self, job: &ScheduledJob) -> Result<Option<ScheduledJob>, ServerError>;

    /// Delete a job.
    async fn delete_job(&self, job_id: i32) -> Result<bool, ServerError>;

    /// Record a successful fire.
    async fn touch_last_run(&self, job_id: i32) -> Result<(), ServerError>;
}

/// Capacity snapshots and growth trends.
#[async_trait]
pub trait TrendRepository: Send + Sync {
    /// Store a database-size snapshot.
    async fn add_database_snapshot(&self, dbname: &str, size_bytes: i64)
        -> Result<(), ServerError>;

    /// Store a table-size snapshot.
    async fn add_table_snapshot(
        &self,
        dbname: &str,
        schemaname: &str,
        relname: &str,
        size_bytes: i64,
    ) -> Result<(), ServerError>;

    /// Growth over the last `days` days for one database, per table when
    /// `scope` is [`TrendScope::Table`] (largest growth first, at most
    /// `limit` rows).
    async fn growth_trend(
        &self,
        scope: TrendScope,
        dbname: &str,
        days: i32,
        limit: i64,
    ) -> Result<Vec<GrowthTrend>, ServerError>;
}

/// Everything the server needs from storage.
pub trait MetadataStore: TargetRepository + JobRepository + TrendRepository {}

impl<T> MetadataStore for T where T: TargetRepository + JobRepository + TrendRepository {}

/// Compute growth trends from raw snapshots.
///
/// Shared by the in-memory store; the PostgreSQL store does the same in SQL.
pub(crate) fn compute_growth(
    snapshots: &[CapacitySnapshot],
    scope: TrendScope,
    dbname: &str,
    since: chrono::DateTime<chrono::Utc>,
    limit: usize,
) -> Vec<GrowthTrend> {
    use std::collections::BTreeMap;

    type Key = (Option<String>, Option<String>);
    // key -> date -> max size on that date
    let mut daily: BTreeMap<Key, BTreeMap<chrono::NaiveDate, i64>> = BTreeMap::new();

    for snap in snapshots {
        if snap.scope != scope.as_str() || snap.dbname != dbname || snap.snapshot_ts < since {
            continue;
        }
        let key = match scope {
            TrendScope::Db => (None, None),
            TrendScope::Table => (snap.schemaname.clone(), snap.relname.clone()),
        };
        let day = snap.snapshot_ts.date_naive();
        let entry = daily.entry(key).or_default().entry(day).or_insert(i64::MIN);
        *entry = (*entry).max(snap.size_bytes);
    }

    let mut trends: Vec<GrowthTrend> = daily
        .into_iter()
        .filter_map(|((schemaname, relname), days)| {
            let (start_date, start_size) = days.iter().next().map(|(d, s)| (*d, *s))?;
            let (end_date, end_size) = days.iter().next_back().map(|(d, s)| (*d, *s))?;
            let delta = (end_size - start_size) as f64;
            let growth_mb = round2(delta / 1024.0 / 1024.0);
            let span = (end_date - start_date).num_days();
            Some(GrowthTrend {
                schemaname,
                relname,
                start_date,
                end_date,
                start_size,
                end_size,
                points: days.len() as i64,
                growth_mb,
                growth_pct: (start_size != 0).then(|| round2(delta / start_size as f64 * 100.0)),
                growth_mb_per_day: (span != 0).then(|| round2(growth_mb / span as f64)),
            })
        })
        .collect();

    trends.sort_by(|a, b| {
        b.growth_mb
            .partial_cmp(&a.growth_mb)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    trends.truncate(limit);
    trends
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn snap(scope: &str, rel: Option<&str>, days_ago: i64, size: i64) -> CapacitySnapshot {
        CapacitySnapshot {
            snapshot_ts: Utc::now() - Duration::days(days_ago),
            scope: scope.into(),
            dbname: "orders".into(),
            schemaname: rel.map(|_| "public".to_string()),
            relname: rel.map(str::to_string),
            size_bytes: size,
        }
    }

    #[test]
    fn test_database_growth() {
        let mb = 1024 * 1024;
        let snaps = vec![
            snap("db", None, 10, 100 * mb),
            snap("db", None, 5, 90 * mb),
            snap("db", None, 0, 120 * mb),
        ];
        let since = Utc::now() - Duration::days(30);
        let trends = compute_growth(&snaps, TrendScope::Db, "orders", since, 10);
        assert_eq!(trends.len(), 1);
        let t = &trends[0];
        assert_eq!(t.start_size, 100 * mb);
        assert_eq!(t.end_size, 120 * mb);
        assert_eq!(t.points, 3);
        assert_eq!(t.growth_mb, 20.0);
        assert_eq!(t.growth_pct, Some(20.0));
        assert_eq!(t.growth_mb_per_day, Some(2.0));
    }

    #[test]
    fn test_single_day_has_no_rate() {
        let snaps = vec![snap("db", None, 0, 10), snap("db", None, 0, 20)];
        let since = Utc::now() - Duration::days(1);
        let trends = compute_growth(&snaps, TrendScope::Db, "orders", since, 10);
        assert_eq!(trends[0].points, 1);
        assert_eq!(trends[0].growth_mb_per_day, None);
    }

    #[test]
    fn test_table_growth_ordering_and_limit() {
        let mb = 1024 * 1024;
        let snaps = vec![
            snap("table", Some("small"), 4, mb),
            snap("table", Some("small"), 0, 2 * mb),
            snap("table", Some("big"), 4, mb),
            snap("table", Some("big"), 0, 50 * mb),
            snap("db", None, 0, 999 * mb),
        ];
        let since = Utc::now() - Duration::days(30);
        let trends = compute_growth(&snaps, TrendScope::Table, "orders", since, 1);
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].relname.as_deref(), Some("big"));
    }

    #[test]
    fn test_window_excludes_old_snapshots() {
        let snaps = vec![snap("db", None, 40, 1), snap("db", None, 0, 5)];
        let since = Utc::now() - Duration::days(30);
        let trends = compute_growth(&snaps, TrendScope::Db, "orders", since, 10);
        assert_eq!(trends[0].start_size, 5);
    }
}
