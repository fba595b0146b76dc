//! Records persisted in the metadata database.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A database engine type (`repository.database_types`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DatabaseType {
    pub id: i32,
    pub name: String,
}

/// Identity and non-secret facts of one configured target.
///
/// `encrypted_password` is only populated by
/// [`TargetRepository::get_connection_with_secret`](super::TargetRepository::get_connection_with_secret)
/// and is never serialized.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConnectionRecord {
    pub id: i32,
    pub database_type_id: i32,
    pub database_type_name: Option<String>,
    pub host: String,
    pub port: i32,
    pub database_name: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub encrypted_password: Option<String>,
    pub is_active: bool,
    pub description: Option<String>,
    pub connect_at_startup: bool,
}

impl ConnectionRecord {
    /// Copy of the record without the ciphertext.
    pub fn without_secret(&self) -> Self {
        Self {
            encrypted_password: None,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("id", &self.id)
            .field("database_type_name", &self.database_type_name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_name", &self.database_name)
            .field("username", &self.username)
            .field("is_active", &self.is_active)
            .field("connect_at_startup", &self.connect_at_startup)
            .finish_non_exhaustive()
    }
}

fn default_true() -> bool {
    true
}

/// Writable fields of a connection record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInput {
    pub database_type_id: i32,
    pub host: String,
    pub port: i32,
    pub database_name: String,
    pub username: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub connect_at_startup: bool,
}

/// One persisted schedule definition (`scheduler.scheduled_jobs`).
///
/// `trigger_type` is kept as stored text so that a record written by
/// another tool with an unknown type can still be loaded and skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledJob {
    pub job_id: i32,
    pub job_name: String,
    pub tool_name: String,
    pub tool_params: Option<Value>,
    pub trigger_type: String,
    pub interval_seconds: Option<i32>,
    pub cron_expression: Option<String>,
    pub is_active: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub job_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_params: Option<Value>,
    pub trigger_type: String,
    #[serde(default)]
    pub interval_seconds: Option<i32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Partial update of a job. Absent fields keep their value; fields
/// outside this set (including `last_run_at`) are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_params: Option<Value>,
    #[serde(default)]
    pub trigger_type: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<i32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl JobPatch {
    /// Whether the patch carries any recognized field.
    pub fn is_empty(&self) -> bool {
        self == &JobPatch::default()
    }

    /// Merge into an existing job. Switching trigger type clears the
    /// field that belongs to the other type.
    pub fn apply_to(&self, job: &mut ScheduledJob) {
        if let Some(v) = &self.job_name {
            job.job_name = v.clone();
        }
        if let Some(v) = &self.tool_name {
            job.tool_name = v.clone();
        }
        if let Some(v) = &self.tool_params {
            job.tool_params = Some(v.clone());
        }
        if let Some(v) = &self.trigger_type {
            job.trigger_type = v.clone();
        }
        if let Some(v) = self.interval_seconds {
            job.interval_seconds = Some(v);
        }
        if let Some(v) = &self.cron_expression {
            job.cron_expression = Some(v.clone());
        }
        if let Some(v) = self.is_active {
            job.is_active = v;
        }

        match job.trigger_type.as_str() {
            "interval" => job.cron_expression = None,
            "cron" => job.interval_seconds = None,
            _ => {}
        }
    }
}

/// Granularity of a capacity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendScope {
    /// Whole database (`scope = 'db'`).
    Db,
    /// One table (`scope = 'table'`).
    Table,
}

impl TrendScope {
    /// Stored scope value.
    pub fn as_str(self) -> &'static str {
        match self {
            TrendScope::Db => "db",
            TrendScope::Table => "table",
        }
    }
}

/// One capacity snapshot row (`trends.pg_capacity_snapshots`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CapacitySnapshot {
    pub snapshot_ts: DateTime<Utc>,
    pub scope: String,
    pub dbname: String,
    pub schemaname: Option<String>,
    pub relname: Option<String>,
    pub size_bytes: i64,
}

/// Growth of one database or table over the look-back window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GrowthTrend {
    pub schemaname: Option<String>,
    pub relname: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_size: i64,
    pub end_size: i64,
    pub points: i64,
    pub growth_mb: f64,
    pub growth_pct: Option<f64>,
    pub growth_mb_per_day: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> ScheduledJob {
        let now = Utc::now();
        ScheduledJob {
            job_id: 1,
            job_name: "nightly".into(),
            tool_name: "database-size".into(),
            tool_params: Some(json!({"connection_id": 7})),
            trigger_type: "interval".into(),
            interval_seconds: Some(60),
            cron_expression: None,
            is_active: true,
            last_run_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_patch_ignores_unknown_fields() {
        let patch: JobPatch =
            serde_json::from_value(json!({"job_name": "renamed", "last_run_at": null, "bogus": 1}))
                .unwrap();
        let mut j = job();
        let before = j.last_run_at;
        patch.apply_to(&mut j);
        assert_eq!(j.job_name, "renamed");
        assert_eq!(j.last_run_at, before);
    }

    #[test]
    fn test_patch_switching_trigger_clears_other_field() {
        let patch = JobPatch {
            trigger_type: Some("cron".into()),
            cron_expression: Some("0 * * * *".into()),
            ..Default::default()
        };
        let mut j = job();
        patch.apply_to(&mut j);
        assert_eq!(j.interval_seconds, None);
        assert_eq!(j.cron_expression.as_deref(), Some("0 * * * *"));
    }

    #[test]
    fn test_empty_patch() {
        assert!(JobPatch::default().is_empty());
        let patch: JobPatch = serde_json::from_value(json!({"unknown": true})).unwrap();
        assert!(patch.is_empty());
    }

    #[test]
    fn test_connection_secret_is_not_serialized() {
        let record = ConnectionRecord {
            id: 7,
            database_type_id: 1,
            database_type_name: Some("postgresql".into()),
            host: "db.example.com".into(),
            port: 5432,
            database_name: "orders".into(),
            username: "app".into(),
            encrypted_password: Some("ciphertext".into()),
            is_active: true,
            description: None,
            connect_at_startup: true,
        };
        let rendered = serde_json::to_string(&record).unwrap();
        assert!(!rendered.contains("ciphertext"));
        assert!(!format!("{:?}", record).contains("ciphertext"));
        assert!(record.without_secret().encrypted_password.is_none());
    }

    #[test]
    fn test_connection_input_defaults() {
        let input: ConnectionInput = serde_json::from_value(json!({
            "database_type_id": 1,
            "host": "h",
            "port": 5432,
            "database_name": "d",
            "username": "u"
        }))
        .unwrap();
        assert!(input.is_active);
        assert!(input.connect_at_startup);
        assert!(input.description.is_none());
    }
}
