//! Persistent job scheduling.
//!
//! [`JobService`] is the write path for job records: it validates
//! triggers before anything is stored and keeps the [`TriggerEngine`] in
//! step with every change, so edits take effect without a restart.

mod engine;
mod trigger;

pub use engine::{job_handle, JobRunner, TriggerEngine};
pub use trigger::{normalize_cron, FireFn, Trigger};

use crate::error::ServerError;
use crate::repository::{JobPatch, JobRepository, NewJob, ScheduledJob};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// CRUD over job records with live re-registration.
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    engine: Arc<TriggerEngine>,
}

fn validate_common(job_name: &str, tool_name: &str, tool_params: Option<&Value>) -> Result<(), ServerError> {
    if job_name.trim().is_empty() {
        return Err(ServerError::validation("job_name must not be empty"));
    }
    if tool_name.trim().is_empty() {
        return Err(ServerError::validation("tool_name must not be empty"));
    }
    match tool_params {
        None | Some(Value::Null) | Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(ServerError::validation("tool_params must be a JSON object")),
    }
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobRepository>, engine: Arc<TriggerEngine>) -> Self {
        Self { jobs, engine }
    }

    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.engine
    }

    pub async fn list_jobs(&self) -> Result<Vec<ScheduledJob>, ServerError> {
        self.jobs.list_jobs().await
    }

    pub async fn get_job(&self, job_id: i32) -> Result<ScheduledJob, ServerError> {
        self.jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| ServerError::not_found("Job", job_id))
    }

    /// Validate, store and (when active) schedule a new job.
    pub async fn add_job(&self, job: NewJob) -> Result<ScheduledJob, ServerError> {
        validate_common(&job.job_name, &job.tool_name, job.tool_params.as_ref())?;
        Trigger::parse(
            &job.trigger_type,
            job.interval_seconds,
            job.cron_expression.as_deref(),
        )?;

        let stored = self.jobs.add_job(&job).await?;
        if stored.is_active {
            self.engine.register(&stored).await?;
        }
        info!("Created job {} ('{}')", stored.job_id, stored.job_name);
        Ok(stored)
    }

    /// Merge `patch` into the stored job and re-register it.
    ///
    /// Only recognized fields change; `last_run_at` is never touched.
    pub async fn update_job(&self, job_id: i32, patch: JobPatch) -> Result<ScheduledJob, ServerError> {
        if patch.is_empty() {
            return Err(ServerError::validation("No updatable fields supplied"));
        }
        let mut job = self.get_job(job_id).await?;
        patch.apply_to(&mut job);
        validate_common(&job.job_name, &job.tool_name, job.tool_params.as_ref())?;
        Trigger::from_job(&job)?;

        let updated = self
            .jobs
            .update_job(&job)
            .await?
            .ok_or_else(|| ServerError::not_found("Job", job_id))?;

        if updated.is_active {
            self.engine.register(&updated).await?;
        } else {
            self.engine.unregister(job_id).await;
        }
        info!("Updated job {} ('{}')", updated.job_id, updated.job_name);
        Ok(updated)
    }

    /// Delete the job record and its schedule entry.
    pub async fn delete_job(&self, job_id: i32) -> Result<(), ServerError> {
        if !self.jobs.delete_job(job_id).await? {
            return Err(ServerError::not_found("Job", job_id));
        }
        self.engine.unregister(job_id).await;
        info!("Deleted job {}", job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct NoopRunner;

    #[async_trait]
    impl JobRunner for NoopRunner {
        async fn run(&self, _job: ScheduledJob) {}
    }

    async fn service() -> (Arc<InMemoryRepository>, JobService) {
        let repo = Arc::new(InMemoryRepository::new());
        let engine = TriggerEngine::new(repo.clone(), Arc::new(NoopRunner), Duration::from_secs(1))
            .await
            .unwrap();
        (repo.clone(), JobService::new(repo, Arc::new(engine)))
    }

    fn interval(name: &str) -> NewJob {
        NewJob {
            job_name: name.into(),
            tool_name: "database-size".into(),
            tool_params: Some(json!({"connection_id": 1})),
            trigger_type: "interval".into(),
            interval_seconds: Some(5),
            cron_expression: None,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_add_job_registers() {
        let (_, service) = service().await;
        let job = service.add_job(interval("sizes")).await.unwrap();
        assert!(service.engine().is_registered(job.job_id).await);
    }

    #[tokio::test]
    async fn test_add_job_rejects_bad_trigger() {
        let (repo, service) = service().await;
        let mut job = interval("bad");
        job.trigger_type = "weekly".into();
        let err = service.add_job(job).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);

        let mut job = interval("bad-cron");
        job.trigger_type = "cron".into();
        job.interval_seconds = None;
        assert!(service.add_job(job).await.is_err());

        let mut job = interval("bad-params");
        job.tool_params = Some(json!([1, 2]));
        assert!(service.add_job(job).await.is_err());

        assert!(repo.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_reregisters_single_entry() {
        let (_, service) = service().await;
        let job = service.add_job(interval("sizes")).await.unwrap();

        let patch = JobPatch {
            interval_seconds: Some(5),
            ..Default::default()
        };
        service.update_job(job.job_id, patch).await.unwrap();

        assert_eq!(
            service.engine().registered_handles().await,
            vec![job_handle(job.job_id)]
        );
    }

    #[tokio::test]
    async fn test_update_preserves_last_run_and_switches_trigger() {
        let (repo, service) = service().await;
        let job = service.add_job(interval("sizes")).await.unwrap();
        repo.touch_last_run(job.job_id).await.unwrap();
        let ran = service.get_job(job.job_id).await.unwrap();

        let patch = JobPatch {
            trigger_type: Some("cron".into()),
            cron_expression: Some("0 * * * *".into()),
            ..Default::default()
        };
        let updated = service.update_job(job.job_id, patch).await.unwrap();

        assert_eq!(updated.trigger_type, "cron");
        assert_eq!(updated.interval_seconds, None);
        assert_eq!(updated.last_run_at, ran.last_run_at);
        assert!(updated.updated_at >= ran.updated_at);
    }

    #[tokio::test]
    async fn test_deactivate_unregisters() {
        let (_, service) = service().await;
        let job = service.add_job(interval("sizes")).await.unwrap();
        let patch = JobPatch {
            is_active: Some(false),
            ..Default::default()
        };
        service.update_job(job.job_id, patch).await.unwrap();
        assert!(!service.engine().is_registered(job.job_id).await);
    }

    #[tokio::test]
    async fn test_empty_patch_and_unknown_job() {
        let (_, service) = service().await;
        let job = service.add_job(interval("sizes")).await.unwrap();
        assert!(matches!(
            service.update_job(job.job_id, JobPatch::default()).await,
            Err(ServerError::Validation(_))
        ));
        let patch = JobPatch {
            job_name: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            service.update_job(999, patch).await,
            Err(ServerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_job() {
        let (_, service) = service().await;
        let job = service.add_job(interval("sizes")).await.unwrap();
        service.delete_job(job.job_id).await.unwrap();
        assert!(!service.engine().is_registered(job.job_id).await);
        assert!(matches!(
            service.delete_job(job.job_id).await,
            Err(ServerError::NotFound { .. })
        ));
    }
}
