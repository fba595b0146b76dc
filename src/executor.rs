//! Turns scheduled fires into tool invocations.
//!
//! A fire never fails outward: malformed parameters are replaced by an
//! empty argument bag, and any invocation error is logged and reported as
//! [`JobFireOutcome::Failed`]. Only a successful fire advances
//! `last_run_at`.

use crate::error::ServerError;
use crate::repository::{JobRepository, ScheduledJob};
use crate::scheduler::JobRunner;
use crate::telemetry::{RequestContext, SharedMetrics};
use crate::tools::{ToolOutput, ToolParams};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Invokes a tool by name, one call per fire.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn call(
        &self,
        ctx: &RequestContext,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ServerError>;
}

/// What became of one fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFireOutcome {
    Succeeded,
    Failed(String),
}

/// Runs scheduled jobs through a [`ToolClient`].
pub struct JobExecutor {
    client: Arc<dyn ToolClient>,
    jobs: Arc<dyn JobRepository>,
    metrics: SharedMetrics,
}

impl JobExecutor {
    pub fn new(
        client: Arc<dyn ToolClient>,
        jobs: Arc<dyn JobRepository>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            client,
            jobs,
            metrics,
        }
    }

    /// Execute one fire of `job`.
    pub async fn fire(&self, job: &ScheduledJob) -> JobFireOutcome {
        let ctx = RequestContext::for_job(&job.job_name, &job.tool_name);
        info!(
            "{} Firing job {} ('{}')",
            ctx.log_prefix(),
            job.job_id,
            job.job_name
        );

        let (params, parse_error) = ToolParams::parse_or_empty(job.tool_params.as_ref());
        if let Some(e) = parse_error {
            warn!(
                "{} Job '{}' has malformed tool_params ({}): {:?}; running with no arguments",
                ctx.log_prefix(),
                job.job_name,
                e,
                job.tool_params
            );
        }

        let outcome = match self
            .client
            .call(&ctx, &job.tool_name, params.into_map())
            .await
        {
            Ok(_) => match self.jobs.touch_last_run(job.job_id).await {
                Ok(()) => JobFireOutcome::Succeeded,
                Err(e) => JobFireOutcome::Failed(format!("could not record last run: {}", e)),
            },
            Err(e) => JobFireOutcome::Failed(e.to_string()),
        };

        match &outcome {
            JobFireOutcome::Succeeded => info!(
                "{} Job '{}' completed in {} ms",
                ctx.log_prefix(),
                job.job_name,
                ctx.elapsed().as_millis()
            ),
            JobFireOutcome::Failed(reason) => error!(
                "{} Job '{}' failed: {}",
                ctx.log_prefix(),
                job.job_name,
                reason
            ),
        }
        self.metrics
            .record_job_fire(outcome == JobFireOutcome::Succeeded);
        outcome
    }
}

#[async_trait]
impl JobRunner for JobExecutor {
    async fn run(&self, job: ScheduledJob) {
        self.fire(&job).await;
    }
}
