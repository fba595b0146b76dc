//! Trigger definitions and their validation.

use crate::error::ServerError;
use crate::repository::ScheduledJob;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::{Job, JobSchedulerError};

/// Callback run on every fire.
pub type FireFn = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

fn noop_fire() -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async {})
}

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Every fixed period, first fire one period after registration.
    Interval(Duration),
    /// Six-field cron expression (seconds first), evaluated in UTC.
    Cron(String),
}

/// Bring a crontab expression to the six/seven-field form with a leading
/// seconds field. Five-field input gets `0` seconds.
pub fn normalize_cron(expression: &str) -> Result<String, ServerError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 | 7 => Ok(fields.join(" ")),
        n => Err(ServerError::config(format!(
            "Cron expression '{}' has {} fields; expected 5, 6 or 7",
            expression.trim(),
            n
        ))),
    }
}

impl Trigger {
    /// Validate raw trigger fields and build the trigger they describe.
    pub fn parse(
        trigger_type: &str,
        interval_seconds: Option<i32>,
        cron_expression: Option<&str>,
    ) -> Result<Self, ServerError> {
        match trigger_type {
            "interval" => {
                if cron_expression.is_some() {
                    return Err(ServerError::config(
                        "Interval jobs must not set cron_expression",
                    ));
                }
                let seconds = interval_seconds.ok_or_else(|| {
                    ServerError::config("interval_seconds is required for interval jobs")
                })?;
                if seconds <= 0 {
                    return Err(ServerError::config(format!(
                        "interval_seconds must be positive, got {}",
                        seconds
                    )));
                }
                Ok(Trigger::Interval(Duration::from_secs(seconds as u64)))
            }
            "cron" => {
                if interval_seconds.is_some() {
                    return Err(ServerError::config(
                        "Cron jobs must not set interval_seconds",
                    ));
                }
                let expression = cron_expression
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| {
                        ServerError::config("cron_expression is required for cron jobs")
                    })?;
                let normalized = normalize_cron(expression)?;
                let trigger = Trigger::Cron(normalized);
                trigger.build(Arc::new(noop_fire))?;
                Ok(trigger)
            }
            other => Err(ServerError::config(format!(
                "Unknown trigger type '{}'; expected 'interval' or 'cron'",
                other
            ))),
        }
    }

    /// Trigger of a stored job.
    pub fn from_job(job: &ScheduledJob) -> Result<Self, ServerError> {
        Self::parse(
            &job.trigger_type,
            job.interval_seconds,
            job.cron_expression.as_deref(),
        )
    }

    /// Schedulable job that calls `fire` on every fire.
    pub fn build(&self, fire: FireFn) -> Result<Job, ServerError> {
        let built = match self {
            Trigger::Interval(period) => {
                Job::new_repeated_async(*period, move |_uuid, _scheduler| (*fire)())
            }
            Trigger::Cron(expression) => {
                Job::new_async(expression.as_str(), move |_uuid, _scheduler| (*fire)())
            }
        };
        built.map_err(|e: JobSchedulerError| {
            ServerError::config(format!("Invalid trigger {}: {}", self, e))
        })
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Interval(period) => write!(f, "every {}s", period.as_secs()),
            Trigger::Cron(expression) => write!(f, "cron '{}'", expression),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_cron() {
        assert_eq!(normalize_cron("0 * * * *").unwrap(), "0 0 * * * *");
        assert_eq!(normalize_cron(" */5  * * * * * ").unwrap(), "*/5 * * * * *");
        assert!(normalize_cron("* * *").is_err());
    }

    #[test]
    fn test_interval_trigger() {
        assert_eq!(
            Trigger::parse("interval", Some(5), None).unwrap(),
            Trigger::Interval(Duration::from_secs(5))
        );
        assert!(Trigger::parse("interval", None, None).is_err());
        assert!(Trigger::parse("interval", Some(0), None).is_err());
        assert!(Trigger::parse("interval", Some(-3), None).is_err());
        assert!(Trigger::parse("interval", Some(5), Some("0 * * * *")).is_err());
    }

    #[test]
    fn test_cron_trigger() {
        assert_eq!(
            Trigger::parse("cron", None, Some("0 * * * *")).unwrap(),
            Trigger::Cron("0 0 * * * *".to_string())
        );
        assert!(Trigger::parse("cron", None, None).is_err());
        assert!(Trigger::parse("cron", None, Some("   ")).is_err());
        assert!(Trigger::parse("cron", None, Some("not a cron at all")).is_err());
        assert!(Trigger::parse("cron", Some(60), Some("0 * * * *")).is_err());
    }

    #[test]
    fn test_unknown_trigger_type() {
        let err = Trigger::parse("weekly", Some(5), None).unwrap_err();
        assert!(matches!(err, ServerError::Configuration(_)));
    }
}
