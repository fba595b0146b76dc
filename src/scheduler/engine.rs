//! Live fire schedule over `tokio-cron-scheduler`.
//!
//! Each registered job is keyed by its handle `job_<job_id>`; registering
//! the same job again removes the previous schedule entry first. Fires of
//! one job are driven by the clock alone, so a slow run can overlap the
//! next one.

use super::trigger::{FireFn, Trigger};
use crate::constants::{DRAIN_POLL_INTERVAL, JOB_HANDLE_PREFIX};
use crate::error::ServerError;
use crate::repository::{JobRepository, ScheduledJob};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs one fire of a job. Must not fail: errors stay inside.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: ScheduledJob);
}

/// Handle used for a job's schedule entry.
pub fn job_handle(job_id: i32) -> String {
    format!("{}{}", JOB_HANDLE_PREFIX, job_id)
}

/// Decrements the in-flight counter when a fire ends, even by panic.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Translates job records into live schedule entries.
pub struct TriggerEngine {
    scheduler: JobScheduler,
    jobs: Arc<dyn JobRepository>,
    runner: Arc<dyn JobRunner>,
    handles: Mutex<HashMap<String, Uuid>>,
    in_flight: Arc<AtomicUsize>,
    running: AtomicBool,
    stop_timeout: Duration,
}

impl TriggerEngine {
    pub async fn new(
        jobs: Arc<dyn JobRepository>,
        runner: Arc<dyn JobRunner>,
        stop_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| ServerError::internal(format!("Failed to create scheduler: {}", e)))?;
        Ok(Self {
            scheduler,
            jobs,
            runner,
            handles: Mutex::new(HashMap::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            running: AtomicBool::new(false),
            stop_timeout,
        })
    }

    /// Schedule `job`, replacing any entry with the same handle.
    pub async fn register(&self, job: &ScheduledJob) -> Result<(), ServerError> {
        let trigger = Trigger::from_job(job)?;
        let handle = job_handle(job.job_id);

        let runner = Arc::clone(&self.runner);
        let in_flight = Arc::clone(&self.in_flight);
        let snapshot = job.clone();
        let fire: FireFn = Arc::new(move || {
            let runner = Arc::clone(&runner);
            let job = snapshot.clone();
            let guard = InFlight::enter(&in_flight);
            Box::pin(async move {
                let _guard = guard;
                runner.run(job).await;
            })
        });
        let entry = trigger.build(fire)?;

        let mut handles = self.handles.lock().await;
        if let Some(previous) = handles.remove(&handle) {
            self.remove_entry(&handle, previous).await;
        }
        let uuid = self.scheduler.add(entry).await.map_err(|e| {
            ServerError::internal(format!("Failed to schedule {}: {}", handle, e))
        })?;
        handles.insert(handle.clone(), uuid);

        info!("Scheduled {} ('{}') {}", handle, job.job_name, trigger);
        Ok(())
    }

    /// Remove the schedule entry of `job_id`. Returns whether one existed.
    pub async fn unregister(&self, job_id: i32) -> bool {
        let handle = job_handle(job_id);
        let removed = self.handles.lock().await.remove(&handle);
        match removed {
            Some(uuid) => {
                self.remove_entry(&handle, uuid).await;
                info!("Unscheduled {}", handle);
                true
            }
            None => false,
        }
    }

    async fn remove_entry(&self, handle: &str, uuid: Uuid) {
        if let Err(e) = self.scheduler.remove(&uuid).await {
            warn!("Failed to remove schedule entry {}: {}", handle, e);
        }
    }

    /// Register every active job. A job whose trigger cannot be built is
    /// skipped with a warning; the rest still load.
    pub async fn load_active_jobs(&self) -> Result<usize, ServerError> {
        let jobs = self.jobs.list_active_jobs().await?;
        let mut registered = 0;
        for job in &jobs {
            match self.register(job).await {
                Ok(()) => registered += 1,
                Err(e) => warn!(
                    "Skipping job {} ('{}'): {}",
                    job.job_id, job.job_name, e
                ),
            }
        }
        info!("Loaded {}/{} active job(s)", registered, jobs.len());
        Ok(registered)
    }

    /// Load active jobs and start the clock.
    pub async fn start(&self) -> Result<usize, ServerError> {
        let loaded = self.load_active_jobs().await?;
        self.scheduler
            .start()
            .await
            .map_err(|e| ServerError::internal(format!("Failed to start scheduler: {}", e)))?;
        self.running.store(true, Ordering::SeqCst);
        info!("Scheduler started");
        Ok(loaded)
    }

    /// Stop the clock, then wait (bounded) for running fires to finish.
    /// Persisted jobs are left untouched.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("Scheduler not running");
            return;
        }

        let mut scheduler = self.scheduler.clone();
        if let Err(e) = scheduler.shutdown().await {
            warn!("Scheduler shutdown reported an error: {}", e);
        }

        let started = Instant::now();
        loop {
            let running = self.in_flight();
            if running == 0 {
                info!("Scheduler stopped");
                break;
            }
            if started.elapsed() > self.stop_timeout {
                warn!(
                    "Scheduler stop timeout exceeded with {} fire(s) still running",
                    running
                );
                break;
            }
            debug!("Waiting for {} running fire(s) to complete...", running);
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Fires currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handles of all live schedule entries, sorted.
    pub async fn registered_handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.handles.lock().await.keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Whether `job_id` has a live schedule entry.
    pub async fn is_registered(&self, job_id: i32) -> bool {
        self.handles.lock().await.contains_key(&job_handle(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{InMemoryRepository, NewJob};
    use parking_lot::Mutex as SyncMutex;

    #[derive(Default)]
    struct RecordingRunner {
        fired: SyncMutex<Vec<i32>>,
    }

    #[async_trait]
    impl JobRunner for RecordingRunner {
        async fn run(&self, job: ScheduledJob) {
            self.fired.lock().push(job.job_id);
        }
    }

    fn interval_job(name: &str, seconds: i32) -> NewJob {
        NewJob {
            job_name: name.into(),
            tool_name: "database-size".into(),
            tool_params: None,
            trigger_type: "interval".into(),
            interval_seconds: Some(seconds),
            cron_expression: None,
            is_active: true,
        }
    }

    async fn engine(repo: Arc<InMemoryRepository>, runner: Arc<RecordingRunner>) -> TriggerEngine {
        TriggerEngine::new(repo, runner, Duration::from_secs(2))
            .await
            .unwrap()
    }

    #[test]
    fn test_job_handle() {
        assert_eq!(job_handle(3), "job_3");
    }

    #[tokio::test]
    async fn test_register_twice_keeps_one_entry() {
        let repo = Arc::new(InMemoryRepository::new());
        let runner = Arc::new(RecordingRunner::default());
        let engine = engine(repo.clone(), runner).await;
        let job = repo.add_job(&interval_job("sizes", 5)).await.unwrap();

        engine.register(&job).await.unwrap();
        engine.register(&job).await.unwrap();

        assert_eq!(engine.registered_handles().await, vec![job_handle(job.job_id)]);
    }

    #[tokio::test]
    async fn test_reregistered_job_fires_once_per_interval() {
        let repo = Arc::new(InMemoryRepository::new());
        let runner = Arc::new(RecordingRunner::default());
        let job = repo.add_job(&interval_job("sizes", 1)).await.unwrap();
        let engine = engine(repo, runner.clone()).await;

        engine.start().await.unwrap();
        for _ in 0..3 {
            engine.register(&job).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(3500)).await;
        engine.stop().await;

        let fires = runner
            .fired
            .lock()
            .iter()
            .filter(|id| **id == job.job_id)
            .count();
        assert!((1..=5).contains(&fires), "{} fires in 3.5s", fires);
    }

    #[tokio::test]
    async fn test_load_skips_malformed_jobs() {
        let repo = Arc::new(InMemoryRepository::new());
        let runner = Arc::new(RecordingRunner::default());
        let good = repo.add_job(&interval_job("good", 60)).await.unwrap();
        let mut broken = interval_job("broken", 60);
        broken.interval_seconds = None;
        repo.add_job(&broken).await.unwrap();
        let mut cron = interval_job("hourly", 0);
        cron.trigger_type = "cron".into();
        cron.interval_seconds = None;
        cron.cron_expression = Some("0 * * * *".into());
        let hourly = repo.add_job(&cron).await.unwrap();
        let mut inactive = interval_job("paused", 60);
        inactive.is_active = false;
        repo.add_job(&inactive).await.unwrap();

        let engine = engine(repo, runner).await;
        assert_eq!(engine.load_active_jobs().await.unwrap(), 2);
        assert!(engine.is_registered(good.job_id).await);
        assert!(engine.is_registered(hourly.job_id).await);
    }

    #[tokio::test]
    async fn test_unregister() {
        let repo = Arc::new(InMemoryRepository::new());
        let runner = Arc::new(RecordingRunner::default());
        let engine = engine(repo.clone(), runner).await;
        let job = repo.add_job(&interval_job("sizes", 5)).await.unwrap();
        engine.register(&job).await.unwrap();

        assert!(engine.unregister(job.job_id).await);
        assert!(!engine.unregister(job.job_id).await);
        assert!(engine.registered_handles().await.is_empty());
    }

    #[tokio::test]
    async fn test_interval_job_fires_after_start() {
        let repo = Arc::new(InMemoryRepository::new());
        let runner = Arc::new(RecordingRunner::default());
        let job = repo.add_job(&interval_job("fast", 1)).await.unwrap();
        let engine = engine(repo, runner.clone()).await;

        assert_eq!(engine.start().await.unwrap(), 1);
        let fired = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if runner.fired.lock().contains(&job.job_id) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;
        engine.stop().await;

        assert!(fired.is_ok());
        assert!(!engine.is_running());
        assert_eq!(engine.in_flight(), 0);
    }
}
