//! Request correlation and in-process counters.
//!
//! Every tool call and every job fire carries a [`RequestContext`] so that
//! log lines of one invocation can be grepped together. [`ServerMetrics`]
//! holds monotonic counters reported by the health endpoint.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Eight hex characters, enough to tell concurrent invocations apart.
pub fn short_correlation_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Correlation data for one invocation.
///
/// Passed explicitly into every call that logs on behalf of a caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Short id shared by every log line of this invocation.
    pub correlation_id: String,
    /// Caller identity, when the surface knows one.
    pub client_id: Option<String>,
    /// Tool name or route being served.
    pub operation: Option<String>,
    started: Instant,
}

impl RequestContext {
    /// Fresh context with a generated correlation id.
    pub fn new() -> Self {
        Self::with_correlation_id(short_correlation_id())
    }

    /// Context with a caller-chosen correlation id.
    pub fn with_correlation_id(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            client_id: None,
            operation: None,
            started: Instant::now(),
        }
    }

    /// Context for one scheduled fire.
    pub fn for_job(job_name: &str, tool_name: &str) -> Self {
        Self::new()
            .with_client(format!("scheduler:{}", job_name))
            .with_operation(tool_name)
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `[id] [client] [operation]`, omitting what is unknown.
    pub fn log_prefix(&self) -> String {
        let mut prefix = format!("[{}]", self.correlation_id);
        for part in [&self.client_id, &self.operation].into_iter().flatten() {
            prefix.push_str(" [");
            prefix.push_str(part);
            prefix.push(']');
        }
        prefix
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Server-wide counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    pub queries_total: AtomicU64,
    pub queries_failed: AtomicU64,
    pub query_time_ms_total: AtomicU64,
    pub connect_attempts: AtomicU64,
    pub connect_failures: AtomicU64,
    pub reconnects: AtomicU64,
    pub tool_calls: AtomicU64,
    pub tool_failures: AtomicU64,
    pub job_fires_succeeded: AtomicU64,
    pub job_fires_failed: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one statement execution.
    pub fn record_query(&self, success: bool, duration: Duration) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.query_time_ms_total
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record one pool creation attempt.
    pub fn record_connect(&self, success: bool) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.connect_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a recovery reconnect.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a tool invocation.
    pub fn record_tool_call(&self, success: bool) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.tool_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the outcome of a scheduled fire.
    pub fn record_job_fire(&self, success: bool) {
        let counter = if success {
            &self.job_fires_succeeded
        } else {
            &self.job_fires_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            queries_total: load(&self.queries_total),
            queries_failed: load(&self.queries_failed),
            query_time_ms_total: load(&self.query_time_ms_total),
            connect_attempts: load(&self.connect_attempts),
            connect_failures: load(&self.connect_failures),
            reconnects: load(&self.reconnects),
            tool_calls: load(&self.tool_calls),
            tool_failures: load(&self.tool_failures),
            job_fires_succeeded: load(&self.job_fires_succeeded),
            job_fires_failed: load(&self.job_fires_failed),
        }
    }
}

/// Serializable copy of [`ServerMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub queries_failed: u64,
    pub query_time_ms_total: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub job_fires_succeeded: u64,
    pub job_fires_failed: u64,
}

impl MetricsSnapshot {
    /// Mean statement latency in milliseconds.
    pub fn avg_query_time_ms(&self) -> f64 {
        if self.queries_total == 0 {
            return 0.0;
        }
        self.query_time_ms_total as f64 / self.queries_total as f64
    }
}

pub type SharedMetrics = Arc<ServerMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_correlation_id() {
        let a = short_correlation_id();
        let b = short_correlation_id();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_log_prefix() {
        let ctx = RequestContext::with_correlation_id("abc12345")
            .with_client("admin")
            .with_operation("query");
        assert_eq!(ctx.log_prefix(), "[abc12345] [admin] [query]");

        let ctx = RequestContext::with_correlation_id("abc12345").with_operation("query");
        assert_eq!(ctx.log_prefix(), "[abc12345] [query]");

        assert_eq!(RequestContext::with_correlation_id("x").log_prefix(), "[x]");
    }

    #[test]
    fn test_job_context() {
        let ctx = RequestContext::for_job("nightly", "database-size");
        assert_eq!(ctx.client_id.as_deref(), Some("scheduler:nightly"));
        assert_eq!(ctx.operation.as_deref(), Some("database-size"));
    }

    #[test]
    fn test_metrics_snapshot() {
        let metrics = ServerMetrics::new();
        metrics.record_query(true, Duration::from_millis(100));
        metrics.record_query(false, Duration::from_millis(200));
        metrics.record_connect(false);
        metrics.record_reconnect();
        metrics.record_job_fire(true);
        metrics.record_job_fire(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_total, 2);
        assert_eq!(snap.queries_failed, 1);
        assert_eq!(snap.connect_failures, 1);
        assert_eq!(snap.reconnects, 1);
        assert_eq!(snap.job_fires_succeeded, 1);
        assert_eq!(snap.job_fires_failed, 1);
        assert!((snap.avg_query_time_ms() - 150.0).abs() < 0.01);
    }
}
