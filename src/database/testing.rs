//! Scriptable connector for tests that must not touch a real database.

use super::connection::{ConnectTarget, Connector, PoolStatus, TargetPool};
use super::query::QueryResult;
use crate::error::ServerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub(crate) struct FakeShared {
    /// Pools created and not yet closed.
    pub live: AtomicUsize,
    /// Successful connects.
    pub connects: AtomicUsize,
    /// Next fetch/execute fails with a connectivity error.
    pub reset_next_statement: AtomicBool,
    /// Next probe fails with a connectivity error.
    pub reset_next_probe: AtomicBool,
    /// Every statement seen, with its parameters.
    pub statements: Mutex<Vec<(String, Vec<Value>)>>,
    /// `(needle, result)`: the first entry whose needle occurs in a
    /// statement answers it.
    pub script: Mutex<Vec<(String, QueryResult)>>,
}

/// Connector whose pools live in memory.
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    pub shared: Arc<FakeShared>,
    pub failing_hosts: Arc<Mutex<HashSet<String>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_host(&self, host: &str) {
        self.failing_hosts.lock().insert(host.to_string());
    }

    pub fn respond(&self, needle: &str, result: QueryResult) {
        self.shared.script.lock().push((needle.to_string(), result));
    }

    pub fn live_pools(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.shared.statements.lock().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Arc<dyn TargetPool>, ServerError> {
        tokio::task::yield_now().await;
        if self.failing_hosts.lock().contains(&target.host) {
            return Err(ServerError::connectivity(format!(
                "could not resolve host {}",
                target.host
            )));
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        self.shared.live.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakePool {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }
}

pub(crate) struct FakePool {
    shared: Arc<FakeShared>,
    closed: AtomicBool,
}

impl FakePool {
    fn check_reset(&self, flag: &AtomicBool) -> Result<(), ServerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ServerError::connectivity("Connection pool is closed"));
        }
        if flag.swap(false, Ordering::SeqCst) {
            return Err(ServerError::connectivity("connection reset by peer"));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetPool for FakePool {
    async fn probe(&self) -> Result<(), ServerError> {
        self.check_reset(&self.shared.reset_next_probe)
    }

    async fn fetch(&self, statement: &str, params: &[Value]) -> Result<QueryResult, ServerError> {
        self.check_reset(&self.shared.reset_next_statement)?;
        self.shared
            .statements
            .lock()
            .push((statement.to_string(), params.to_vec()));
        let script = self.shared.script.lock();
        Ok(script
            .iter()
            .find(|(needle, _)| statement.contains(needle.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, statement: &str, params: &[Value]) -> Result<u64, ServerError> {
        self.check_reset(&self.shared.reset_next_statement)?;
        self.shared
            .statements
            .lock()
            .push((statement.to_string(), params.to_vec()));
        Ok(1)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            total_connections: 1,
            idle_connections: 1,
        }
    }
}
