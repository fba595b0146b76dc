//! Graceful shutdown handling.
//!
//! This module provides:
//! - Signal handling (SIGTERM, SIGHUP, Ctrl+C)
//! - Ordered teardown: scheduler first, then target pools, then the
//!   metadata store
//! - A bounded overall wait so a stuck pool never hangs the process

use crate::constants::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_FORCE_TIMEOUT};
use crate::server::DbMcpServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Shutdown signal that can be awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }

    /// Check if shutdown has been signaled without blocking.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    /// Sender to notify all listeners of shutdown.
    sender: watch::Sender<bool>,

    /// Flag indicating shutdown in progress.
    shutting_down: Arc<AtomicBool>,

    /// Broadcast sender for shutdown phase notifications.
    phase_sender: broadcast::Sender<ShutdownPhase>,

    /// Wait for in-flight work before teardown proceeds regardless.
    drain_timeout: Duration,

    /// Extra time granted to teardown after the drain timeout.
    force_timeout: Duration,
}

/// Shutdown phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Shutdown has been initiated.
    Initiated,

    /// Scheduler no longer fires; running fires are drained.
    StoppingScheduler,

    /// Every target pool is being closed.
    ClosingPools,

    /// The metadata store is being released.
    ClosingRepository,

    /// Final cleanup complete.
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::StoppingScheduler => write!(f, "stopping_scheduler"),
            ShutdownPhase::ClosingPools => write!(f, "closing_pools"),
            ShutdownPhase::ClosingRepository => write!(f, "closing_repository"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

impl ShutdownController {
    /// Create a new shutdown controller with default timeouts.
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_DRAIN_TIMEOUT, DEFAULT_FORCE_TIMEOUT)
    }

    /// Create a shutdown controller with custom timeouts.
    pub fn with_timeouts(drain_timeout: Duration, force_timeout: Duration) -> Self {
        let (sender, _) = watch::channel(false);
        let (phase_sender, _) = broadcast::channel(16);

        Self {
            sender,
            shutting_down: Arc::new(AtomicBool::new(false)),
            phase_sender,
            drain_timeout,
            force_timeout,
        }
    }

    pub fn from_config(config: &ShutdownConfig) -> Self {
        Self::with_timeouts(config.drain_timeout, config.force_timeout)
    }

    /// Get a shutdown signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to shutdown phase notifications.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<ShutdownPhase> {
        self.phase_sender.subscribe()
    }

    /// Check if shutdown is in progress.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Initiate shutdown. Only the first call notifies listeners.
    pub fn shutdown(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            info!("Initiating graceful shutdown...");
            let _ = self.sender.send(true);
            let _ = self.phase_sender.send(ShutdownPhase::Initiated);
        }
    }

    fn notify_phase(&self, phase: ShutdownPhase) {
        info!("Shutdown phase: {}", phase);
        let _ = self.phase_sender.send(phase);
    }

    /// Tear the server down in order.
    ///
    /// The scheduler stops first so that no fire starts against a pool
    /// that is about to close. The whole teardown is bounded by
    /// `drain_timeout + force_timeout`; when that elapses the remaining
    /// phases are abandoned and `Complete` is still announced.
    pub async fn graceful_shutdown(&self, server: &DbMcpServer) {
        self.shutdown();

        let budget = self.drain_timeout + self.force_timeout;
        if tokio::time::timeout(budget, self.teardown(server)).await.is_err() {
            warn!(
                "Shutdown did not finish within {:?}; abandoning remaining cleanup",
                budget
            );
        }

        self.notify_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }

    async fn teardown(&self, server: &DbMcpServer) {
        self.notify_phase(ShutdownPhase::StoppingScheduler);
        server.engine().stop().await;

        self.notify_phase(ShutdownPhase::ClosingPools);
        server.connections().close_all().await;

        self.notify_phase(ShutdownPhase::ClosingRepository);
        server.targets().close().await;
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn force_timeout(&self) -> Duration {
        self.force_timeout
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Install signal handlers for graceful shutdown.
///
/// Ctrl+C, SIGTERM and SIGHUP all trigger the controller.
pub async fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = controller.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C signal: {}", e);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("Received {}, initiating shutdown...", name);
                        controller.shutdown();
                    }
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                    }
                }
            });
        }
    }

    #[cfg(not(unix))]
    drop(controller);
}

/// Shutdown configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Wait for running fires to finish.
    pub drain_timeout: Duration,

    /// Extra time for closing pools and the metadata store.
    pub force_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            force_timeout: DEFAULT_FORCE_TIMEOUT,
        }
    }
}

impl ShutdownConfig {
    /// Create configuration from environment variables.
    ///
    /// - `DBMCP_SHUTDOWN_DRAIN_TIMEOUT`: seconds (default: 30)
    /// - `DBMCP_SHUTDOWN_FORCE_TIMEOUT`: seconds (default: 10)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = std::env::var("DBMCP_SHUTDOWN_DRAIN_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.drain_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = std::env::var("DBMCP_SHUTDOWN_FORCE_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.force_timeout = Duration::from_secs(secs);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::memory_server;

    #[test]
    fn test_shutdown_controller_creation() {
        let controller = ShutdownController::new();
        assert!(!controller.is_shutting_down());
        assert_eq!(controller.drain_timeout(), Duration::from_secs(30));
        assert_eq!(controller.force_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_shutdown_signal() {
        let controller = ShutdownController::new();
        let signal = controller.signal();

        assert!(!signal.is_shutdown());

        controller.shutdown();
        assert!(controller.is_shutting_down());
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let controller = ShutdownController::new();
        let mut phases = controller.subscribe_phases();

        controller.shutdown();
        controller.shutdown();

        assert_eq!(phases.recv().await.unwrap(), ShutdownPhase::Initiated);
        assert!(phases.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_recv_wakes_waiter() {
        let controller = Arc::new(ShutdownController::new());
        let mut signal = controller.signal();
        let trigger = controller.clone();
        tokio::spawn(async move { trigger.shutdown() });

        tokio::time::timeout(Duration::from_secs(5), signal.recv())
            .await
            .unwrap();
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_graceful_shutdown_phase_order() {
        let (server, _repo, _connector) = memory_server().await;
        server.start().await.unwrap();
        let controller = ShutdownController::new();
        let mut phases = controller.subscribe_phases();

        controller.graceful_shutdown(&server).await;

        let mut seen = Vec::new();
        while let Ok(phase) = phases.try_recv() {
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                ShutdownPhase::Initiated,
                ShutdownPhase::StoppingScheduler,
                ShutdownPhase::ClosingPools,
                ShutdownPhase::ClosingRepository,
                ShutdownPhase::Complete,
            ]
        );
        assert!(!server.engine().is_running());
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.force_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Initiated.to_string(), "initiated");
        assert_eq!(
            ShutdownPhase::StoppingScheduler.to_string(),
            "stopping_scheduler"
        );
        assert_eq!(ShutdownPhase::ClosingPools.to_string(), "closing_pools");
        assert_eq!(
            ShutdownPhase::ClosingRepository.to_string(),
            "closing_repository"
        );
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }
}
