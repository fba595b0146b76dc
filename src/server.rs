//! Server struct definition and initialization.

use crate::config::Config;
use crate::database::{ConnectionRegistry, Connector, NativeConnector};
use crate::error::ServerError;
use crate::executor::JobExecutor;
use crate::repository::{JobRepository, MetadataStore, PgRepository, TargetRepository, TrendRepository};
use crate::scheduler::{JobService, TriggerEngine};
use crate::shutdown::ShutdownController;
use crate::telemetry::{ServerMetrics, SharedMetrics};
use crate::tools::{InProcessToolClient, ToolDeps, ToolRegistry};
use crate::vault::CredentialVault;
use std::sync::Arc;
use tracing::{info, warn};

/// The DB MCP Server instance.
///
/// Cloning is cheap; every component is shared behind an `Arc`. The
/// server owns:
///
/// - the **connection registry** mapping connection ids to live pools
/// - the **tool registry** with every built-in tool
/// - the **trigger engine** firing stored jobs through the tool registry
#[derive(Clone)]
pub struct DbMcpServer {
    pub(crate) config: Arc<Config>,
    pub(crate) targets: Arc<dyn TargetRepository>,
    pub(crate) jobs: Arc<JobService>,
    pub(crate) vault: Arc<CredentialVault>,
    pub(crate) connections: Arc<ConnectionRegistry>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) engine: Arc<TriggerEngine>,
    pub(crate) metrics: SharedMetrics,
}

impl DbMcpServer {
    /// Create a server backed by the configured metadata database.
    ///
    /// Connects the metadata pool and, when `auto_migrate` is set,
    /// creates the metadata schemas before anything else is built.
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let repository = PgRepository::connect(&config.metadata).await?;
        if config.metadata.auto_migrate {
            repository.migrate().await?;
        }

        let vault = Arc::new(CredentialVault::from_config(&config.vault));
        let connector: Arc<dyn Connector> = Arc::new(NativeConnector::new(config.pool.clone()));

        Self::from_parts(config, Arc::new(repository), vault, connector).await
    }

    /// Assemble a server from an existing store, vault and connector.
    pub async fn from_parts<R>(
        config: Config,
        store: Arc<R>,
        vault: Arc<CredentialVault>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ServerError>
    where
        R: MetadataStore + 'static,
    {
        let targets: Arc<dyn TargetRepository> = store.clone();
        let job_store: Arc<dyn JobRepository> = store.clone();
        let trends: Arc<dyn TrendRepository> = store;
        let metrics: SharedMetrics = Arc::new(ServerMetrics::new());

        let connections = Arc::new(ConnectionRegistry::new(
            targets.clone(),
            vault.clone(),
            connector,
            metrics.clone(),
        ));

        let deps = Arc::new(ToolDeps {
            connections: connections.clone(),
            targets: targets.clone(),
            trends,
        });
        let tools = Arc::new(ToolRegistry::with_builtin_tools(deps, metrics.clone()));

        let executor = Arc::new(JobExecutor::new(
            Arc::new(InProcessToolClient::new(tools.clone())),
            job_store.clone(),
            metrics.clone(),
        ));
        let engine = Arc::new(
            TriggerEngine::new(job_store.clone(), executor, config.scheduler.stop_timeout).await?,
        );
        let jobs = Arc::new(JobService::new(job_store, engine.clone()));

        Ok(Self {
            config: Arc::new(config),
            targets,
            jobs,
            vault,
            connections,
            tools,
            engine,
            metrics,
        })
    }

    /// Activate startup connections, then start the scheduler.
    ///
    /// A failing target never blocks startup; it is logged by the
    /// registry and retried lazily on first use.
    pub async fn start(&self) -> Result<(), ServerError> {
        let connected = self.connections.activate_startup_set().await?;
        info!("Activated {} startup connection(s)", connected);

        if self.config.scheduler.enabled {
            let loaded = self.engine.start().await?;
            info!("Scheduler started with {} job(s)", loaded);
        } else {
            warn!("Scheduler disabled; stored jobs will not fire");
        }
        Ok(())
    }

    /// Stop the scheduler, close every pool, then the metadata store.
    pub async fn shutdown(&self, controller: &ShutdownController) {
        controller.graceful_shutdown(self).await;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn targets(&self) -> &Arc<dyn TargetRepository> {
        &self.targets
    }

    pub fn jobs(&self) -> &Arc<JobService> {
        &self.jobs
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn engine(&self) -> &Arc<TriggerEngine> {
        &self.engine
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::memory_server;
    use super::*;
    use crate::repository::{ConnectionInput, NewJob};

    #[tokio::test]
    async fn test_start_activates_startup_connections_and_jobs() {
        let (server, repo, connector) = memory_server().await;
        let pg = repo.add_type("postgresql").await.unwrap();
        let encrypted = server.vault().encrypt("pw").unwrap();
        let record = repo
            .add_connection(
                &ConnectionInput {
                    database_type_id: pg.id,
                    host: "db1".into(),
                    port: 5432,
                    database_name: "orders".into(),
                    username: "app".into(),
                    is_active: true,
                    description: None,
                    connect_at_startup: true,
                },
                &encrypted,
            )
            .await
            .unwrap();
        server
            .jobs()
            .add_job(NewJob {
                job_name: "size".into(),
                tool_name: "database-size".into(),
                tool_params: None,
                trigger_type: "interval".into(),
                interval_seconds: Some(3600),
                cron_expression: None,
                is_active: true,
            })
            .await
            .unwrap();

        server.start().await.unwrap();

        assert!(server.connections().is_connected(record.id));
        assert_eq!(connector.live_pools(), 1);
        assert!(server.engine().is_running());
        assert_eq!(server.engine().registered_handles().await, vec!["job_1"]);

        server.shutdown(&ShutdownController::new()).await;
        assert!(!server.engine().is_running());
        assert_eq!(connector.live_pools(), 0);
    }

    #[tokio::test]
    async fn test_builtin_tools_are_wired() {
        let (server, _repo, _connector) = memory_server().await;
        assert!(server.tools().contains("pg_health_overview"));
        assert!(server.tools().contains("list_active_pools"));
    }
}
