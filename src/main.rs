//! DB MCP Server entry point.
//!
//! Starts the connection registry and the job scheduler, then serves the
//! administrative HTTP routes until a shutdown signal arrives.

use anyhow::Result;
use dbmcp_server::constants::LOG_FILE_PREFIX;
use dbmcp_server::shutdown::{install_signal_handlers, ShutdownConfig, ShutdownController};
use dbmcp_server::{Config, DbMcpServer};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let _log_guard = init_logging(config.logging.log_dir.as_deref());

    std::panic::set_hook(Box::new(|panic| {
        error!("[PANIC] {}", panic);
        eprintln!("[PANIC] {}", panic);
    }));

    info!("DB MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let shutdown_controller = Arc::new(ShutdownController::from_config(&ShutdownConfig::from_env()));
    install_signal_handlers(shutdown_controller.clone()).await;

    let server = DbMcpServer::new(config).await?;
    server.start().await?;
    info!("Server initialized");

    serve(&server, &shutdown_controller).await;

    server.shutdown(&shutdown_controller).await;
    info!("Server shutdown complete");
    Ok(())
}

#[cfg(feature = "http")]
async fn serve(server: &DbMcpServer, shutdown_controller: &Arc<ShutdownController>) {
    use dbmcp_server::transport::{http_server, HttpConfig};

    let http = http_server::start_http_server(
        server.clone(),
        HttpConfig::from_env(),
        shutdown_controller.clone(),
    );
    let mut shutdown_signal = shutdown_controller.signal();

    tokio::select! {
        result = http => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        }
        _ = shutdown_signal.recv() => {
            info!("Shutdown signal received");
        }
    }
}

#[cfg(not(feature = "http"))]
async fn serve(_server: &DbMcpServer, shutdown_controller: &Arc<ShutdownController>) {
    info!("HTTP surface disabled; running scheduler only");
    shutdown_controller.signal().recv().await;
    info!("Shutdown signal received");
}

/// Initialize tracing with stderr output and, when `log_dir` is set, a
/// daily rotating file. The returned guard flushes the file on drop.
fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("warn,dbmcp_server=info"));

    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();
    guard
}
