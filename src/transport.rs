//! HTTP transport for the administrative surface.
//!
//! The HTTP transport is optional and requires the `http` feature flag.

use crate::constants::{
    DEFAULT_HTTP_HOST, DEFAULT_HTTP_PORT, DEFAULT_MAX_BODY_SIZE, DEFAULT_REQUEST_TIMEOUT_SECS,
};

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Enable CORS.
    pub enable_cors: bool,

    /// Allowed origins for CORS (empty means all).
    pub cors_origins: Vec<String>,

    /// Enable request tracing via tower-http TraceLayer.
    pub enable_tracing: bool,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
            enable_cors: true,
            cors_origins: Vec::new(),
            enable_tracing: true,
            request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

fn flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

impl HttpConfig {
    /// Create configuration from environment variables.
    ///
    /// - `DBMCP_HTTP_HOST` (default: 127.0.0.1)
    /// - `DBMCP_HTTP_PORT` (default: 8000)
    /// - `DBMCP_HTTP_CORS`, `DBMCP_HTTP_CORS_ORIGINS` (comma separated)
    /// - `DBMCP_HTTP_TRACING`
    /// - `DBMCP_HTTP_TIMEOUT` seconds, `DBMCP_HTTP_MAX_BODY` bytes
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("DBMCP_HTTP_HOST") {
            config.host = host;
        }

        if let Some(port) = std::env::var("DBMCP_HTTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            config.port = port;
        }

        if let Ok(cors) = std::env::var("DBMCP_HTTP_CORS") {
            config.enable_cors = flag(&cors);
        }

        if let Ok(origins) = std::env::var("DBMCP_HTTP_CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        if let Ok(tracing) = std::env::var("DBMCP_HTTP_TRACING") {
            config.enable_tracing = flag(&tracing);
        }

        if let Some(timeout) = std::env::var("DBMCP_HTTP_TIMEOUT")
            .ok()
            .and_then(|t| t.parse().ok())
        {
            config.request_timeout_seconds = timeout;
        }

        if let Some(limit) = std::env::var("DBMCP_HTTP_MAX_BODY")
            .ok()
            .and_then(|t| t.parse().ok())
        {
            config.max_body_size = limit;
        }

        config
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// axum server for the admin routes (only available with `http` feature).
#[cfg(feature = "http")]
pub mod http_server {
    use super::*;
    use crate::handlers;
    use crate::server::DbMcpServer;
    use crate::shutdown::SharedShutdownController;
    use axum::http::HeaderValue;
    use axum::Router;
    use std::time::Duration;
    use tower_http::cors::{AllowOrigin, Any, CorsLayer};
    use tower_http::limit::RequestBodyLimitLayer;
    use tower_http::timeout::TimeoutLayer;
    use tower_http::trace::TraceLayer;
    use tracing::{info, warn};

    fn cors_layer(origins: &[String]) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        if origins.is_empty() {
            return layer.allow_origin(Any);
        }
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o) {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin '{}'", o);
                    None
                }
            })
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }

    /// Admin router with the configured middleware applied.
    pub fn build_router(server: DbMcpServer, config: &HttpConfig) -> Router {
        let mut app = handlers::router(server)
            .layer(RequestBodyLimitLayer::new(config.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_seconds,
            )));

        if config.enable_cors {
            app = app.layer(cors_layer(&config.cors_origins));
        }
        if config.enable_tracing {
            app = app.layer(TraceLayer::new_for_http());
        }
        app
    }

    /// Serve the admin routes until the shutdown signal fires.
    pub async fn start_http_server(
        server: DbMcpServer,
        config: HttpConfig,
        shutdown_controller: SharedShutdownController,
    ) -> Result<(), anyhow::Error> {
        let app = build_router(server, &config);

        let addr = config.bind_address();
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!("HTTP server listening on http://{}", addr);
        info!("Health endpoint: http://{}/health", addr);
        if config.enable_tracing {
            info!("Request tracing enabled");
        }

        let mut shutdown_signal = shutdown_controller.signal();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal.recv().await;
                info!("HTTP server received shutdown signal");
            })
            .await?;

        Ok(())
    }
}
