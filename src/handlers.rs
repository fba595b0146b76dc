//! Administrative HTTP routes.
//!
//! Every route is a thin adapter over the server's components: the
//! metadata repository, the connection registry, the tool registry and
//! the job service. Failures are rendered as `{"error", "kind"}` with the
//! status derived from [`ErrorKind`].

use crate::error::{ErrorKind, ServerError};
use crate::repository::{ConnectionInput, JobPatch, NewJob};
use crate::server::DbMcpServer;
use crate::telemetry::RequestContext;
use crate::tools::parse_argument_bag;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{FromRequest, FromRequestParts, Path, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

/// Error wrapper rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError(pub ServerError);

impl From<ServerError> for ApiError {
    fn from(e: ServerError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = StatusCode::from_u16(kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if kind == ErrorKind::Internal {
            tracing::error!("Request failed: {}", self.0);
        }
        let body = json!({ "error": self.0.to_string(), "kind": kind });
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(ServerError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(ServerError::validation(rejection.body_text()))
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// JSON body whose rejections render as [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Path parameters whose rejections render as [`ApiError`].
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Body of `POST|PUT /metadata/database-types`.
#[derive(Debug, Deserialize)]
pub struct TypeRequest {
    pub name: String,
}

/// Body of `POST|PUT /metadata/database-connections`.
#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    #[serde(flatten)]
    pub input: ConnectionInput,
    #[serde(default)]
    pub password: Option<String>,
}

/// Body of `POST /metadata/database-connections/{id}/query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Body of `POST /metadata/tools/execute`.
#[derive(Debug, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// All admin routes, bound to `server`.
pub fn router(server: DbMcpServer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metadata/database-types", get(list_types).post(add_type))
        .route(
            "/metadata/database-types/{id}",
            get(get_type).put(update_type).delete(delete_type),
        )
        .route(
            "/metadata/database-connections",
            get(list_connections).post(add_connection),
        )
        .route(
            "/metadata/database-connections/deactivate-all",
            post(deactivate_all),
        )
        .route(
            "/metadata/database-connections/{id}",
            get(get_connection)
                .put(update_connection)
                .delete(delete_connection),
        )
        .route(
            "/metadata/database-connections/{id}/activate",
            post(activate_connection),
        )
        .route(
            "/metadata/database-connections/{id}/deactivate",
            post(deactivate_connection),
        )
        .route(
            "/metadata/database-connections/{id}/query",
            post(run_query),
        )
        .route("/metadata/pools", get(list_pools))
        .route("/metadata/tools", get(list_tools))
        .route("/metadata/tools/execute", post(execute_tool))
        .route("/job", get(list_jobs).post(add_job))
        .route("/job/{id}", get(get_job).put(update_job).delete(delete_job))
        .with_state(server)
}

async fn health(State(server): State<DbMcpServer>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "server": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "pools": server.connections().len(),
        "scheduler": {
            "running": server.engine().is_running(),
            "jobs": server.engine().registered_handles().await.len(),
            "in_flight": server.engine().in_flight(),
        },
        "metrics": server.metrics().snapshot(),
    }))
}

// =============================================================================
// Database types
// =============================================================================

async fn list_types(State(server): State<DbMcpServer>) -> ApiResult<impl IntoResponse> {
    Ok(Json(server.targets().list_types().await?))
}

async fn get_type(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    let found = server
        .targets()
        .get_type(id)
        .await?
        .ok_or_else(|| ServerError::not_found("Database type", id))?;
    Ok(Json(found))
}

async fn add_type(
    State(server): State<DbMcpServer>,
    ApiJson(body): ApiJson<TypeRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(ServerError::validation("name must not be empty").into());
    }
    let created = server.targets().add_type(body.name.trim()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_type(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<TypeRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.name.trim().is_empty() {
        return Err(ServerError::validation("name must not be empty").into());
    }
    let updated = server
        .targets()
        .update_type(id, body.name.trim())
        .await?
        .ok_or_else(|| ServerError::not_found("Database type", id))?;
    Ok(Json(updated))
}

async fn delete_type(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    if !server.targets().delete_type(id).await? {
        return Err(ServerError::not_found("Database type", id).into());
    }
    Ok(Json(json!({ "deleted": id })))
}

// =============================================================================
// Connections
// =============================================================================

async fn list_connections(State(server): State<DbMcpServer>) -> ApiResult<impl IntoResponse> {
    Ok(Json(server.targets().list_connections(None).await?))
}

async fn get_connection(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    let record = server
        .targets()
        .get_connection(id)
        .await?
        .ok_or_else(|| ServerError::not_found("Connection", id))?;
    Ok(Json(record))
}

async fn add_connection(
    State(server): State<DbMcpServer>,
    ApiJson(body): ApiJson<ConnectionRequest>,
) -> ApiResult<impl IntoResponse> {
    let password = body
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ServerError::validation("password is required"))?;
    let encrypted = server.vault().encrypt(password)?;
    let created = server
        .targets()
        .add_connection(&body.input, &encrypted)
        .await?;
    info!(
        "Added connection {} ({}@{}:{}/{})",
        created.id, created.username, created.host, created.port, created.database_name
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_connection(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<ConnectionRequest>,
) -> ApiResult<impl IntoResponse> {
    let encrypted = match body.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => Some(server.vault().encrypt(password)?),
        None => None,
    };
    let updated = server
        .targets()
        .update_connection(id, &body.input, encrypted.as_deref())
        .await?
        .ok_or_else(|| ServerError::not_found("Connection", id))?;

    if server.connections().is_connected(id) {
        server.connections().reconnect(id).await;
    }
    Ok(Json(updated))
}

async fn delete_connection(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    server.connections().disconnect(id).await;
    if !server.targets().delete_connection(id).await? {
        return Err(ServerError::not_found("Connection", id).into());
    }
    Ok(Json(json!({ "deleted": id })))
}

async fn deactivate_all(State(server): State<DbMcpServer>) -> ApiResult<impl IntoResponse> {
    let updated = server.targets().deactivate_all().await?;
    server.connections().close_all().await;
    Ok(Json(json!({ "deactivated": updated })))
}

async fn activate_connection(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    server
        .targets()
        .set_active(id, true)
        .await?
        .ok_or_else(|| ServerError::not_found("Connection", id))?;
    let connected = server.connections().connect(id).await;
    Ok(Json(json!({
        "id": id,
        "is_active": true,
        "connected": connected,
        "last_error": server.connections().last_error(id),
    })))
}

async fn deactivate_connection(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    server
        .targets()
        .set_active(id, false)
        .await?
        .ok_or_else(|| ServerError::not_found("Connection", id))?;
    server.connections().disconnect(id).await;
    Ok(Json(json!({ "id": id, "is_active": false, "connected": false })))
}

async fn run_query(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(body): ApiJson<QueryRequest>,
) -> ApiResult<impl IntoResponse> {
    let result = server
        .connections()
        .execute(id, &body.query, &body.params)
        .await?;
    Ok(Json(result))
}

async fn list_pools(State(server): State<DbMcpServer>) -> Json<Value> {
    Json(json!({
        "active_connection": server.connections().active_connection(),
        "pools": server.connections().list_pools(),
    }))
}

// =============================================================================
// Tools
// =============================================================================

async fn list_tools(State(server): State<DbMcpServer>) -> impl IntoResponse {
    Json(server.tools().list())
}

async fn execute_tool(
    State(server): State<DbMcpServer>,
    ApiJson(body): ApiJson<ToolRequest>,
) -> ApiResult<impl IntoResponse> {
    let arguments = parse_argument_bag(body.arguments.as_ref()).map_err(ServerError::validation)?;
    let ctx = RequestContext::new()
        .with_client("http")
        .with_operation(body.name.as_str());
    let output = server.tools().call(&ctx, &body.name, arguments).await?;
    Ok(Json(output))
}

// =============================================================================
// Jobs
// =============================================================================

async fn list_jobs(State(server): State<DbMcpServer>) -> ApiResult<impl IntoResponse> {
    Ok(Json(server.jobs().list_jobs().await?))
}

async fn get_job(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(server.jobs().get_job(id).await?))
}

async fn add_job(
    State(server): State<DbMcpServer>,
    ApiJson(body): ApiJson<NewJob>,
) -> ApiResult<impl IntoResponse> {
    let created = server.jobs().add_job(body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_job(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
    ApiJson(patch): ApiJson<JobPatch>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(server.jobs().update_job(id, patch).await?))
}

async fn delete_job(
    State(server): State<DbMcpServer>,
    ApiPath(id): ApiPath<i32>,
) -> ApiResult<impl IntoResponse> {
    server.jobs().delete_job(id).await?;
    Ok(Json(json!({ "deleted": id })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::FakeConnector;
    use crate::repository::{InMemoryRepository, TargetRepository};
    use crate::server::test_support::memory_server;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Harness {
        server: DbMcpServer,
        repo: Arc<InMemoryRepository>,
        connector: FakeConnector,
    }

    async fn harness() -> Harness {
        let (server, repo, connector) = memory_server().await;
        Harness {
            server,
            repo,
            connector,
        }
    }

    impl Harness {
        async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let raw = body.map(|b| b.to_string()).unwrap_or_default();
            self.send_raw(method, uri, raw).await
        }

        async fn send_raw(&self, method: &str, uri: &str, raw: String) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(raw))
                .unwrap();
            let response = router(self.server.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn seed_connection(&self) -> i32 {
            let (_, pg) = self
                .send("POST", "/metadata/database-types", Some(json!({"name": "postgresql"})))
                .await;
            let (status, created) = self
                .send(
                    "POST",
                    "/metadata/database-connections",
                    Some(json!({
                        "database_type_id": pg["id"],
                        "host": "db1",
                        "port": 5432,
                        "database_name": "orders",
                        "username": "app",
                        "password": "hunter2",
                        "connect_at_startup": false
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            created["id"].as_i64().unwrap() as i32
        }
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, body) = h.send("GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["scheduler"]["running"], json!(false));
    }

    #[tokio::test]
    async fn test_create_connection_encrypts_password() {
        let h = harness().await;
        let id = h.seed_connection().await;

        let (status, body) = h
            .send("GET", &format!("/metadata/database-connections/{}", id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["host"], json!("db1"));
        assert!(body.get("encrypted_password").is_none());

        let stored = h.repo.get_connection_with_secret(id).await.unwrap().unwrap();
        let cipher = stored.encrypted_password.unwrap();
        assert_ne!(cipher, "hunter2");
        assert_eq!(h.server.vault().decrypt(&cipher).unwrap(), "hunter2");
    }

    #[tokio::test]
    async fn test_create_connection_requires_password() {
        let h = harness().await;
        let (status, body) = h
            .send(
                "POST",
                "/metadata/database-connections",
                Some(json!({
                    "database_type_id": 1,
                    "host": "db1",
                    "port": 5432,
                    "database_name": "orders",
                    "username": "app"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("validation"));
    }

    #[tokio::test]
    async fn test_update_without_password_keeps_ciphertext() {
        let h = harness().await;
        let id = h.seed_connection().await;
        let before = h.repo.get_connection_with_secret(id).await.unwrap().unwrap();

        let (status, body) = h
            .send(
                "PUT",
                &format!("/metadata/database-connections/{}", id),
                Some(json!({
                    "database_type_id": before.database_type_id,
                    "host": "db1",
                    "port": 5432,
                    "database_name": "orders",
                    "username": "app",
                    "description": "renamed"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], json!("renamed"));

        let after = h.repo.get_connection_with_secret(id).await.unwrap().unwrap();
        assert_eq!(after.encrypted_password, before.encrypted_password);
    }

    #[tokio::test]
    async fn test_activate_and_deactivate() {
        let h = harness().await;
        let id = h.seed_connection().await;

        let (status, body) = h
            .send("POST", &format!("/metadata/database-connections/{}/activate", id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], json!(true));

        let (_, pools) = h.send("GET", "/metadata/pools", None).await;
        assert_eq!(pools["pools"][0]["id"], json!(id));

        let (status, _) = h
            .send("POST", &format!("/metadata/database-connections/{}/deactivate", id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!h.server.connections().is_connected(id));
        assert_eq!(h.connector.live_pools(), 0);
        let record = h.repo.get_connection(id).await.unwrap().unwrap();
        assert!(!record.is_active);
    }

    #[tokio::test]
    async fn test_unknown_connection_is_404() {
        let h = harness().await;
        let (status, body) = h.send("GET", "/metadata/database-connections/77", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], json!("not_found"));

        let (status, _) = h
            .send("POST", "/metadata/database-connections/77/activate", None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ad_hoc_query() {
        let h = harness().await;
        let id = h.seed_connection().await;
        let (status, body) = h
            .send(
                "POST",
                &format!("/metadata/database-connections/{}/query", id),
                Some(json!({"query": "DELETE FROM orders WHERE id = $1", "params": [7]})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rows_affected"], json!(1));
        assert_eq!(h.connector.statements().last().unwrap().1, vec![json!(7)]);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let h = harness().await;
        let (status, created) = h
            .send(
                "POST",
                "/job",
                Some(json!({
                    "job_name": "nightly-capacity",
                    "tool_name": "pg_capacity_growth_trend_database_capacity_insert",
                    "tool_params": {"connection_id": 1},
                    "trigger_type": "cron",
                    "cron_expression": "0 2 * * *"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let job_id = created["job_id"].as_i64().unwrap() as i32;
        assert!(h.server.engine().is_registered(job_id).await);

        let (status, updated) = h
            .send("PUT", &format!("/job/{}", job_id), Some(json!({"is_active": false})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["is_active"], json!(false));
        assert!(!h.server.engine().is_registered(job_id).await);

        let (status, _) = h.send("DELETE", &format!("/job/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = h.send("GET", &format!("/job/{}", job_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_job_with_bad_cron_is_rejected() {
        let h = harness().await;
        let (status, body) = h
            .send(
                "POST",
                "/job",
                Some(json!({
                    "job_name": "broken",
                    "tool_name": "database-size",
                    "trigger_type": "cron",
                    "cron_expression": "every tuesday"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("validation"));
        let (_, jobs) = h.send("GET", "/job", None).await;
        assert_eq!(jobs, json!([]));
    }

    #[tokio::test]
    async fn test_tools_listing_and_execute() {
        let h = harness().await;
        let (status, tools) = h.send("GET", "/metadata/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tools.as_array().unwrap().len(), 21);

        let (status, body) = h
            .send(
                "POST",
                "/metadata/tools/execute",
                Some(json!({"name": "list_active_pools", "arguments": "{}"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["pools"], json!([]));

        let (status, _) = h
            .send(
                "POST",
                "/metadata/tools/execute",
                Some(json!({"name": "no-such-tool"})),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = h
            .send(
                "POST",
                "/metadata/tools/execute",
                Some(json!({"name": "list_active_pools", "arguments": [1, 2]})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_body_field_is_validation() {
        let h = harness().await;
        let (status, body) = h.send("POST", "/job", Some(json!({"job_name": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("validation"));
        assert!(body["error"].as_str().unwrap().contains("tool_name"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_validation() {
        let h = harness().await;
        let (status, body) = h
            .send_raw("POST", "/metadata/database-types", "{\"name\": ".into())
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("validation"));
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_validation() {
        let h = harness().await;
        let (status, body) = h.send("GET", "/job/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("validation"));

        let (status, body) = h
            .send("POST", "/metadata/database-connections/abc/activate", None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], json!("validation"));
    }
}
