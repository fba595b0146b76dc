//! Configured connections and live pools.

use super::{Tool, ToolDeps, ToolOutput, ToolParameter, ToolParams};
use crate::error::ServerError;
use crate::telemetry::RequestContext;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub(crate) fn tools(deps: &Arc<ToolDeps>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListConnections(deps.clone())),
        Arc::new(GetConnection(deps.clone())),
        Arc::new(ListActivePools(deps.clone())),
    ]
}

pub struct ListConnections(Arc<ToolDeps>);

#[async_trait]
impl Tool for ListConnections {
    fn name(&self) -> &'static str {
        "list_all_connections_details"
    }

    fn description(&self) -> &'static str {
        "List every database connection configured in the server (passwords excluded)"
    }

    async fn call(&self, _ctx: &RequestContext, _params: ToolParams) -> Result<ToolOutput, ServerError> {
        let connections = self.0.targets.list_connections(None).await?;
        let data = serde_json::to_value(&connections).unwrap_or(Value::Array(Vec::new()));
        Ok(ToolOutput::report("Configured Connections", data))
    }
}

pub struct GetConnection(Arc<ToolDeps>);

#[async_trait]
impl Tool for GetConnection {
    fn name(&self) -> &'static str {
        "get_connection_detail"
    }

    fn description(&self) -> &'static str {
        "Details of one configured database connection (password excluded)"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::connection_id()]
    }

    async fn call(&self, _ctx: &RequestContext, params: ToolParams) -> Result<ToolOutput, ServerError> {
        let id = params.connection_id()?;
        let record = self
            .0
            .targets
            .get_connection(id)
            .await?
            .ok_or_else(|| ServerError::not_found("Connection", id))?;
        let mut data = serde_json::to_value(&record).unwrap_or_else(|_| json!({}));
        data["connected"] = json!(self.0.connections.is_connected(id));
        if let Some(error) = self.0.connections.last_error(id) {
            data["last_error"] = json!(error);
        }
        Ok(ToolOutput::report(format!("Connection {}", id), data))
    }
}

pub struct ListActivePools(Arc<ToolDeps>);

#[async_trait]
impl Tool for ListActivePools {
    fn name(&self) -> &'static str {
        "list_active_pools"
    }

    fn description(&self) -> &'static str {
        "List the live connection pools held by the server"
    }

    async fn call(&self, _ctx: &RequestContext, _params: ToolParams) -> Result<ToolOutput, ServerError> {
        let pools = self.0.connections.list_pools();
        let data = json!({
            "active_connection": self.0.connections.active_connection(),
            "pools": serde_json::to_value(&pools).unwrap_or(Value::Array(Vec::new())),
        });
        Ok(ToolOutput::report("Active Pools", data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{args, fixture};

    #[tokio::test]
    async fn test_connection_listing_hides_secret() {
        let fx = fixture().await;
        let output = ListConnections(fx.deps.clone())
            .call(&RequestContext::new(), ToolParams::default())
            .await
            .unwrap();
        let first = &output.data[0];
        assert_eq!(first["host"], json!("db.example.com"));
        assert!(first.get("encrypted_password").is_none());
        assert!(!output.text.contains("encrypted_password"));
    }

    #[tokio::test]
    async fn test_connection_detail_reports_connectivity() {
        let fx = fixture().await;
        let tool = GetConnection(fx.deps.clone());
        let ctx = RequestContext::new();
        let params = args(json!({"connection_id": fx.connection_id}));

        let before = tool.call(&ctx, params.clone()).await.unwrap();
        assert_eq!(before.data["connected"], json!(false));

        assert!(fx.deps.connections.connect(fx.connection_id).await);
        let after = tool.call(&ctx, params).await.unwrap();
        assert_eq!(after.data["connected"], json!(true));

        let missing = tool.call(&ctx, args(json!({"connection_id": 404}))).await;
        assert!(matches!(missing, Err(ServerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_active_pools() {
        let fx = fixture().await;
        fx.deps.connections.connect(fx.connection_id).await;
        fx.deps
            .connections
            .set_active_connection(fx.connection_id)
            .unwrap();

        let output = ListActivePools(fx.deps.clone())
            .call(&RequestContext::new(), ToolParams::default())
            .await
            .unwrap();
        assert_eq!(output.data["active_connection"], json!(fx.connection_id));
        assert_eq!(output.data["pools"][0]["database"], json!("orders"));
        assert_eq!(output.data["pools"][0]["active"], json!(true));
    }
}
