//! Callable tools.
//!
//! Every tool declares its parameters; the [`ToolRegistry`] checks a call's
//! arguments against them (required, type, defaults) before the tool runs.
//! Tools reach target databases only through the connection registry.
//!
//! - introspection: `list-all-tables`, `list-all-tables-in-schema`,
//!   `list-all-columns-in-table`, `check-bloat`, `database-size`,
//!   `count-rows`, `query`
//! - metadata: `list_all_connections_details`, `get_connection_detail`,
//!   `list_active_pools`
//! - observability: `pg_health_overview`, `pg_connections_report`,
//!   `pg_top_queries_report`, `pg_bloat_report`, `pg_autovacuum_activity`,
//!   `pg_wal_activity_report`, `pg_capacity_report`, `pg_replication_status`
//! - trends: `pg_capacity_growth_trend`,
//!   `pg_capacity_growth_trend_database_capacity_insert`,
//!   `pg_capacity_growth_trend_table_capacity_insert`

mod inputs;
pub mod metadata;
pub mod observability;
pub mod postgres;
pub mod trends;

pub use inputs::{parse_argument_bag, ToolParams};

use crate::database::{ConnectionRegistry, QueryResult};
use crate::error::ServerError;
use crate::executor::ToolClient;
use crate::repository::{TargetRepository, TrendRepository};
use crate::telemetry::{RequestContext, SharedMetrics};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Integer,
    String,
    Boolean,
    Object,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Integer => inputs::as_integer(value).is_some(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
        }
    }

    fn json_type(self) -> &'static str {
        match self {
            ParamType::Integer => "integer",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
        }
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolParameter {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub description: &'static str,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParameter {
    pub fn required(name: &'static str, kind: ParamType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamType,
        description: &'static str,
        default: Value,
    ) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default: Some(default),
        }
    }

    /// The `connection_id` parameter shared by all target tools.
    pub fn connection_id() -> Self {
        Self::required(
            "connection_id",
            ParamType::Integer,
            "Id of the configured database connection",
        )
    }
}

/// Listing entry of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Result of a tool call: readable text plus the structured payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub text: String,
    pub data: Value,
}

impl ToolOutput {
    /// `# title` followed by the payload as a fenced JSON block.
    pub fn report(title: impl AsRef<str>, data: Value) -> Self {
        let pretty = serde_json::to_string_pretty(&data).unwrap_or_else(|_| data.to_string());
        Self {
            text: format!("# {}\n\n```json\n{}\n```", title.as_ref(), pretty),
            data,
        }
    }

    /// Tabular output of an ad-hoc statement.
    pub fn table(result: &QueryResult) -> Self {
        Self {
            text: result.to_markdown_table(),
            data: json!({
                "rows": result.rows_json(),
                "rows_affected": result.rows_affected,
                "execution_time_ms": result.execution_time_ms,
            }),
        }
    }
}

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    /// Run with arguments already checked against [`Tool::parameters`].
    async fn call(&self, ctx: &RequestContext, params: ToolParams)
        -> Result<ToolOutput, ServerError>;

    /// JSON-schema style listing entry.
    fn definition(&self) -> ToolDefinition {
        let parameters = self.parameters();
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in &parameters {
            let mut property = json!({
                "type": p.kind.json_type(),
                "description": p.description,
            });
            if let Some(default) = &p.default {
                property["default"] = default.clone();
            }
            properties.insert(p.name.to_string(), property);
            if p.required {
                required.push(Value::from(p.name));
            }
        }
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }
}

/// Collaborators shared by the built-in tools.
pub struct ToolDeps {
    pub connections: Arc<ConnectionRegistry>,
    pub targets: Arc<dyn TargetRepository>,
    pub trends: Arc<dyn TrendRepository>,
}

impl ToolDeps {
    /// Run a statement on a target and return its rows.
    pub(crate) async fn query(
        &self,
        connection_id: i32,
        statement: &str,
        params: &[Value],
    ) -> Result<QueryResult, ServerError> {
        self.connections
            .execute(connection_id, statement, params)
            .await
    }
}

/// Tools by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    metrics: SharedMetrics,
}

impl ToolRegistry {
    /// Empty registry.
    pub fn new(metrics: SharedMetrics) -> Self {
        Self {
            tools: HashMap::new(),
            metrics,
        }
    }

    /// Registry holding every built-in tool.
    pub fn with_builtin_tools(deps: Arc<ToolDeps>, metrics: SharedMetrics) -> Self {
        let mut registry = Self::new(metrics);
        for tool in postgres::tools(&deps)
            .into_iter()
            .chain(metadata::tools(&deps))
            .chain(observability::tools(&deps))
            .chain(trends::tools(&deps))
        {
            registry.register(tool);
        }
        info!("Registered {} tool(s)", registry.len());
        registry
    }

    /// Add a tool, replacing one with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if self.tools.insert(tool.name().to_string(), tool).is_some() {
            warn!("Replaced an existing tool registration");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Listing entries, sorted by name.
    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Check `arguments` against the declared parameters and fill defaults.
    /// Undeclared arguments are passed through untouched.
    fn prepare(tool: &dyn Tool, arguments: Map<String, Value>) -> Result<ToolParams, ServerError> {
        let mut params = ToolParams::new(arguments);
        for p in tool.parameters() {
            match params.get(p.name) {
                Some(value) if !p.kind.accepts(value) => {
                    return Err(ServerError::validation(format!(
                        "Parameter '{}' of tool '{}' must be of type {}",
                        p.name,
                        tool.name(),
                        p.kind.json_type()
                    )));
                }
                Some(_) => {}
                None if p.required => {
                    return Err(ServerError::validation(format!(
                        "Missing required parameter '{}' for tool '{}'",
                        p.name,
                        tool.name()
                    )));
                }
                None => {
                    if let Some(default) = p.default {
                        params.insert(p.name, default);
                    }
                }
            }
        }
        Ok(params)
    }

    /// Invoke `name` with `arguments`.
    pub async fn call(
        &self,
        ctx: &RequestContext,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ServerError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ServerError::not_found("Tool", name))?;

        let params = Self::prepare(tool.as_ref(), arguments)?;
        debug!("{} Calling tool {}", ctx.log_prefix(), name);

        let result = tool.call(ctx, params).await;
        self.metrics.record_tool_call(result.is_ok());
        match &result {
            Ok(_) => info!(
                "{} Tool {} completed in {} ms",
                ctx.log_prefix(),
                name,
                ctx.elapsed().as_millis()
            ),
            Err(e) => warn!("{} Tool {} failed: {}", ctx.log_prefix(), name, e),
        }
        result
    }
}

/// Tool client that dispatches into a registry in this process.
pub struct InProcessToolClient {
    registry: Arc<ToolRegistry>,
}

impl InProcessToolClient {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ToolClient for InProcessToolClient {
    async fn call(
        &self,
        ctx: &RequestContext,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolOutput, ServerError> {
        self.registry.call(ctx, tool_name, arguments).await
    }
}
