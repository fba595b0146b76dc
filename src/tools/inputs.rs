//! Tool argument bags.

use crate::error::ServerError;
use serde_json::{Map, Value};

/// Parse a stored parameter payload into an argument bag.
///
/// `null` and a missing payload give an empty bag, an object is used as
/// is, and a string is parsed as JSON text that must hold an object.
/// Anything else is malformed.
pub fn parse_argument_bag(raw: Option<&Value>) -> Result<Map<String, Value>, String> {
    match raw {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(Map::new()),
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("expected a JSON object, got {}", json_type(&other))),
            Err(e) => Err(format!("invalid JSON: {}", e)),
        },
        Some(other) => Err(format!("expected a JSON object, got {}", json_type(other))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Validated arguments of one tool call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolParams {
    values: Map<String, Value>,
}

impl ToolParams {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// Lenient construction used by scheduled fires: a malformed payload
    /// becomes an empty bag and the parse error is handed back.
    pub fn parse_or_empty(raw: Option<&Value>) -> (Self, Option<String>) {
        match parse_argument_bag(raw) {
            Ok(values) => (Self::new(values), None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    pub fn optional_i64(&self, name: &str) -> Result<Option<i64>, ServerError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => as_integer(value).map(Some).ok_or_else(|| {
                ServerError::validation(format!("Parameter '{}' must be an integer", name))
            }),
        }
    }

    pub fn require_i64(&self, name: &str) -> Result<i64, ServerError> {
        self.optional_i64(name)?.ok_or_else(|| missing(name))
    }

    /// Integer parameter clamped into `range`, `default` when absent.
    pub fn clamped_i64(&self, name: &str, default: i64, range: (i64, i64)) -> Result<i64, ServerError> {
        Ok(self.optional_i64(name)?.unwrap_or(default).clamp(range.0, range.1))
    }

    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, ServerError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(ServerError::validation(format!(
                "Parameter '{}' must be a string",
                name
            ))),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str, ServerError> {
        self.optional_str(name)?.ok_or_else(|| missing(name))
    }

    /// The `connection_id` every target tool takes.
    pub fn connection_id(&self) -> Result<i32, ServerError> {
        let id = self.require_i64("connection_id")?;
        i32::try_from(id).map_err(|_| {
            ServerError::validation(format!("connection_id {} is out of range", id))
        })
    }
}

fn missing(name: &str) -> ServerError {
    ServerError::validation(format!("Missing required parameter '{}'", name))
}

/// Integers arrive as numbers, or as digit strings from form-style clients.
pub(crate) fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
