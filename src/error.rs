//! Error types for the DB MCP Server.
//!
//! Errors are grouped by how callers must react to them: connectivity
//! failures are retried once through a full reconnect, everything else
//! propagates. Each variant also maps to an [`ErrorKind`] so the admin
//! surface can pick a status code without inspecting messages.

use serde::Serialize;
use thiserror::Error;

/// Domain-specific errors for the DB MCP Server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed trigger, unknown database kind, missing required setting.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport reset, pool invalidated, target unreachable.
    #[error("Connectivity error: {message}")]
    Connectivity {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Stored credential could not be decrypted (or encrypted).
    #[error("Credential error: {0}")]
    Credential(String),

    /// Syntax, constraint or permission failure reported by the database.
    #[error("{message}")]
    QuerySemantic {
        message: String,
        sql_state: Option<String>,
    },

    /// Unknown identifier.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Caller supplied invalid input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Metadata repository failure that is not a connectivity problem.
    #[error("Repository error: {0}")]
    Repository(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error category used by the administrative surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The addressed record or tool does not exist.
    NotFound,
    /// The request was malformed or violated a rule.
    Validation,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a connectivity error.
    pub fn connectivity(msg: impl Into<String>) -> Self {
        Self::Connectivity {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connectivity error with a source.
    pub fn connectivity_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connectivity {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a credential error.
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a query error without SQLSTATE.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::QuerySemantic {
            message: msg.into(),
            sql_state: None,
        }
    }

    /// Create a not-found error.
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a repository error.
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure means the transport or session is unusable.
    ///
    /// Only these errors qualify for the single reconnect-and-retry.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }

    /// Classify an error reported by the database server.
    ///
    /// Class `08` and `57P01`..`57P03` mean the session is gone, so they
    /// are connectivity failures; every other code is a query failure.
    pub fn from_database(message: &str, sql_state: Option<&str>) -> Self {
        match sql_state {
            Some(code) if is_session_lost(code) => {
                ServerError::connectivity(format!("{} (SQLSTATE {})", message, code))
            }
            _ => ServerError::QuerySemantic {
                message: message.to_string(),
                sql_state: sql_state.map(str::to_string),
            },
        }
    }

    /// Category used to choose a response status.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Validation(_) | Self::Configuration(_) | Self::QuerySemantic { .. } => {
                ErrorKind::Validation
            }
            Self::Connectivity { .. }
            | Self::Credential(_)
            | Self::Repository(_)
            | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// SQLSTATE reported by the database, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::QuerySemantic { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Configuration(_) => Some("Check the job trigger or connection type definition"),
            Self::Connectivity { .. } => {
                Some("Check the target host, port and network connectivity")
            }
            Self::Credential(_) => {
                Some("Re-enter the connection password; the encryption key may have changed")
            }
            Self::QuerySemantic { sql_state, .. } => match sql_state.as_deref() {
                Some("42501") => Some("Request the required privileges on the target database"),
                Some("42P01") => Some("Check the schema and table name"),
                Some(code) if code.starts_with("23") => {
                    Some("Check the constraint definition and your data values")
                }
                _ => None,
            },
            _ => None,
        }
    }
}

fn is_session_lost(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

impl From<sqlx::Error> for ServerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db_err) => {
                ServerError::from_database(db_err.message(), db_err.code().as_deref())
            }
            sqlx::Error::RowNotFound => ServerError::not_found("Row", "query"),
            sqlx::Error::Io(io) => ServerError::connectivity_with_source("I/O failure", io),
            sqlx::Error::Tls(tls) => {
                ServerError::connectivity(format!("TLS failure: {}", tls))
            }
            sqlx::Error::Protocol(msg) => {
                ServerError::connectivity(format!("Protocol error: {}", msg))
            }
            sqlx::Error::PoolTimedOut => {
                ServerError::connectivity("Timed out waiting for a pooled connection")
            }
            sqlx::Error::PoolClosed => ServerError::connectivity("Connection pool is closed"),
            sqlx::Error::WorkerCrashed => {
                ServerError::connectivity("Connection worker crashed")
            }
            sqlx::Error::Configuration(cfg) => ServerError::config(cfg.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                ServerError::query(format!("Could not decode column {}: {}", index, source))
            }
            other => ServerError::internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        ServerError::validation(format!("Invalid JSON: {}", e))
    }
}
