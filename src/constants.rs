//! Centralized constants for the DB MCP Server.
//!
//! This module contains all magic numbers and default values used throughout
//! the codebase, making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Metadata Database Constants
// =============================================================================

/// Default metadata database host.
pub const DEFAULT_METADATA_HOST: &str = "localhost";

/// Default metadata database port.
pub const DEFAULT_METADATA_PORT: u16 = 5433;

/// Default metadata database name.
pub const DEFAULT_METADATA_DATABASE: &str = "mcp_metadata";

/// Default metadata database user.
pub const DEFAULT_METADATA_USER: &str = "postgres";

/// Default metadata database password.
pub const DEFAULT_METADATA_PASSWORD: &str = "postgres";

/// Maximum connections held by the metadata pool.
pub const DEFAULT_METADATA_MAX_CONNECTIONS: u32 = 5;

// =============================================================================
// Target Pool Constants
// =============================================================================

/// Default minimum connections in a target pool.
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Default maximum connections in a target pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default connection-establish timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default connection-establish timeout as Duration.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS);

/// Prepared statement cache capacity per connection.
pub const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 1024;

/// Liveness probe statement.
pub const PROBE_STATEMENT: &str = "SELECT 1";

// =============================================================================
// Vault Constants
// =============================================================================

/// Salt for deriving the vault key from the configured secret.
pub const VAULT_KEY_SALT: &[u8] = b"mcp_database_server_salt";

/// PBKDF2 iteration count for vault key derivation.
pub const VAULT_KEY_ITERATIONS: u32 = 100_000;

/// AES-GCM nonce length in bytes.
pub const VAULT_NONCE_LEN: usize = 12;

// =============================================================================
// Scheduler Constants
// =============================================================================

/// Prefix of the fire handle registered for each job.
pub const JOB_HANDLE_PREFIX: &str = "job_";

/// Default bounded wait for in-flight fires when the scheduler stops.
pub const DEFAULT_SCHEDULER_STOP_TIMEOUT_SECS: u64 = 30;

/// Default bounded wait for in-flight fires as Duration.
pub const DEFAULT_SCHEDULER_STOP_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_SCHEDULER_STOP_TIMEOUT_SECS);

// =============================================================================
// Tool Constants
// =============================================================================

/// Default row limit for `pg_top_queries_report`.
pub const DEFAULT_TOP_QUERIES_LIMIT: i64 = 10;

/// Default table limit for `pg_bloat_report`.
pub const DEFAULT_BLOAT_REPORT_LIMIT: i64 = 20;

/// Default table count for `pg_capacity_report`.
pub const DEFAULT_CAPACITY_TOP_TABLES: i64 = 20;

/// Default look-back window for capacity trends.
pub const DEFAULT_TREND_DAYS: i64 = 30;

/// Bounds for the capacity trend look-back window.
pub const TREND_DAYS_RANGE: (i64, i64) = (1, 365);

/// Default row limit for table-scope capacity trends.
pub const DEFAULT_TREND_LIMIT: i64 = 10;

/// Bounds for the table-scope capacity trend limit.
pub const TREND_LIMIT_RANGE: (i64, i64) = (1, 100);

/// Server version that introduced `pg_stat_checkpointer`.
pub const PG_CHECKPOINTER_VERSION_NUM: i64 = 170_000;

// =============================================================================
// HTTP Constants
// =============================================================================

/// Default HTTP bind host.
pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8000;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default maximum request body size in bytes.
pub const DEFAULT_MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

// =============================================================================
// Shutdown Constants
// =============================================================================

/// Default shutdown drain timeout in seconds.
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;

/// Default shutdown force timeout in seconds.
pub const DEFAULT_FORCE_TIMEOUT_SECS: u64 = 10;

/// Default shutdown drain timeout as Duration.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS);

/// Default shutdown force timeout as Duration.
pub const DEFAULT_FORCE_TIMEOUT: Duration = Duration::from_secs(DEFAULT_FORCE_TIMEOUT_SECS);

/// Sleep interval while waiting for in-flight work to drain.
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

// =============================================================================
// Logging Constants
// =============================================================================

/// Default truncation length for statement logging.
pub const LOG_QUERY_TRUNCATE_LENGTH: usize = 100;

/// File name prefix for the rotating log file.
pub const LOG_FILE_PREFIX: &str = "dbmcp.log";
