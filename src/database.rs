//! Target database connectivity and query execution.

mod connection;
mod query;
mod registry;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use connection::{
    bind_params, ConnectTarget, Connector, DatabaseKind, NativeConnector, PgTargetPool,
    PoolStatus, TargetPool,
};
pub use query::{truncate_for_log, ColumnInfo, QueryResult, ResultRow, StatementKind};
pub use registry::{ConnectionRegistry, PoolInfo, PooledConnection};
pub use types::{SqlValue, TypeMapper};
