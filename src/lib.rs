//! # DB MCP Server
//!
//! A tool server for fleets of PostgreSQL databases.
//!
//! This crate provides:
//! - **Connection registry**: logical connection ids mapped to live pools,
//!   with startup activation and transparent recovery of dropped pools
//! - **Tools**: catalog introspection, observability reports and capacity
//!   trends, callable by name with a JSON argument bag
//! - **Scheduler**: persistent interval and cron jobs that invoke tools
//! - **Admin surface**: HTTP routes over connections, tools and jobs
//!   (feature `http`)
//!
//! ## Architecture
//!
//! Connection records, job definitions and capacity snapshots live in a
//! metadata PostgreSQL database behind the [`repository`] traits. Target
//! passwords are stored encrypted by the [`vault`]. The [`server`] wires
//! every component explicitly; nothing is global.

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod executor;
#[cfg(feature = "http")]
pub mod handlers;
pub mod repository;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod tools;
pub mod transport;
pub mod vault;

pub use config::Config;
pub use error::ServerError;
pub use server::DbMcpServer;
