//! DDL for the metadata database.
//!
//! Every statement is idempotent so the schema can be applied on each
//! start when auto-migrate is enabled.

/// Full metadata schema, executed as a single multi-statement batch.
pub const METADATA_SCHEMA: &str = r#"
CREATE SCHEMA IF NOT EXISTS repository;
CREATE SCHEMA IF NOT EXISTS scheduler;
CREATE SCHEMA IF NOT EXISTS trends;

CREATE TABLE IF NOT EXISTS repository.database_types (
    id   SERIAL PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS repository.database_connections (
    id                 SERIAL PRIMARY KEY,
    database_type_id   INT NOT NULL REFERENCES repository.database_types(id) ON DELETE CASCADE,
    host               TEXT NOT NULL,
    port               INT NOT NULL,
    database_name      TEXT NOT NULL,
    username           TEXT NOT NULL,
    encrypted_password TEXT NOT NULL,
    is_active          BOOLEAN NOT NULL DEFAULT TRUE,
    description        TEXT,
    connect_at_startup BOOLEAN NOT NULL DEFAULT TRUE,
    UNIQUE (database_type_id, host, port, database_name)
);

CREATE TABLE IF NOT EXISTS scheduler.scheduled_jobs (
    job_id           SERIAL PRIMARY KEY,
    job_name         TEXT NOT NULL UNIQUE,
    tool_name        TEXT NOT NULL,
    tool_params      JSONB,
    trigger_type     TEXT NOT NULL CHECK (trigger_type IN ('interval', 'cron')),
    interval_seconds INTEGER,
    cron_expression  TEXT,
    is_active        BOOLEAN NOT NULL DEFAULT TRUE,
    last_run_at      TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS trends.pg_capacity_snapshots (
    snapshot_ts TIMESTAMPTZ NOT NULL DEFAULT now(),
    scope       TEXT        NOT NULL,
    dbname      TEXT        NOT NULL,
    schemaname  TEXT,
    relname     TEXT,
    size_bytes  BIGINT      NOT NULL
);

CREATE INDEX IF NOT EXISTS ix_pg_capacity_snapshots_ts
    ON trends.pg_capacity_snapshots (snapshot_ts);

CREATE INDEX IF NOT EXISTS ix_pg_capacity_snapshots_scope
    ON trends.pg_capacity_snapshots (scope, dbname);
"#;
