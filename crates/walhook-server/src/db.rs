//! Connection pool and schema bootstrap
//!
//! One deadpool-postgres pool is shared by the registry, the dispatch
//! engine's attempt logging, and the reconciliation job. All writes are
//! append-only inserts or idempotent DDL, so no extra locking is layered
//! on top.

use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

/// Registry and attempt-log tables. `ON DELETE CASCADE` ties a hook's
/// delivery history to the hook itself.
const SCHEMA_DDL: &str = r#"
CREATE SCHEMA IF NOT EXISTS webhook;

CREATE TABLE IF NOT EXISTS webhook.hooks (
    id          BIGSERIAL PRIMARY KEY,
    schema_name TEXT NOT NULL DEFAULT 'public',
    table_name  TEXT NOT NULL,
    event_name  TEXT NOT NULL CHECK (event_name IN ('INSERT', 'UPDATE', 'DELETE')),
    url         TEXT NOT NULL,
    secret      TEXT NOT NULL,
    active      BOOLEAN NOT NULL DEFAULT true,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS hooks_identity_idx
    ON webhook.hooks (schema_name, table_name, event_name, url);

CREATE TABLE IF NOT EXISTS webhook.logs (
    id               BIGSERIAL PRIMARY KEY,
    hook_id          BIGINT NOT NULL REFERENCES webhook.hooks(id) ON DELETE CASCADE,
    attempt_number   INT NOT NULL,
    status_code      INT,
    response_time_ms INT NOT NULL,
    success          BOOLEAN NOT NULL,
    error            TEXT,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

/// Build the shared connection pool. Connections are opened lazily.
pub fn create_pool(database_url: &str) -> Result<Pool> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .context("DATABASE_URL could not be parsed as a PostgreSQL config")?;

    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(16)
        .build()
        .context("Failed to build connection pool")
}

/// Create the webhook registry tables if they do not exist.
pub async fn ensure_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("Pool checkout failed")?;
    client
        .batch_execute(SCHEMA_DDL)
        .await
        .context("Registry schema bootstrap failed")?;
    Ok(())
}

/// Readiness probe: one round-trip through the pool.
pub async fn ping(pool: &Pool) -> Result<()> {
    let client = pool.get().await.context("Pool checkout failed")?;
    client.simple_query("SELECT 1").await.context("Ping failed")?;
    Ok(())
}
