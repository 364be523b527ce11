//! Replication reconciliation
//!
//! Keeps the database-side replication configuration in line with the
//! configured schema set:
//!
//! 1. every base table in a tracked schema gets replica identity FULL
//!    (UPDATE/DELETE decoding needs the full prior row image, since a
//!    table may have no primary key at all),
//! 2. the logical slot exists,
//! 3. publication `<prefix>_<schema>` exists and covers every base table
//!    in its schema.
//!
//! Everything here is an idempotent upsert; the job runs at startup and
//! then on a fixed interval. The matcher and dispatch engine assume it
//! has run: a registration for an unpublished table is rejected by the
//! registry instead of silently accepted.

use crate::config::Settings;
use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use walhook_cdc::validate_identifier;

pub struct Reconciler {
    pool: Pool,
    slot_name: String,
    publication_prefix: String,
    schema_names: Vec<String>,
}

impl Reconciler {
    pub fn new(pool: Pool, settings: &Settings) -> Self {
        Self {
            pool,
            slot_name: settings.slot_name.clone(),
            publication_prefix: settings.publication_prefix.clone(),
            schema_names: settings.schema_names.clone(),
        }
    }

    /// One full reconciliation pass.
    pub async fn run_once(&self) -> Result<()> {
        self.ensure_replica_identity_full().await?;
        self.ensure_slot().await?;
        self.ensure_publications().await?;
        Ok(())
    }

    /// Reconcile forever on a fixed period. Failures are logged and the
    /// next tick tries again.
    pub async fn run_interval(self, period: Duration) {
        let mut ticker = interval(period);
        // the startup pass already ran; skip the immediate first tick
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                error!("Reconciliation pass failed: {:#}", e);
            }
        }
    }

    /// `ALTER TABLE … REPLICA IDENTITY FULL` for every base table in every
    /// tracked schema.
    async fn ensure_replica_identity_full(&self) -> Result<()> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT table_schema, table_name
                 FROM information_schema.tables
                 WHERE table_schema = ANY($1) AND table_type = 'BASE TABLE'",
                &[&self.schema_names],
            )
            .await
            .context("Listing base tables failed")?;

        for row in rows {
            let schema: String = row.get("table_schema");
            let table: String = row.get("table_name");
            if validate_identifier(&table).is_err() {
                warn!("Skipping table with unusual name: {}.{:?}", schema, table);
                continue;
            }
            client
                .execute(
                    format!("ALTER TABLE {}.{} REPLICA IDENTITY FULL", schema, table).as_str(),
                    &[],
                )
                .await
                .with_context(|| format!("REPLICA IDENTITY FULL on {}.{}", schema, table))?;
        }
        Ok(())
    }

    /// Create the logical slot if it does not exist.
    async fn ensure_slot(&self) -> Result<()> {
        let client = self.pool.get().await?;
        let existing = client
            .query_opt(
                "SELECT slot_name FROM pg_replication_slots WHERE slot_name = $1",
                &[&self.slot_name],
            )
            .await?;

        if existing.is_none() {
            client
                .query(
                    "SELECT * FROM pg_create_logical_replication_slot($1, 'pgoutput')",
                    &[&self.slot_name],
                )
                .await
                .with_context(|| format!("Creating slot {}", self.slot_name))?;
            info!("Created logical replication slot \"{}\"", self.slot_name);
        } else {
            debug!("Logical replication slot \"{}\" already exists", self.slot_name);
        }
        Ok(())
    }

    /// Ensure `<prefix>_<schema>` exists per schema and covers all of the
    /// schema's base tables.
    async fn ensure_publications(&self) -> Result<()> {
        let client = self.pool.get().await?;

        for schema in &self.schema_names {
            let publication = format!("{}_{}", self.publication_prefix, schema);
            validate_identifier(&publication)?;

            let tables = client
                .query(
                    "SELECT table_name
                     FROM information_schema.tables
                     WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
                    &[schema],
                )
                .await?;
            let table_names: Vec<String> = tables
                .iter()
                .map(|r| r.get::<_, String>("table_name"))
                .filter(|t| {
                    let ok = validate_identifier(t).is_ok();
                    if !ok {
                        warn!("Skipping table with unusual name: {}.{:?}", schema, t);
                    }
                    ok
                })
                .map(|t| format!("{}.{}", schema, t))
                .collect();

            let pub_exists = client
                .query_opt(
                    "SELECT pubname FROM pg_publication WHERE pubname = $1",
                    &[&publication],
                )
                .await?
                .is_some();

            if table_names.is_empty() {
                if !pub_exists {
                    client
                        .execute(
                            format!(
                                "CREATE PUBLICATION {} WITH (publish = 'insert, update, delete')",
                                publication
                            )
                            .as_str(),
                            &[],
                        )
                        .await?;
                }
                debug!(
                    "No tables in schema \"{}\"; empty publication {} ensured",
                    schema, publication
                );
                continue;
            }

            if !pub_exists {
                client
                    .execute(
                        format!(
                            "CREATE PUBLICATION {} FOR TABLE {} WITH (publish = 'insert, update, delete')",
                            publication,
                            table_names.join(", ")
                        )
                        .as_str(),
                        &[],
                    )
                    .await
                    .with_context(|| format!("Creating publication {}", publication))?;
                info!(
                    "Publication {} created for schema \"{}\" ({} tables)",
                    publication,
                    schema,
                    table_names.len()
                );
                continue;
            }

            // publication exists: add whatever tables it is missing
            let existing = client
                .query(
                    "SELECT schemaname, tablename FROM pg_publication_tables WHERE pubname = $1",
                    &[&publication],
                )
                .await?;
            let existing: HashSet<String> = existing
                .iter()
                .map(|r| {
                    format!(
                        "{}.{}",
                        r.get::<_, String>("schemaname"),
                        r.get::<_, String>("tablename")
                    )
                })
                .collect();

            let to_add: Vec<&String> = table_names
                .iter()
                .filter(|t| !existing.contains(*t))
                .collect();

            if to_add.is_empty() {
                debug!(
                    "Publication {} already covers all tables in schema \"{}\"",
                    publication, schema
                );
                continue;
            }

            let add_list = to_add
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            client
                .execute(
                    format!("ALTER PUBLICATION {} ADD TABLE {}", publication, add_list).as_str(),
                    &[],
                )
                .await
                .with_context(|| format!("Extending publication {}", publication))?;
            info!(
                "Publication {} updated (added {} tables)",
                publication,
                to_add.len()
            );
        }

        Ok(())
    }
}
