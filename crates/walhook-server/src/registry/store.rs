//! Webhook registry store
//!
//! Sole writer of `webhook.hooks`. Create/update validate against the
//! schema allow-list and against publication membership, so the dispatch
//! pipeline only ever sees registrations the replication stream can
//! actually serve.

use super::error::{RegistryError, Result};
use super::model::{Hook, HookFilter, HookUpdate, NewHook, EVENT_NAMES};
use deadpool_postgres::Pool;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use url::Url;
use walhook_cdc::validate_identifier;

/// Page size cap for listings.
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Clone)]
pub struct HookStore {
    pool: Pool,
    allowed_schemas: Arc<Vec<String>>,
    publication_prefix: Arc<String>,
}

impl HookStore {
    pub fn new(pool: Pool, allowed_schemas: Vec<String>, publication_prefix: String) -> Self {
        Self {
            pool,
            allowed_schemas: Arc::new(allowed_schemas),
            publication_prefix: Arc::new(publication_prefix),
        }
    }

    /// Register a webhook.
    pub async fn create(&self, new: &NewHook) -> Result<Hook> {
        self.validate_fields(&new.schema_name, &new.table_name, &new.event_name, &new.url)?;
        if new.secret.is_empty() {
            return Err(RegistryError::validation("secret must not be empty"));
        }
        self.ensure_published(&new.schema_name, &new.table_name)
            .await?;

        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "INSERT INTO webhook.hooks (schema_name, table_name, event_name, url, secret)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING *",
                &[
                    &new.schema_name,
                    &new.table_name,
                    &new.event_name,
                    &new.url,
                    &new.secret,
                ],
            )
            .await
            .map_err(|e| Self::map_unique_violation(e, new))?;

        Ok(Hook::from_row(&row))
    }

    /// List registrations, newest first.
    pub async fn list(&self, filter: &HookFilter) -> Result<Vec<Hook>> {
        let limit = filter.limit.clamp(0, MAX_PAGE_SIZE);
        let offset = filter.offset.max(0);

        let mut sql = String::from("SELECT * FROM webhook.hooks");
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();

        if let Some(ref schema) = filter.schema_name {
            params.push(schema);
            clauses.push(format!("schema_name = ${}", params.len()));
        }
        if let Some(ref table) = filter.table_name {
            params.push(table);
            clauses.push(format!("table_name = ${}", params.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }

        params.push(&limit);
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));

        let client = self.pool.get().await?;
        let rows = client.query(sql.as_str(), &params).await?;
        Ok(rows.iter().map(Hook::from_row).collect())
    }

    /// Fetch one registration by id.
    pub async fn get(&self, id: i64) -> Result<Hook> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT * FROM webhook.hooks WHERE id = $1", &[&id])
            .await?;
        row.map(|r| Hook::from_row(&r))
            .ok_or_else(|| RegistryError::not_found(format!("Webhook {} not found", id)))
    }

    /// Partially update a registration. Changed identity fields are
    /// re-validated exactly like a create.
    pub async fn update(&self, id: i64, update: &HookUpdate) -> Result<Hook> {
        let current = self.get(id).await?;
        if update.is_empty() {
            return Ok(current);
        }

        let schema_name = update.schema_name.as_ref().unwrap_or(&current.schema_name);
        let table_name = update.table_name.as_ref().unwrap_or(&current.table_name);
        let event_name = update.event_name.as_ref().unwrap_or(&current.event_name);
        let url = update.url.as_ref().unwrap_or(&current.url);
        let secret = update.secret.as_ref().unwrap_or(&current.secret);
        let active = update.active.unwrap_or(current.active);

        self.validate_fields(schema_name, table_name, event_name, url)?;
        if secret.is_empty() {
            return Err(RegistryError::validation("secret must not be empty"));
        }
        if *schema_name != current.schema_name || *table_name != current.table_name {
            self.ensure_published(schema_name, table_name).await?;
        }

        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "UPDATE webhook.hooks
                 SET schema_name = $1, table_name = $2, event_name = $3,
                     url = $4, secret = $5, active = $6
                 WHERE id = $7
                 RETURNING *",
                &[schema_name, table_name, event_name, url, secret, &active, &id],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RegistryError::conflict(format!(
                        "A webhook for {}.{} {} -> {} already exists",
                        schema_name, table_name, event_name, url
                    ))
                } else {
                    RegistryError::from(e)
                }
            })?;

        row.map(|r| Hook::from_row(&r))
            .ok_or_else(|| RegistryError::not_found(format!("Webhook {} not found", id)))
    }

    /// Delete a registration; its attempt log rows cascade.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM webhook.hooks WHERE id = $1", &[&id])
            .await?;
        if deleted == 0 {
            return Err(RegistryError::not_found(format!(
                "Webhook {} not found",
                id
            )));
        }
        Ok(())
    }

    /// Active registrations matching a change event's identity.
    pub async fn find_matching(
        &self,
        schema: &str,
        table: &str,
        event_name: &str,
    ) -> Result<Vec<Hook>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT * FROM webhook.hooks
                 WHERE schema_name = $1 AND table_name = $2 AND event_name = $3 AND active",
                &[&schema, &table, &event_name],
            )
            .await?;
        Ok(rows.iter().map(Hook::from_row).collect())
    }

    fn validate_fields(
        &self,
        schema_name: &str,
        table_name: &str,
        event_name: &str,
        url: &str,
    ) -> Result<()> {
        validate_identifier(schema_name)
            .map_err(|e| RegistryError::validation(e.to_string()))?;
        validate_identifier(table_name).map_err(|e| RegistryError::validation(e.to_string()))?;

        if !self.allowed_schemas.iter().any(|s| s == schema_name) {
            return Err(RegistryError::validation(format!(
                "Schema \"{}\" is not tracked; allowed schemas: {}",
                schema_name,
                self.allowed_schemas.join(", ")
            )));
        }

        if !EVENT_NAMES.contains(&event_name) {
            return Err(RegistryError::validation(format!(
                "eventName must be one of {}",
                EVENT_NAMES.join(", ")
            )));
        }

        let parsed = Url::parse(url)
            .map_err(|e| RegistryError::validation(format!("Invalid url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RegistryError::validation(
                "url must use http or https".to_string(),
            ));
        }

        Ok(())
    }

    /// A registration is only accepted once its table is part of the
    /// schema's publication; until the reconciliation job has picked the
    /// table up, the stream cannot deliver its changes.
    async fn ensure_published(&self, schema_name: &str, table_name: &str) -> Result<()> {
        let publication = format!("{}_{}", self.publication_prefix, schema_name);
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM pg_publication_tables
                 WHERE pubname = $1 AND schemaname = $2 AND tablename = $3",
                &[&publication, &schema_name, &table_name],
            )
            .await?;

        if row.is_none() {
            return Err(RegistryError::validation(format!(
                "Table {}.{} is not part of publication {}; \
                 check that the table exists and reconciliation has run",
                schema_name, table_name, publication
            )));
        }
        Ok(())
    }

    fn map_unique_violation(e: tokio_postgres::Error, new: &NewHook) -> RegistryError {
        if is_unique_violation(&e) {
            RegistryError::conflict(format!(
                "A webhook for {}.{} {} -> {} already exists",
                new.schema_name, new.table_name, new.event_name, new.url
            ))
        } else {
            RegistryError::from(e)
        }
    }
}

fn is_unique_violation(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNIQUE_VIOLATION)
}
