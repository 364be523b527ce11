//! Webhook registration records
//!
//! # Security Note
//!
//! `Hook` carries the per-registration HMAC secret. Its `Debug` impl
//! redacts it; never log a hook with `{:?}` removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::Row;

/// Event names a registration may subscribe to.
pub const EVENT_NAMES: [&str; 3] = ["INSERT", "UPDATE", "DELETE"];

/// One webhook registration, as stored in `webhook.hooks`.
#[derive(Clone, Serialize)]
pub struct Hook {
    pub id: i64,
    pub schema_name: String,
    pub table_name: String,
    pub event_name: String,
    pub url: String,
    pub secret: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("schema_name", &self.schema_name)
            .field("table_name", &self.table_name)
            .field("event_name", &self.event_name)
            .field("url", &self.url)
            .field("secret", &"redacted")
            .field("active", &self.active)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Hook {
    pub fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            schema_name: row.get("schema_name"),
            table_name: row.get("table_name"),
            event_name: row.get("event_name"),
            url: row.get("url"),
            secret: row.get("secret"),
            active: row.get("active"),
            created_at: row.get("created_at"),
        }
    }
}

/// Create request body.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHook {
    #[serde(default = "default_schema")]
    pub schema_name: String,
    pub table_name: String,
    pub event_name: String,
    pub url: String,
    pub secret: String,
}

fn default_schema() -> String {
    "public".to_string()
}

/// Partial update request body; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookUpdate {
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
    pub event_name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<String>,
    pub active: Option<bool>,
}

impl HookUpdate {
    pub fn is_empty(&self) -> bool {
        self.schema_name.is_none()
            && self.table_name.is_none()
            && self.event_name.is_none()
            && self.url.is_none()
            && self.secret.is_none()
            && self.active.is_none()
    }
}

/// Listing filter (query string of `GET /webhooks`).
#[derive(Debug, Clone, Deserialize)]
pub struct HookFilter {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub schema_name: Option<String>,
    pub table_name: Option<String>,
}

fn default_limit() -> i64 {
    10
}

impl Default for HookFilter {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            offset: 0,
            schema_name: None,
            table_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_hook_defaults_schema() {
        let new: NewHook = serde_json::from_value(serde_json::json!({
            "tableName": "orders",
            "eventName": "INSERT",
            "url": "https://example.test/hook",
            "secret": "s3cr3t"
        }))
        .unwrap();
        assert_eq!(new.schema_name, "public");
    }

    #[test]
    fn test_hook_debug_redacts_secret() {
        let hook = Hook {
            id: 1,
            schema_name: "public".into(),
            table_name: "orders".into(),
            event_name: "INSERT".into(),
            url: "https://example.test/hook".into(),
            secret: "s3cr3t".into(),
            active: true,
            created_at: Utc::now(),
        };
        let out = format!("{:?}", hook);
        assert!(!out.contains("s3cr3t"), "secret leaked: {}", out);
    }

    #[test]
    fn test_update_is_empty() {
        assert!(HookUpdate::default().is_empty());
        let update = HookUpdate {
            active: Some(false),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_filter_defaults() {
        let filter: HookFilter = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(filter.limit, 10);
        assert_eq!(filter.offset, 0);
        assert!(filter.schema_name.is_none());
    }
}
