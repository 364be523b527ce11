//! Service configuration
//!
//! Everything walhookd needs is supplied through environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DATABASE_URL` | required | PostgreSQL connection string |
//! | `SLOT_NAME` | required | logical replication slot |
//! | `PUBLICATION_PREFIX` | required | publications are named `<prefix>_<schema>` |
//! | `SCHEMA_NAMES` | `public` | comma-separated schema allow-list |
//! | `WEBHOOKS_API_KEY` | required | static key guarding the management API |
//! | `WEBHOOK_MAX_RETRIES` | `3` | delivery attempts per webhook |
//! | `WEBHOOK_RETRY_DELAY` | `2000` | backoff base in milliseconds |
//! | `PORT` | `3000` | management API port |
//! | `RECONCILE_INTERVAL_SECS` | `300` | publication/identity reconciliation period |

use anyhow::{anyhow, bail, Context, Result};
use url::Url;
use walhook_cdc::validate_identifier;

/// Runtime settings, validated at startup.
#[derive(Clone)]
pub struct Settings {
    pub database_url: String,
    pub slot_name: String,
    pub publication_prefix: String,
    pub schema_names: Vec<String>,
    pub api_key: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub port: u16,
    pub reconcile_interval_secs: u64,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field(
                "database_url",
                &walhook_cdc::config::redact_connection_string(&self.database_url),
            )
            .field("slot_name", &self.slot_name)
            .field("publication_prefix", &self.publication_prefix)
            .field("schema_names", &self.schema_names)
            .field("api_key", &"redacted")
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("port", &self.port)
            .field("reconcile_interval_secs", &self.reconcile_interval_secs)
            .finish()
    }
}

impl Settings {
    /// Load and validate settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| anyhow!("{} is required", key))
        };

        let settings = Self {
            database_url: required("DATABASE_URL")?,
            slot_name: required("SLOT_NAME")?,
            publication_prefix: required("PUBLICATION_PREFIX")?,
            schema_names: lookup("SCHEMA_NAMES")
                .filter(|v| !v.is_empty())
                .map(|csv| csv.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["public".to_string()]),
            api_key: required("WEBHOOKS_API_KEY")?,
            max_retries: parse_or(&lookup, "WEBHOOK_MAX_RETRIES", 3)?,
            retry_delay_ms: parse_or(&lookup, "WEBHOOK_RETRY_DELAY", 2000)?,
            port: parse_or(&lookup, "PORT", 3000)?,
            reconcile_interval_secs: parse_or(&lookup, "RECONCILE_INTERVAL_SECS", 300)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.database_url).context("DATABASE_URL is not a valid URL")?;
        validate_identifier(&self.slot_name).context("SLOT_NAME")?;
        validate_identifier(&self.publication_prefix).context("PUBLICATION_PREFIX")?;
        for schema in &self.schema_names {
            validate_identifier(schema).context("SCHEMA_NAMES")?;
            // the derived publication name must also fit the identifier grammar
            validate_identifier(&self.publication_name(schema))
                .context("PUBLICATION_PREFIX + schema exceeds identifier limits")?;
        }
        if self.max_retries == 0 {
            bail!("WEBHOOK_MAX_RETRIES must be at least 1");
        }
        Ok(())
    }

    /// Publication name for a schema: `<prefix>_<schema>`.
    pub fn publication_name(&self, schema: &str) -> String {
        format!("{}_{}", self.publication_prefix, schema)
    }

    /// Publication names for every configured schema, in order.
    pub fn publication_names(&self) -> Vec<String> {
        self.schema_names
            .iter()
            .map(|s| self.publication_name(s))
            .collect()
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map_err(|e| anyhow!("{} is invalid: {}", key, e)),
        _ => Ok(default),
    }
}
