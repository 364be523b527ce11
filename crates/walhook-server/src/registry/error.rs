//! Registry error taxonomy
//!
//! Validation, conflict, and not-found errors are surfaced to management
//! API callers; database errors propagate unchanged.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// Input rejected (schema not allowed, table not published, bad URL, …)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A registration with the same (schema, table, event, url) exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No registration with the given id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Query failure
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Pool checkout failure
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
}

impl RegistryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
