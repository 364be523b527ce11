//! Delivery attempt log
//!
//! Every delivery try is recorded, success or failure. The log is
//! append-only; rows disappear only through the registration's
//! cascade-delete. `AttemptLog` is a trait so tests can capture attempts
//! in memory instead of a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use tokio::sync::Mutex;

/// One delivery try against one webhook.
#[derive(Debug, Clone)]
pub struct DispatchAttempt {
    pub hook_id: i64,
    /// 1-based attempt counter
    pub attempt_number: i32,
    /// HTTP status, when a response arrived at all
    pub status_code: Option<i32>,
    pub response_time_ms: i32,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Sink for delivery attempts.
#[async_trait]
pub trait AttemptLog: Send + Sync {
    async fn record(&self, attempt: DispatchAttempt) -> anyhow::Result<()>;
}

/// Production log writing to `webhook.logs`.
pub struct PostgresAttemptLog {
    pool: Pool,
}

impl PostgresAttemptLog {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttemptLog for PostgresAttemptLog {
    async fn record(&self, attempt: DispatchAttempt) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO webhook.logs
                   (hook_id, attempt_number, status_code, response_time_ms, success, error, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &attempt.hook_id,
                    &attempt.attempt_number,
                    &attempt.status_code,
                    &attempt.response_time_ms,
                    &attempt.success,
                    &attempt.error,
                    &attempt.created_at,
                ],
            )
            .await?;
        Ok(())
    }
}

/// In-memory log for tests.
#[derive(Default)]
pub struct MemoryAttemptLog {
    attempts: Mutex<Vec<DispatchAttempt>>,
}

impl MemoryAttemptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> Vec<DispatchAttempt> {
        self.attempts.lock().await.clone()
    }
}

#[async_trait]
impl AttemptLog for MemoryAttemptLog {
    async fn record(&self, attempt: DispatchAttempt) -> anyhow::Result<()> {
        self.attempts.lock().await.push(attempt);
        Ok(())
    }
}
