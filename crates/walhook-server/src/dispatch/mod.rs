//! Dispatch engine
//!
//! - [`payload`]: canonical JSON body + HMAC-SHA256 signature
//! - [`engine`]: concurrent fan-out with bounded linear-backoff retries
//! - [`attempt_log`]: append-only audit trail of every delivery try

pub mod attempt_log;
pub mod engine;
pub mod payload;

pub use attempt_log::{AttemptLog, DispatchAttempt, MemoryAttemptLog, PostgresAttemptLog};
pub use engine::{backoff_delay, DispatchEngine, REQUEST_TIMEOUT};
pub use payload::{sign, WebhookPayload, SIGNATURE_HEADER};
