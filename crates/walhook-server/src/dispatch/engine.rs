//! Dispatch engine
//!
//! Delivers one change event to its matched webhooks. Deliveries to
//! different webhooks run concurrently and independently; one webhook's
//! retry sequence is strictly sequential. Terminal failures are logged
//! and swallowed so the change stream keeps flowing no matter what the
//! endpoints do.

use super::attempt_log::{AttemptLog, DispatchAttempt};
use super::payload::{sign, WebhookPayload, SIGNATURE_HEADER};
use crate::registry::Hook;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};
use walhook_cdc::ChangeEvent;

/// Hard timeout per delivery attempt.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Response-body prefix kept in failure diagnostics.
const BODY_SNIPPET_LEN: usize = 256;

pub struct DispatchEngine {
    client: reqwest::Client,
    attempt_log: Arc<dyn AttemptLog>,
    max_retries: u32,
    retry_delay: Duration,
}

impl DispatchEngine {
    pub fn new(
        attempt_log: Arc<dyn AttemptLog>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            attempt_log,
            max_retries,
            retry_delay,
        })
    }

    /// Fan an event out to its matched webhooks.
    ///
    /// Spawns one task per webhook and returns immediately; the returned
    /// handles are only awaited by tests. The payload bytes are serialized
    /// once and shared, so every webhook signs and receives the same body.
    pub fn dispatch(&self, event: &ChangeEvent, hooks: Vec<Hook>) -> Vec<JoinHandle<()>> {
        if hooks.is_empty() {
            return Vec::new();
        }

        let body = match WebhookPayload::from_event(event).canonical_bytes() {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(
                    "Could not serialize payload for {}.{}: {}",
                    event.schema, event.table, e
                );
                return Vec::new();
            }
        };

        hooks
            .into_iter()
            .map(|hook| {
                let client = self.client.clone();
                let log = self.attempt_log.clone();
                let body = body.clone();
                let max_retries = self.max_retries;
                let retry_delay = self.retry_delay;
                tokio::spawn(deliver(client, log, hook, body, max_retries, retry_delay))
            })
            .collect()
    }
}

/// Deliver one payload to one webhook, retrying transient failures.
///
/// Transport errors and non-2xx responses are both failures for retry
/// purposes. Attempt N+1 starts only after attempt N's backoff.
async fn deliver(
    client: reqwest::Client,
    log: Arc<dyn AttemptLog>,
    hook: Hook,
    body: Bytes,
    max_retries: u32,
    retry_delay: Duration,
) {
    let signature = sign(&hook.secret, &body);

    for attempt in 1..=max_retries {
        info!("Sending webhook {} [attempt {}]", hook.url, attempt);
        let start = Instant::now();
        let result = client
            .post(&hook.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, &signature)
            .body(body.clone())
            .send()
            .await;
        let elapsed_ms = start.elapsed().as_millis() as i32;

        match result {
            Ok(response) if response.status().is_success() => {
                let status = response.status().as_u16() as i32;
                record(&log, &hook, attempt, Some(status), elapsed_ms, true, None).await;
                info!("Webhook succeeded: {} [attempt {}]", hook.url, attempt);
                return;
            }
            Ok(response) => {
                let status = response.status().as_u16() as i32;
                let snippet = response
                    .text()
                    .await
                    .ok()
                    .filter(|t| !t.is_empty())
                    .map(|t| truncate(&t, BODY_SNIPPET_LEN));
                let message = match snippet {
                    Some(s) => format!("HTTP {}: {}", status, s),
                    None => format!("HTTP {}", status),
                };
                record(
                    &log,
                    &hook,
                    attempt,
                    Some(status),
                    elapsed_ms,
                    false,
                    Some(message),
                )
                .await;
            }
            Err(e) => {
                let status = e.status().map(|s| s.as_u16() as i32);
                record(
                    &log,
                    &hook,
                    attempt,
                    status,
                    elapsed_ms,
                    false,
                    Some(e.to_string()),
                )
                .await;
            }
        }

        if attempt < max_retries {
            let delay = backoff_delay(retry_delay, attempt);
            warn!(
                "Retrying webhook {} in {}ms [attempt {}]",
                hook.url,
                delay.as_millis(),
                attempt
            );
            sleep(delay).await;
        }
    }

    error!(
        "Webhook failed after {} attempts: {}",
        max_retries, hook.url
    );
}

/// Backoff before attempt N+1: the delay grows by one base unit per
/// attempt (base·1, base·2, base·3, …).
pub fn backoff_delay(retry_delay: Duration, attempt: u32) -> Duration {
    retry_delay * attempt
}

async fn record(
    log: &Arc<dyn AttemptLog>,
    hook: &Hook,
    attempt_number: u32,
    status_code: Option<i32>,
    response_time_ms: i32,
    success: bool,
    error: Option<String>,
) {
    let attempt = DispatchAttempt {
        hook_id: hook.id,
        attempt_number: attempt_number as i32,
        status_code,
        response_time_ms,
        success,
        error,
        created_at: Utc::now(),
    };
    // A lost log row must never take the delivery path down with it.
    if let Err(e) = log.record(attempt).await {
        warn!("Failed to record dispatch attempt for hook {}: {}", hook.id, e);
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}
