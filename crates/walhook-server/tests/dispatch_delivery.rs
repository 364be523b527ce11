//! Dispatch engine delivery tests
//!
//! Webhook endpoints are doubled with wiremock; attempts are captured with
//! the in-memory log. These tests pin the delivery contract: payload
//! bytes, signature, retry count, backoff schedule, and failure isolation.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use walhook_cdc::{ChangeEvent, ChangeOp};
use walhook_server::dispatch::{
    sign, DispatchEngine, MemoryAttemptLog, REQUEST_TIMEOUT, SIGNATURE_HEADER,
};
use walhook_server::registry::Hook;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn hook(id: i64, url: String, secret: &str) -> Hook {
    Hook {
        id,
        schema_name: "public".into(),
        table_name: "orders".into(),
        event_name: "INSERT".into(),
        url,
        secret: secret.into(),
        active: true,
        created_at: Utc::now(),
    }
}

fn insert_event() -> ChangeEvent {
    ChangeEvent {
        op: ChangeOp::Insert,
        schema: "public".into(),
        table: "orders".into(),
        new_row: Some(json!({"id": 1, "total": 9.99})),
        old_row: None,
        key: None,
        lsn: 0x1_0000_0000,
    }
}

fn engine(log: Arc<MemoryAttemptLog>, max_retries: u32, retry_delay_ms: u64) -> DispatchEngine {
    DispatchEngine::new(log, max_retries, Duration::from_millis(retry_delay_ms)).unwrap()
}

async fn dispatch_and_wait(engine: &DispatchEngine, event: &ChangeEvent, hooks: Vec<Hook>) {
    for handle in engine.dispatch(event, hooks) {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_end_to_end_payload_and_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 3, 2000);
    let hooks = vec![hook(1, format!("{}/hook", server.uri()), "s3cr3t")];

    dispatch_and_wait(&engine, &insert_event(), hooks).await;

    let attempts = log.snapshot().await;
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].attempt_number, 1);
    assert_eq!(attempts[0].status_code, Some(200));
    assert!(attempts[0].error.is_none());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let expected_body = r#"{"event":"INSERT","schema":"public","table":"orders","new":{"id":1,"total":9.99},"old":null,"key":null}"#;
    assert_eq!(requests[0].body, expected_body.as_bytes());
    assert_eq!(
        requests[0].headers.get("content-type").unwrap(),
        "application/json"
    );

    // receiver-side verification: HMAC over the exact received bytes
    let received_sig = requests[0]
        .headers
        .get(SIGNATURE_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(received_sig, sign("s3cr3t", &requests[0].body));
}

#[tokio::test]
async fn test_permanent_failure_produces_exactly_max_retries_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 3, 20);
    let hooks = vec![hook(1, server.uri(), "s3cr3t")];

    let start = Instant::now();
    dispatch_and_wait(&engine, &insert_event(), hooks).await;
    let elapsed = start.elapsed();

    let attempts = log.snapshot().await;
    assert_eq!(attempts.len(), 3, "exactly max_retries attempts, no more");
    assert_eq!(
        attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(attempts.iter().all(|a| !a.success));
    assert!(attempts.iter().all(|a| a.status_code == Some(500)));

    // linear backoff: base*1 + base*2 between the three attempts
    assert!(
        elapsed >= Duration::from_millis(60),
        "expected at least 20ms + 40ms of backoff, got {:?}",
        elapsed
    );

    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_success_after_transient_failure_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 3, 10);
    let hooks = vec![hook(1, server.uri(), "s3cr3t")];

    dispatch_and_wait(&engine, &insert_event(), hooks).await;

    let attempts = log.snapshot().await;
    assert_eq!(attempts.len(), 2);
    assert!(!attempts[0].success);
    assert!(attempts[1].success);
    assert_eq!(attempts[1].attempt_number, 2);
}

#[tokio::test]
async fn test_non_2xx_counts_as_failure_for_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such route"))
        .mount(&server)
        .await;

    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 2, 10);
    let hooks = vec![hook(1, server.uri(), "s3cr3t")];

    dispatch_and_wait(&engine, &insert_event(), hooks).await;

    let attempts = log.snapshot().await;
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.status_code == Some(404)));
    assert!(attempts[0]
        .error
        .as_deref()
        .unwrap()
        .contains("no such route"));
}

#[tokio::test]
async fn test_transport_error_records_attempt_without_status() {
    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 2, 10);
    // nothing listens on port 9; connection is refused
    let hooks = vec![hook(1, "http://127.0.0.1:9/hook".to_string(), "s3cr3t")];

    dispatch_and_wait(&engine, &insert_event(), hooks).await;

    let attempts = log.snapshot().await;
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| !a.success));
    assert!(attempts.iter().all(|a| a.status_code.is_none()));
    assert!(attempts.iter().all(|a| a.error.is_some()));
}

#[tokio::test]
async fn test_failing_webhook_does_not_affect_sibling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 3, 10);
    let hooks = vec![
        hook(1, format!("{}/ok", server.uri()), "alpha"),
        hook(2, format!("{}/broken", server.uri()), "beta"),
    ];

    dispatch_and_wait(&engine, &insert_event(), hooks).await;

    let attempts = log.snapshot().await;
    let ok: Vec<_> = attempts.iter().filter(|a| a.hook_id == 1).collect();
    let broken: Vec<_> = attempts.iter().filter(|a| a.hook_id == 2).collect();

    assert_eq!(ok.len(), 1);
    assert!(ok[0].success);
    assert_eq!(broken.len(), 3);
    assert!(broken.iter().all(|a| !a.success));
}

#[tokio::test]
async fn test_zero_matches_spawns_nothing() {
    let log = Arc::new(MemoryAttemptLog::new());
    let engine = engine(log.clone(), 3, 10);
    let handles = engine.dispatch(&insert_event(), Vec::new());
    assert!(handles.is_empty());
    assert!(log.snapshot().await.is_empty());
}

#[test]
fn test_request_timeout_is_five_seconds() {
    assert_eq!(REQUEST_TIMEOUT, Duration::from_millis(5000));
}
