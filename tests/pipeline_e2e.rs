// tests/pipeline_e2e.rs
//
// Pipeline-level scenarios against in-process collaborators:
// - happy path (`abc123` / "Buy AAPL")
// - 401 / 400 rejections leave no side effects
// - fetch errors map to 404 / 502 without a record
// - store writes are retried, exhaustion is a 500
// - a crashing classifier still yields an UNKNOWN record

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use shuttle_axum::axum::http::StatusCode;

use common::*;
use trade_alert_ingest::classify::{Category, Classification, Classifier};
use trade_alert_ingest::error::FetchError;
use trade_alert_ingest::gmail::RawMessage;
use trade_alert_ingest::store::{AlertStore, MemoryKv};
use trade_alert_ingest::{InboundRequest, IngestionPipeline};

fn request(auth: Option<String>, inner: serde_json::Value) -> InboundRequest {
    InboundRequest {
        authorization: auth,
        audience: AUDIENCE.to_string(),
        body: push_body(inner),
    }
}

fn bearer() -> Option<String> {
    Some(format!("Bearer {}", valid_token()))
}

#[tokio::test]
async fn buy_alert_is_stored_once_and_acknowledged() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = Arc::new(MemoryKv::new());
    let p = pipeline(fetcher.clone(), kv.clone());

    let resp = p
        .handle(request(bearer(), json!({"messageId": "abc123", "historyId": "9876"})))
        .await;

    assert_eq!(resp.status, StatusCode::OK, "body: {}", resp.body);
    assert_eq!(resp.body["message"], "Email processed successfully");
    let alert_id = resp.alert_id().expect("uuid alert_id");

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(kv.len(TABLE), 1);
    let rec = p.store().get("abc123").await.unwrap().expect("record");
    assert_eq!(rec.id, alert_id);
    assert_eq!(rec.category, Category::Buy);
    assert_eq!(rec.ticker.as_deref(), Some("AAPL"));
    assert!((rec.confidence - 0.9).abs() < 1e-6);
    assert_eq!(rec.raw_body, "Buy AAPL");
    assert!(!rec.processed);
    assert_eq!(rec.history_id.as_deref(), Some("9876"));
    assert!(!rec.email_data_truncated);
    assert_eq!(rec.email_data["id"], "abc123");
}

#[tokio::test]
async fn missing_or_non_bearer_auth_is_401_without_side_effects() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = Arc::new(MemoryKv::new());
    let p = pipeline(fetcher.clone(), kv.clone());

    for auth in [
        None,
        Some("Basic dXNlcjpwYXNz".to_string()),
        Some("Bearer".to_string()),
        Some(format!("Token {}", valid_token())),
    ] {
        let resp = p.handle(request(auth.clone(), json!({"messageId": "abc123"}))).await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED, "auth={auth:?}");
        assert_eq!(resp.body["error"], "Missing or invalid Authorization header");
    }
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(kv.len(TABLE), 0);
}

#[tokio::test]
async fn unverifiable_tokens_are_401() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = Arc::new(MemoryKv::new());
    let p = pipeline(fetcher.clone(), kv.clone());

    let mut expired = claims(AUDIENCE);
    expired["exp"] = json!(chrono::Utc::now().timestamp() - 3600);
    let mut foreign_issuer = claims(AUDIENCE);
    foreign_issuer["iss"] = json!("https://evil.example");

    let tokens = [
        mint(&claims("https://someone-else.test/push")),
        mint(&expired),
        mint(&foreign_issuer),
        mint_with_kid(&claims(AUDIENCE), "rotated-away"),
        "not.a.jwt".to_string(),
    ];
    for t in tokens {
        let resp = p
            .handle(request(Some(format!("Bearer {t}")), json!({"messageId": "abc123"})))
            .await;
        assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
    }
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(kv.len(TABLE), 0);
}

#[tokio::test]
async fn empty_audience_is_401() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let p = pipeline(fetcher.clone(), Arc::new(MemoryKv::new()));
    let mut req = request(bearer(), json!({"messageId": "abc123"}));
    req.audience = String::new();
    assert_eq!(p.handle(req).await.status, StatusCode::UNAUTHORIZED);
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn notification_without_message_id_is_400() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = Arc::new(MemoryKv::new());
    let p = pipeline(fetcher.clone(), kv.clone());

    let resp = p
        .handle(request(bearer(), json!({"emailAddress": "me@example.com", "historyId": "1"})))
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.body["error"], "No message ID found in notification");

    let garbage = InboundRequest {
        authorization: bearer(),
        audience: AUDIENCE.into(),
        body: b"{\"message\":{\"data\":\"%%%\"}}".to_vec(),
    };
    assert_eq!(p.handle(garbage).await.status, StatusCode::BAD_REQUEST);

    assert_eq!(fetcher.calls(), 0);
    assert_eq!(kv.len(TABLE), 0);
}

#[tokio::test]
async fn id_key_is_accepted_when_message_id_is_absent() {
    let fetcher = StubFetcher::new().with_message("m-7", "Sold TSLA");
    let p = pipeline(fetcher, Arc::new(MemoryKv::new()));
    let resp = p.handle(request(bearer(), json!({"id": "m-7"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let rec = p.store().get("m-7").await.unwrap().unwrap();
    assert_eq!(rec.category, Category::Sell);
    assert_eq!(rec.ticker.as_deref(), Some("TSLA"));
}

#[tokio::test]
async fn fetch_errors_map_to_404_and_502_without_record() {
    let kv = Arc::new(MemoryKv::new());

    let p = pipeline(StubFetcher::new(), kv.clone());
    let resp = p.handle(request(bearer(), json!({"messageId": "gone"}))).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let failing = StubFetcher::new().fail_with(FetchError::Unavailable("HTTP 503".into()));
    let p = pipeline(failing, kv.clone());
    let resp = p.handle(request(bearer(), json!({"messageId": "abc123"}))).await;
    assert_eq!(resp.status, StatusCode::BAD_GATEWAY);
    assert!(resp.body.get("error").is_some());

    let rejected = StubFetcher::new().fail_with(FetchError::Unauthorized("HTTP 401".into()));
    let p = pipeline(rejected, kv.clone());
    let resp = p.handle(request(bearer(), json!({"messageId": "abc123"}))).await;
    assert_eq!(resp.status, StatusCode::BAD_GATEWAY);

    assert_eq!(kv.len(TABLE), 0);
}

#[tokio::test]
async fn transient_store_failures_are_retried() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = FlakyKv::new(2);
    let p = pipeline(fetcher, kv.clone());

    let resp = p.handle(request(bearer(), json!({"messageId": "abc123"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(kv.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(kv.inner.len(TABLE), 1);
}

#[tokio::test]
async fn exhausted_store_retries_are_500() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = FlakyKv::new(10);
    let p = pipeline(fetcher, kv.clone());

    let resp = p.handle(request(bearer(), json!({"messageId": "abc123"}))).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.body["error"], "Failed to store alert");
    assert_eq!(kv.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(kv.inner.len(TABLE), 0);
}

struct Crashing;

impl Classifier for Crashing {
    fn classify(&self, _m: &RawMessage) -> Classification {
        panic!("model weights missing")
    }
    fn name(&self) -> &'static str {
        "crashing"
    }
}

#[tokio::test]
async fn classifier_crash_degrades_to_unknown_record() {
    let fetcher = StubFetcher::new().with_message("abc123", "Buy AAPL");
    let kv = Arc::new(MemoryKv::new());
    let p = IngestionPipeline::new(
        verifier(),
        fetcher,
        Arc::new(Crashing),
        AlertStore::new(kv.clone(), TABLE),
        ISSUER,
    );

    let resp = p.handle(request(bearer(), json!({"messageId": "abc123"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let rec = p.store().get("abc123").await.unwrap().unwrap();
    assert_eq!(rec.category, Category::Unknown);
    assert_eq!(rec.ticker, None);
    assert_eq!(rec.confidence, 0.0);
}

#[tokio::test]
async fn oversized_payload_is_flagged() {
    let big = "Buy AAPL ".repeat(2_000);
    let fetcher = StubFetcher::new().with_message("abc123", &big);
    let kv = Arc::new(MemoryKv::new());
    let p = pipeline(fetcher, kv).with_max_payload_bytes(4_096);

    let resp = p.handle(request(bearer(), json!({"messageId": "abc123"}))).await;
    assert_eq!(resp.status, StatusCode::OK);
    let rec = p.store().get("abc123").await.unwrap().unwrap();
    assert!(rec.email_data_truncated);
}
