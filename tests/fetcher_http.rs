// tests/fetcher_http.rs
//
// Gmail `messages.get` over HTTP (wiremock):
// - 401 → exactly one invalidate + one retry, then Unauthorized
// - a rotated secret recovers after the single refresh
// - 403 / 400 / 404 are terminal, 5xx / 429 are retried with backoff

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::gmail_message_json;
use trade_alert_ingest::config::GmailConfig;
use trade_alert_ingest::error::{CredentialError, FetchError};
use trade_alert_ingest::gmail::{
    CachedCredentials, Credential, CredentialProvider, GmailClient, MessageFetcher,
};
use trade_alert_ingest::retry::Backoff;
use trade_alert_ingest::secrets::StaticSecretStore;

const MSG_PATH: &str = "/gmail/v1/users/me/messages/abc123";
const SECRET: &str = "gmail/api/credentials";

/// Hands out a fixed token and counts `invalidate` calls.
struct CountingCredentials {
    token: Mutex<String>,
    invalidations: AtomicUsize,
}

impl CountingCredentials {
    fn new(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.to_string()),
            invalidations: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl CredentialProvider for CountingCredentials {
    async fn get(&self) -> Result<Credential, CredentialError> {
        Ok(Credential::new(self.token.lock().unwrap().clone(), None))
    }

    fn invalidate(&self, _stale: &Credential) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

fn client(server: &MockServer, creds: Arc<dyn CredentialProvider>) -> GmailClient {
    let cfg = GmailConfig {
        api_base: server.uri(),
        fetch_retry: Backoff::new(3, 1, 5),
        ..GmailConfig::default()
    };
    GmailClient::new(&cfg, creds).unwrap()
}

async fn requests(server: &MockServer) -> usize {
    server.received_requests().await.unwrap().len()
}

#[tokio::test]
async fn fetches_full_message_with_bearer_credential() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .and(query_param("format", "full"))
        .and(header("authorization", "Bearer ya29.good"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gmail_message_json("abc123", "Buy AAPL")),
        )
        .mount(&server)
        .await;

    let gmail = client(&server, CountingCredentials::new("ya29.good"));
    let m = gmail.fetch("abc123").await.unwrap();
    assert_eq!(m.id, "abc123");
    assert_eq!(m.snippet, "Buy AAPL");
    assert_eq!(m.subject(), Some("Trade alert"));
    assert_eq!(m.body_text.as_deref(), Some("Buy AAPL"));
}

#[tokio::test]
async fn repeated_401_invalidates_once_and_retries_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let creds = CountingCredentials::new("ya29.revoked");
    let gmail = client(&server, creds.clone());
    let err = gmail.fetch("abc123").await.unwrap_err();

    assert!(matches!(err, FetchError::Unauthorized(_)), "{err:?}");
    assert_eq!(creds.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(requests(&server).await, 2);
}

#[tokio::test]
async fn rotated_secret_recovers_after_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gmail_message_json("abc123", "Buy AAPL")),
        )
        .mount(&server)
        .await;

    let store = Arc::new(StaticSecretStore::new().with_secret(SECRET, r#"{"token":"stale"}"#));
    let creds = Arc::new(CachedCredentials::new(store.clone(), SECRET, Backoff::new(1, 1, 1)));
    let gmail = client(&server, creds.clone());

    // Warm the cache with the stale token, then rotate the secret behind it.
    creds.get().await.unwrap();
    store.set(SECRET, r#"{"token":"fresh"}"#);

    let m = gmail.fetch("abc123").await.unwrap();
    assert_eq!(m.snippet, "Buy AAPL");
    assert_eq!(store.reads(), 2);
    assert_eq!(requests(&server).await, 2);
}

#[tokio::test]
async fn forbidden_is_terminal_without_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let creds = CountingCredentials::new("ya29.scope-less");
    let gmail = client(&server, creds.clone());
    assert!(matches!(gmail.fetch("abc123").await, Err(FetchError::Unauthorized(_))));
    assert_eq!(creds.invalidations.load(Ordering::SeqCst), 0);
    assert_eq!(requests(&server).await, 1);
}

#[tokio::test]
async fn not_found_and_bad_request_are_not_retried() {
    for status in [404u16, 400] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(MSG_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let gmail = client(&server, CountingCredentials::new("t"));
        assert_eq!(
            gmail.fetch("abc123").await,
            Err(FetchError::NotFound("abc123".into())),
            "status {status}"
        );
        assert_eq!(requests(&server).await, 1);
    }
}

#[tokio::test]
async fn server_errors_are_retried_then_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let gmail = client(&server, CountingCredentials::new("t"));
    assert!(matches!(gmail.fetch("abc123").await, Err(FetchError::Unavailable(_))));
    assert_eq!(requests(&server).await, 3);
}

#[tokio::test]
async fn throttling_recovers_within_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(MSG_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(gmail_message_json("abc123", "Sell MSFT")),
        )
        .mount(&server)
        .await;

    let gmail = client(&server, CountingCredentials::new("t"));
    assert_eq!(gmail.fetch("abc123").await.unwrap().snippet, "Sell MSFT");
    assert_eq!(requests(&server).await, 2);
}

#[tokio::test]
async fn invalid_ids_never_reach_the_provider() {
    let server = MockServer::start().await;
    let gmail = client(&server, CountingCredentials::new("t"));
    assert!(matches!(gmail.fetch("../watch").await, Err(FetchError::NotFound(_))));
    assert!(matches!(gmail.fetch("").await, Err(FetchError::NotFound(_))));
    assert_eq!(requests(&server).await, 0);
}

#[tokio::test]
async fn missing_secret_surfaces_as_credential_error() {
    let server = MockServer::start().await;
    let store = Arc::new(StaticSecretStore::new());
    let creds = Arc::new(CachedCredentials::new(store, SECRET, Backoff::new(2, 1, 1)));
    let gmail = client(&server, creds);
    assert!(matches!(
        gmail.fetch("abc123").await,
        Err(FetchError::Credential(CredentialError::SecretUnavailable(_)))
    ));
    assert_eq!(requests(&server).await, 0);
}
