// tests/common/mod.rs
//
// Shared helpers for integration tests: a fixed RSA issuer key, token minting,
// and in-process stand-ins for the Gmail fetcher and the key-value store.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use trade_alert_ingest::auth::{Jwk, JwkSet, JwksCache, JwtVerifier, KeySource, TokenVerifier};
use trade_alert_ingest::classify::{DynClassifier, RuleClassifier};
use trade_alert_ingest::error::{AuthError, FetchError, StoreError};
use trade_alert_ingest::gmail::{MessageFetcher, RawMessage};
use trade_alert_ingest::retry::Backoff;
use trade_alert_ingest::store::{AlertStore, KvStore, KvWrite, MemoryKv};
use trade_alert_ingest::IngestionPipeline;

pub const ISSUER: &str = "https://accounts.google.com";
pub const AUDIENCE: &str = "https://ingest.test/push";
pub const KID: &str = "test-key-1";

const ISSUER_KEY_PEM: &[u8] = include_bytes!("../fixtures/issuer_rsa_key.pem");
const KEY_N: &str = "tSdyz9SygCZHOOCo67b3Qjrlwcp6FJ2cSSQa6NIb-i7Vno_SciILDzVz2MgwKv3P9falsR862LYREgNLU0HVMejlb8J0kuvKJZwZvyWpkQneQAhRNyHjUqs8XpHa99fcM16ZTPavTx0xZvjEFDTyQBI6lg5ZX2VbKfxctTPwDa0u33K2a5ud4HVwB3ZPXXVJXIDkvB3voOPnTpmxxrDmyS0K_wDeBNkB2Q78koNEWfRva7TJkVMK4GUkMjXD4ze_Q6P7jDeG85XHyFEWA3I26SJWViQtWgXZVOfdQUJE1cOvY6KHy0TzNlGYN4C7x0NEIjPsRP3cIb2CXdoi2QDlPQ";
const KEY_E: &str = "AQAB";

// ---- tokens ----

pub fn jwk(kid: &str) -> Jwk {
    Jwk {
        kid: Some(kid.into()),
        kty: "RSA".into(),
        alg: Some("RS256".into()),
        n: Some(KEY_N.into()),
        e: Some(KEY_E.into()),
    }
}

pub fn jwk_set() -> JwkSet {
    JwkSet {
        keys: vec![jwk(KID)],
    }
}

/// Standard push-token claims, valid for another hour.
pub fn claims(aud: &str) -> Value {
    let now = Utc::now().timestamp();
    json!({
        "iss": ISSUER,
        "aud": aud,
        "sub": "112233445566778899",
        "email": "gmail-push@system.gserviceaccount.com",
        "email_verified": true,
        "iat": now,
        "exp": now + 3600,
    })
}

pub fn mint_with_kid(claims: &Value, kid: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.into());
    let key = EncodingKey::from_rsa_pem(ISSUER_KEY_PEM).expect("fixture key");
    encode(&header, claims, &key).expect("mint token")
}

pub fn mint(claims: &Value) -> String {
    mint_with_kid(claims, KID)
}

pub fn valid_token() -> String {
    mint(&claims(AUDIENCE))
}

/// Key source serving a fixed set and counting fetches.
pub struct StaticKeys {
    pub set: JwkSet,
    pub fetches: AtomicUsize,
}

impl StaticKeys {
    pub fn new(set: JwkSet) -> Arc<Self> {
        Arc::new(Self {
            set,
            fetches: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl KeySource for StaticKeys {
    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.set.clone())
    }
}

pub fn verifier() -> Arc<dyn TokenVerifier> {
    let cache = JwksCache::new(
        StaticKeys::new(jwk_set()),
        Duration::from_secs(3600),
        Duration::ZERO,
    );
    Arc::new(JwtVerifier::new(Arc::new(cache), 30))
}

// ---- push envelopes ----

pub fn push_body(inner: Value) -> Vec<u8> {
    json!({
        "message": {
            "data": STANDARD.encode(inner.to_string()),
            "messageId": "2070443601311540",
            "publishTime": "2025-09-06T09:00:00.000Z"
        },
        "subscription": "projects/trader/subscriptions/gmail-push"
    })
    .to_string()
    .into_bytes()
}

/// Gmail `messages.get` JSON for a message whose snippet is `snippet`.
pub fn gmail_message_json(id: &str, snippet: &str) -> Value {
    json!({
        "id": id,
        "threadId": format!("t-{id}"),
        "labelIds": ["INBOX", "UNREAD"],
        "snippet": snippet,
        "historyId": "9876",
        "internalDate": "1757149200000",
        "payload": {
            "mimeType": "text/plain",
            "headers": [
                {"name": "From", "value": "alerts@broker.example"},
                {"name": "Subject", "value": "Trade alert"}
            ],
            "body": {"size": snippet.len(), "data": base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(snippet)}
        }
    })
}

// ---- fetcher ----

/// Serves canned messages; unknown ids are `NotFound`.
#[derive(Default)]
pub struct StubFetcher {
    messages: Mutex<HashMap<String, RawMessage>>,
    failure: Mutex<Option<FetchError>>,
    pub calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_message(self: Arc<Self>, id: &str, snippet: &str) -> Arc<Self> {
        let m = RawMessage::from_gmail_json(gmail_message_json(id, snippet)).expect("message json");
        self.messages.lock().unwrap().insert(id.to_string(), m);
        self
    }

    pub fn fail_with(self: Arc<Self>, err: FetchError) -> Arc<Self> {
        *self.failure.lock().unwrap() = Some(err);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageFetcher for StubFetcher {
    async fn fetch(&self, message_id: &str) -> Result<RawMessage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.failure.lock().unwrap().clone() {
            return Err(e);
        }
        self.messages
            .lock()
            .unwrap()
            .get(message_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(message_id.to_string()))
    }
}

// ---- store ----

/// Memory store whose first `failures` writes are `Unavailable`.
pub struct FlakyKv {
    pub inner: MemoryKv,
    failures: AtomicUsize,
    pub attempts: AtomicUsize,
}

impl FlakyKv {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryKv::new(),
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl KvStore for FlakyKv {
    async fn upsert(&self, table: &str, key: &str, record: Value) -> Result<KvWrite, StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Unavailable("throttled".into()));
        }
        self.inner.upsert(table, key, record).await
    }

    async fn get(&self, table: &str, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(table, key).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

// ---- pipeline ----

pub const TABLE: &str = "trade-alerts";

pub fn rules() -> DynClassifier {
    Arc::new(RuleClassifier::builtin().expect("built-in rules"))
}

pub fn pipeline(fetcher: Arc<dyn MessageFetcher>, kv: Arc<dyn KvStore>) -> IngestionPipeline {
    IngestionPipeline::new(
        verifier(),
        fetcher,
        rules(),
        AlertStore::new(kv, TABLE),
        ISSUER,
    )
    .with_store_retry(Backoff::new(3, 1, 5))
}
