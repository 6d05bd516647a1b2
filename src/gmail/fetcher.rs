// src/gmail/fetcher.rs
//! Message retrieval with credential recovery and transient-failure backoff.
//!
//! * 401 → invalidate the credential once, retry once; a second 401 is terminal.
//! * 403 → terminal `Unauthorized` (scope problem, a refresh will not help).
//! * 400 / 404 → `NotFound`, never retried.
//! * network errors, timeouts, 429, 5xx → retried per the fetch backoff, then `Unavailable`.

use async_trait::async_trait;
use metrics::counter;
use reqwest::StatusCode;
use serde_json::Value;

use crate::error::FetchError;
use crate::gmail::client::{is_valid_message_id, GmailClient};
use crate::gmail::credentials::Credential;
use crate::gmail::message::RawMessage;

#[async_trait]
pub trait MessageFetcher: Send + Sync {
    async fn fetch(&self, message_id: &str) -> Result<RawMessage, FetchError>;
}

/// Outcome of a single HTTP attempt.
#[derive(Debug)]
enum Attempt {
    AuthRejected,
    Forbidden(String),
    NotFound,
    Transient(String),
    Rejected(String),
}

impl GmailClient {
    async fn get_message_once(&self, cred: &Credential, id: &str) -> Result<Value, Attempt> {
        let url = self.user_url(&format!("messages/{id}"));
        let resp = self
            .http()
            .get(&url)
            .query(&[("format", "full")])
            .bearer_auth(&cred.access_token)
            .send()
            .await
            .map_err(|e| Attempt::Transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<Value>()
                .await
                .map_err(|e| Attempt::Transient(format!("reading body: {e}")));
        }
        Err(match status {
            StatusCode::UNAUTHORIZED => Attempt::AuthRejected,
            StatusCode::FORBIDDEN => Attempt::Forbidden(format!("HTTP {status}")),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => Attempt::NotFound,
            StatusCode::TOO_MANY_REQUESTS => Attempt::Transient(format!("HTTP {status}")),
            s if s.is_server_error() => Attempt::Transient(format!("HTTP {s}")),
            s => Attempt::Rejected(format!("HTTP {s}")),
        })
    }
}

#[async_trait]
impl MessageFetcher for GmailClient {
    async fn fetch(&self, message_id: &str) -> Result<RawMessage, FetchError> {
        if !is_valid_message_id(message_id) {
            return Err(FetchError::NotFound(message_id.to_string()));
        }

        let backoff = *self.fetch_retry();
        let max_transient = backoff.max_attempts();
        let mut transient_attempts: u32 = 0;
        let mut refreshed = false;

        loop {
            let cred = self.credentials().get().await?;
            match self.get_message_once(&cred, message_id).await {
                Ok(json) => {
                    return RawMessage::from_gmail_json(json).map_err(FetchError::Unavailable);
                }
                Err(Attempt::AuthRejected) if !refreshed => {
                    tracing::warn!(
                        target: "fetch",
                        message_id,
                        fingerprint = %cred.fingerprint(),
                        "provider rejected credential; refreshing once"
                    );
                    self.credentials().invalidate(&cred);
                    refreshed = true;
                }
                Err(Attempt::AuthRejected) => {
                    return Err(FetchError::Unauthorized(
                        "credential rejected after refresh".into(),
                    ));
                }
                Err(Attempt::Forbidden(msg)) => return Err(FetchError::Unauthorized(msg)),
                Err(Attempt::NotFound) => {
                    return Err(FetchError::NotFound(message_id.to_string()))
                }
                Err(Attempt::Rejected(msg)) => return Err(FetchError::Unavailable(msg)),
                Err(Attempt::Transient(msg)) => {
                    transient_attempts += 1;
                    if transient_attempts >= max_transient {
                        return Err(FetchError::Unavailable(msg));
                    }
                    counter!("ingest_fetch_retries_total").increment(1);
                    tracing::warn!(
                        target: "fetch",
                        message_id,
                        attempt = transient_attempts,
                        error = %msg,
                        "transient fetch failure; backing off"
                    );
                    tokio::time::sleep(backoff.delay(transient_attempts)).await;
                }
            }
        }
    }
}
