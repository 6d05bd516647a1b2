// src/ingest/mod.rs
//! Notification-to-record pipeline.
//!
//! `Received → Authenticated → Decoded → Fetched → Classified → Stored → Completed`.
//! Any stage may end the invocation with a rejection (4xx) or a failure (5xx). Nothing is
//! written before `Stored`, so rejected or failed invocations leave no partial records.

pub mod envelope;

use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use shuttle_axum::axum::http::StatusCode;
use uuid::Uuid;

use crate::auth::{bearer_token, TokenVerifier};
use crate::classify::{classify_guarded, DynClassifier};
use crate::error::{FetchError, StoreError};
use crate::gmail::MessageFetcher;
use crate::retry::{retry, Backoff};
use crate::store::{AlertRecord, AlertStore};

pub use envelope::{decode_push_envelope, EnvelopeError, Notification};

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_requests_total",
            "Push requests handled, labelled by outcome."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Transient message fetch failures that were retried."
        );
        describe_counter!(
            "ingest_store_retries_total",
            "Alert store writes that were retried."
        );
        describe_counter!(
            "credential_fetch_total",
            "Secret store reads for provider credentials."
        );
        describe_counter!(
            "watch_renewals_total",
            "Inbox watch registrations, labelled by outcome."
        );
        describe_gauge!("watch_expiry_ts", "Unix ts when the current inbox watch expires.");
    });
}

/// Transport-neutral view of the inbound push request.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Audience the token must be minted for (this endpoint's own URL or host).
    pub audience: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl PipelineResponse {
    fn completed(alert_id: Uuid) -> Self {
        Self {
            status: StatusCode::OK,
            body: json!({
                "message": "Email processed successfully",
                "alert_id": alert_id,
            }),
        }
    }

    fn error(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }

    /// `alert_id` of a successful response.
    pub fn alert_id(&self) -> Option<Uuid> {
        self.body
            .get("alert_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Authenticated,
    Decoded,
    Fetched,
    Classified,
    Stored,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Authenticated => "authenticated",
            Stage::Decoded => "decoded",
            Stage::Fetched => "fetched",
            Stage::Classified => "classified",
            Stage::Stored => "stored",
            Stage::Completed => "completed",
        }
    }
}

/// Why an invocation ended early. `stage` is the last stage reached.
struct Halt {
    stage: Stage,
    status: StatusCode,
    outcome: &'static str,
    kind: &'static str,
    public: String,
    detail: String,
    message_id: Option<String>,
}

impl Halt {
    fn auth(kind: &'static str, public: &str, detail: String) -> Self {
        Self {
            stage: Stage::Received,
            status: StatusCode::UNAUTHORIZED,
            outcome: "unauthorized",
            kind,
            public: public.to_string(),
            detail,
            message_id: None,
        }
    }

    fn fetch(e: FetchError, message_id: &str) -> Self {
        let (status, outcome, public) = match &e {
            FetchError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", "Message not found"),
            _ => (StatusCode::BAD_GATEWAY, "fetch_failed", "Failed to fetch message"),
        };
        Self {
            stage: Stage::Decoded,
            status,
            outcome,
            kind: e.kind(),
            public: public.to_string(),
            detail: e.to_string(),
            message_id: Some(message_id.to_string()),
        }
    }

    fn store(e: StoreError, message_id: &str) -> Self {
        Self {
            stage: Stage::Classified,
            status: StatusCode::INTERNAL_SERVER_ERROR,
            outcome: "store_failed",
            kind: e.kind(),
            public: "Failed to store alert".into(),
            detail: e.to_string(),
            message_id: Some(message_id.to_string()),
        }
    }
}

struct Completed {
    alert_id: Uuid,
    created: bool,
    message_id: String,
}

pub struct IngestionPipeline {
    verifier: Arc<dyn TokenVerifier>,
    fetcher: Arc<dyn MessageFetcher>,
    classifier: DynClassifier,
    store: AlertStore,
    issuer: String,
    max_payload_bytes: usize,
    store_retry: Backoff,
}

impl IngestionPipeline {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        fetcher: Arc<dyn MessageFetcher>,
        classifier: DynClassifier,
        store: AlertStore,
        issuer: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            fetcher,
            classifier,
            store,
            issuer: issuer.into(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            store_retry: Backoff::default(),
        }
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_store_retry(mut self, policy: Backoff) -> Self {
        self.store_retry = policy;
        self
    }

    pub fn store(&self) -> &AlertStore {
        &self.store
    }

    /// Process one push request. Never panics and never returns an error: every outcome
    /// is a response.
    pub async fn handle(&self, req: InboundRequest) -> PipelineResponse {
        ensure_metrics_described();
        match self.run(req).await {
            Ok(done) => {
                let outcome = if done.created { "ok" } else { "duplicate" };
                counter!("ingest_requests_total", "outcome" => outcome).increment(1);
                tracing::info!(
                    target: "ingest",
                    stage = Stage::Completed.as_str(),
                    message_id = %done.message_id,
                    alert_id = %done.alert_id,
                    created = done.created,
                    "notification processed"
                );
                PipelineResponse::completed(done.alert_id)
            }
            Err(halt) => {
                counter!("ingest_requests_total", "outcome" => halt.outcome).increment(1);
                let message_id = halt.message_id.as_deref().unwrap_or("-");
                if halt.status.is_server_error() {
                    tracing::error!(
                        target: "ingest",
                        stage = halt.stage.as_str(),
                        message_id,
                        kind = halt.kind,
                        error = %halt.detail,
                        "notification failed"
                    );
                } else {
                    tracing::warn!(
                        target: "ingest",
                        stage = halt.stage.as_str(),
                        message_id,
                        kind = halt.kind,
                        error = %halt.detail,
                        "notification rejected"
                    );
                }
                PipelineResponse::error(halt.status, &halt.public)
            }
        }
    }

    async fn run(&self, req: InboundRequest) -> Result<Completed, Halt> {
        let received_at = Utc::now();

        // Received → Authenticated
        let token = req
            .authorization
            .as_deref()
            .and_then(bearer_token)
            .ok_or_else(|| {
                Halt::auth(
                    "missing_bearer",
                    "Missing or invalid Authorization header",
                    "no bearer token".into(),
                )
            })?;
        if req.audience.trim().is_empty() {
            return Err(Halt::auth(
                "no_audience",
                "Missing or invalid Authorization header",
                "expected audience unknown".into(),
            ));
        }
        self.verifier
            .verify(token, &req.audience, &self.issuer)
            .await
            .map_err(|e| Halt::auth(e.kind(), "Invalid or expired token", e.to_string()))?;

        // Authenticated → Decoded
        let notification = decode_push_envelope(&req.body, received_at).map_err(|e| Halt {
            stage: Stage::Authenticated,
            status: StatusCode::BAD_REQUEST,
            outcome: "bad_request",
            kind: "bad_envelope",
            public: e.to_string(),
            detail: e.to_string(),
            message_id: None,
        })?;
        let message_id = notification.message_id.as_str();
        tracing::debug!(
            target: "ingest",
            stage = Stage::Decoded.as_str(),
            message_id,
            history_id = ?notification.history_id,
            "notification decoded"
        );

        // Decoded → Fetched
        let message = self
            .fetcher
            .fetch(message_id)
            .await
            .map_err(|e| Halt::fetch(e, message_id))?;

        // Fetched → Classified
        let verdict = classify_guarded(self.classifier.as_ref(), &message);
        tracing::debug!(
            target: "ingest",
            stage = Stage::Classified.as_str(),
            message_id,
            category = verdict.category.as_str(),
            ticker = ?verdict.subject,
            confidence = verdict.confidence,
            "message classified"
        );

        // Classified → Stored
        let record = AlertRecord::build(&notification, &message, &verdict, self.max_payload_bytes);
        if record.email_data_truncated {
            tracing::warn!(target: "ingest", message_id, "provider payload truncated for storage");
        }
        let stored = retry(
            &self.store_retry,
            |e: &StoreError| matches!(e, StoreError::Unavailable(_)),
            |attempt, e| {
                counter!("ingest_store_retries_total").increment(1);
                tracing::warn!(
                    target: "ingest",
                    stage = Stage::Classified.as_str(),
                    message_id,
                    attempt,
                    error = %e,
                    "alert store write failed; backing off"
                );
            },
            || self.store.upsert(&record),
        )
        .await
        .map_err(|e| Halt::store(e, message_id))?;

        Ok(Completed {
            alert_id: stored.id,
            created: stored.created,
            message_id: notification.message_id.clone(),
        })
    }
}
