// src/ingest/envelope.rs
//! Pub/Sub push envelope decoding.
//!
//! ```json
//! {"message": {"data": "<base64 JSON>", "messageId": "...", "publishTime": "..."},
//!  "subscription": "projects/p/subscriptions/s"}
//! ```
//! The inner JSON names the mail message by `messageId` (preferred) or `id`.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::gmail::watch::scalar_to_string;

/// A decoded push notification. Transient; never stored on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message_id: String,
    pub history_id: Option<String>,
    pub email_address: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Transport delivery id (`message.messageId` of the envelope).
    pub delivery_id: Option<String>,
    pub publish_time: Option<String>,
    pub subscription: Option<String>,
}

impl Notification {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            history_id: None,
            email_address: None,
            received_at: Utc::now(),
            delivery_id: None,
            publish_time: None,
            subscription: None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("request body is not valid JSON: {0}")]
    NotJson(String),

    #[error("push envelope has no message.data")]
    MissingData,

    #[error("message.data is not valid base64")]
    BadBase64,

    #[error("notification payload is not a JSON object: {0}")]
    BadPayload(String),

    #[error("No message ID found in notification")]
    MissingMessageId,
}

/// Decode a push body into a [`Notification`] stamped with `received_at`.
pub fn decode_push_envelope(
    body: &[u8],
    received_at: DateTime<Utc>,
) -> Result<Notification, EnvelopeError> {
    // Parsed loosely: the envelope carries both `messageId` and `message_id`.
    let envelope: Value =
        serde_json::from_slice(body).map_err(|e| EnvelopeError::NotJson(e.to_string()))?;
    let message = envelope.get("message").ok_or(EnvelopeError::MissingData)?;
    let data = message
        .get("data")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or(EnvelopeError::MissingData)?;

    let decoded = decode_base64(data).ok_or(EnvelopeError::BadBase64)?;
    let inner: Value =
        serde_json::from_slice(&decoded).map_err(|e| EnvelopeError::BadPayload(e.to_string()))?;
    if !inner.is_object() {
        return Err(EnvelopeError::BadPayload("expected an object".into()));
    }

    let message_id = ["messageId", "id"]
        .iter()
        .find_map(|k| inner.get(*k).and_then(scalar_to_string))
        .ok_or(EnvelopeError::MissingMessageId)?;

    let str_field = |v: &Value, k: &str| v.get(k).and_then(scalar_to_string);
    Ok(Notification {
        message_id,
        history_id: str_field(&inner, "historyId"),
        email_address: str_field(&inner, "emailAddress"),
        received_at,
        delivery_id: str_field(message, "messageId").or_else(|| str_field(message, "message_id")),
        publish_time: str_field(message, "publishTime")
            .or_else(|| str_field(message, "publish_time")),
        subscription: str_field(&envelope, "subscription"),
    })
}

/// Standard alphabet first; URL-safe and unpadded variants are tolerated.
fn decode_base64(data: &str) -> Option<Vec<u8>> {
    let data = data.trim();
    STANDARD
        .decode(data)
        .ok()
        .or_else(|| URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok())
}
