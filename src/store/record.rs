// src/store/record.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::classify::{Category, Classification};
use crate::gmail::RawMessage;
use crate::ingest::Notification;

/// Persisted trade alert. `message_id` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub message_id: String,
    #[serde(rename = "type")]
    pub category: Category,
    pub ticker: Option<String>,
    pub confidence: f32,
    pub raw_body: String,
    /// Set by downstream consumers; always `false` here.
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_id: Option<String>,
    pub email_data: Value,
    #[serde(default)]
    pub email_data_truncated: bool,
}

impl AlertRecord {
    pub fn build(
        notification: &Notification,
        message: &RawMessage,
        classification: &Classification,
        max_payload_bytes: usize,
    ) -> Self {
        let (email_data, email_data_truncated) = bound_payload(&message.payload, max_payload_bytes);
        Self {
            id: Uuid::new_v4(),
            received_at: notification.received_at,
            message_id: notification.message_id.clone(),
            category: classification.category,
            ticker: classification.subject.clone(),
            confidence: classification.confidence,
            raw_body: message.snippet.clone(),
            processed: false,
            history_id: notification.history_id.clone(),
            email_data,
            email_data_truncated,
        }
    }
}

/// Top-level message fields kept when the full payload is too large.
const SLIM_KEYS: &[&str] = &[
    "id",
    "threadId",
    "labelIds",
    "snippet",
    "historyId",
    "internalDate",
    "sizeEstimate",
];

/// Fit `payload` into `max_bytes` of JSON.
///
/// Oversized payloads are replaced by a slim copy (ids, labels, snippet, headers); if that
/// is still too large the result is `null`. The flag reports whether anything was dropped.
pub fn bound_payload(payload: &Value, max_bytes: usize) -> (Value, bool) {
    if json_len(payload) <= max_bytes {
        return (payload.clone(), false);
    }
    let slim = slim_copy(payload);
    if json_len(&slim) <= max_bytes {
        (slim, true)
    } else {
        (Value::Null, true)
    }
}

fn json_len(v: &Value) -> usize {
    serde_json::to_vec(v).map_or(usize::MAX, |b| b.len())
}

fn slim_copy(payload: &Value) -> Value {
    let Some(obj) = payload.as_object() else {
        return Value::Null;
    };
    let mut out = Map::new();
    for key in SLIM_KEYS {
        if let Some(v) = obj.get(*key) {
            out.insert((*key).to_string(), v.clone());
        }
    }
    if let Some(headers) = obj.get("payload").and_then(|p| p.get("headers")) {
        let mut part = Map::new();
        part.insert("headers".into(), headers.clone());
        out.insert("payload".into(), Value::Object(part));
    }
    Value::Object(out)
}
