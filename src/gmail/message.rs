// src/gmail/message.rs
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Serialize;
use serde_json::Value;

/// Full message as returned by `users.messages.get?format=full`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub snippet: String,
    pub headers: Vec<(String, String)>,
    /// Decoded `text/plain` parts, joined by newlines.
    pub body_text: Option<String>,
    /// The provider payload exactly as received.
    pub payload: Value,
}

impl RawMessage {
    pub fn from_gmail_json(payload: Value) -> Result<Self, String> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "message JSON has no id".to_string())?
            .to_string();
        let thread_id = payload
            .get("threadId")
            .and_then(Value::as_str)
            .map(str::to_string);
        let snippet = payload
            .get("snippet")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let part = payload.get("payload");
        let headers = part
            .and_then(|p| p.get("headers"))
            .and_then(Value::as_array)
            .map(|hs| {
                hs.iter()
                    .filter_map(|h| {
                        let name = h.get("name")?.as_str()?;
                        let value = h.get("value")?.as_str()?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut texts = Vec::new();
        if let Some(p) = part {
            collect_plain_text(p, &mut texts);
        }
        let body_text = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };

        Ok(Self {
            id,
            thread_id,
            snippet,
            headers,
            body_text,
            payload,
        })
    }

    /// Minimal message with only an id and snippet.
    pub fn from_snippet(id: &str, snippet: &str) -> Self {
        Self {
            id: id.to_string(),
            thread_id: None,
            snippet: snippet.to_string(),
            headers: Vec::new(),
            body_text: None,
            payload: serde_json::json!({ "id": id, "snippet": snippet }),
        }
    }

    /// Case-insensitive header lookup; first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    /// Subject, snippet and plain-text body, in that order.
    pub fn text_for_classification(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(s) = self.subject() {
            parts.push(s);
        }
        if !self.snippet.is_empty() {
            parts.push(&self.snippet);
        }
        if let Some(b) = &self.body_text {
            parts.push(b);
        }
        parts.join("\n")
    }
}

fn collect_plain_text(part: &Value, out: &mut Vec<String>) {
    let mime = part.get("mimeType").and_then(Value::as_str).unwrap_or("");
    if mime.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part
            .get("body")
            .and_then(|b| b.get("data"))
            .and_then(Value::as_str)
        {
            if let Some(text) = decode_body_data(data) {
                out.push(text);
            }
        }
    }
    if let Some(children) = part.get("parts").and_then(Value::as_array) {
        for child in children {
            collect_plain_text(child, out);
        }
    }
}

/// Gmail body data is base64url, with or without padding.
fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data.trim().trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}
