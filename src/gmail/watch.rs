// src/gmail/watch.rs
//! Inbox watch registration and its renewal schedule.
//!
//! Gmail drops a watch 7 days after registration. The scheduler renews every
//! `interval`, but never later than `expiry - margin`, and retries sooner after a failure.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use metrics::{counter, gauge};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::gmail::client::GmailClient;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchRenewal {
    pub expiration: DateTime<Utc>,
    pub history_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest<'a> {
    label_ids: &'a [String],
    topic_name: &'a str,
    label_filter_action: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    #[serde(default)]
    history_id: Option<Value>,
    #[serde(default)]
    expiration: Option<Value>,
}

pub struct WatchManager {
    client: GmailClient,
    topic: String,
    label_ids: Vec<String>,
    last: RwLock<Option<WatchRenewal>>,
}

impl WatchManager {
    pub fn new(client: GmailClient, topic: impl Into<String>, label_ids: Vec<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            label_ids,
            last: RwLock::new(None),
        }
    }

    /// Last successful renewal seen by this process.
    pub fn last_renewal(&self) -> Option<WatchRenewal> {
        self.last.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Register (or re-register) the inbox watch and return the new expiry.
    pub async fn renew(&self) -> Result<WatchRenewal, WatchError> {
        let res = self.register().await;
        match &res {
            Ok(r) => {
                counter!("watch_renewals_total", "outcome" => "ok").increment(1);
                gauge!("watch_expiry_ts").set(r.expiration.timestamp() as f64);
                *self.last.write().unwrap_or_else(|p| p.into_inner()) = Some(r.clone());
                tracing::info!(
                    target: "watch",
                    topic = %self.topic,
                    expiration = %r.expiration.to_rfc3339(),
                    history_id = ?r.history_id,
                    "gmail watch registered"
                );
            }
            Err(e) => {
                counter!("watch_renewals_total", "outcome" => "failed").increment(1);
                tracing::error!(target: "watch", topic = %self.topic, error = %e, "gmail watch registration failed");
            }
        }
        res
    }

    async fn register(&self) -> Result<WatchRenewal, WatchError> {
        if self.topic.trim().is_empty() {
            return Err(WatchError::RegistrationFailed("no topic configured".into()));
        }
        let cred = self.client.credentials().get().await?;
        let body = WatchRequest {
            label_ids: &self.label_ids,
            topic_name: &self.topic,
            label_filter_action: "include",
        };

        let resp = self
            .client
            .http()
            .post(self.client.user_url("watch"))
            .bearer_auth(&cred.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| WatchError::RegistrationFailed(format!("request failed: {e}")))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            // Next scheduled run re-reads the secret store.
            self.client.credentials().invalidate(&cred);
        }
        if !status.is_success() {
            return Err(WatchError::RegistrationFailed(format!("HTTP {status}")));
        }

        let parsed: WatchResponse = resp
            .json()
            .await
            .map_err(|e| WatchError::RegistrationFailed(format!("unreadable response: {e}")))?;

        let expiration = parsed
            .expiration
            .as_ref()
            .and_then(millis_from_json)
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .ok_or_else(|| WatchError::RegistrationFailed("response has no expiration".into()))?;

        if expiration <= Utc::now() {
            return Err(WatchError::RegistrationFailed(format!(
                "expiration {} is not in the future",
                expiration.to_rfc3339()
            )));
        }

        Ok(WatchRenewal {
            expiration,
            history_id: parsed.history_id.as_ref().and_then(scalar_to_string),
        })
    }
}

/// Gmail sends int64 values as JSON strings; accept plain numbers too.
fn millis_from_json(v: &Value) -> Option<i64> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

pub(crate) fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Renewal cadence. All values in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchSchedule {
    pub interval_secs: u64,
    pub validity_secs: u64,
    pub margin_secs: u64,
    pub retry_after_secs: u64,
}

impl WatchSchedule {
    pub fn from_config(cfg: &WatchConfig) -> Result<Self> {
        let s = Self {
            interval_secs: cfg.interval_secs,
            validity_secs: cfg.validity_secs,
            margin_secs: cfg.margin_secs,
            retry_after_secs: cfg.retry_after_secs,
        };
        s.validate()?;
        Ok(s)
    }

    /// The interval must leave at least `margin` of the validity window unused.
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 || self.retry_after_secs == 0 {
            bail!("watch interval and retry_after must be positive");
        }
        if self.margin_secs >= self.validity_secs {
            bail!(
                "watch margin ({}s) must be shorter than validity ({}s)",
                self.margin_secs,
                self.validity_secs
            );
        }
        if self.interval_secs >= self.validity_secs - self.margin_secs {
            bail!(
                "watch interval ({}s) must be shorter than validity minus margin ({}s)",
                self.interval_secs,
                self.validity_secs - self.margin_secs
            );
        }
        Ok(())
    }

    /// Latest moment the next renewal may happen for a watch expiring at `expiry`.
    pub fn renew_deadline(&self, expiry: DateTime<Utc>) -> DateTime<Utc> {
        expiry - ChronoDuration::seconds(self.margin_secs as i64)
    }

    /// True when a watch expiring at `expiry` is already past its renewal deadline.
    pub fn within_margin(&self, now: DateTime<Utc>, expiry: DateTime<Utc>) -> bool {
        self.renew_deadline(expiry) <= now
    }

    /// Sleep before the next attempt: `interval` after a success (`retry_after` after a
    /// failure), pulled in to the renewal deadline, but never shorter than `retry_after`.
    pub fn next_delay(
        &self,
        now: DateTime<Utc>,
        last_expiry: Option<DateTime<Utc>>,
        last_ok: bool,
    ) -> Duration {
        let base = if last_ok {
            self.interval_secs
        } else {
            self.retry_after_secs
        };
        let until_deadline = last_expiry
            .map(|e| (self.renew_deadline(e) - now).num_seconds().max(0) as u64)
            .unwrap_or(u64::MAX);
        Duration::from_secs(base.min(until_deadline).max(self.retry_after_secs))
    }
}

/// Renew immediately, then keep renewing per `schedule` until the task is aborted.
pub fn spawn_watch_scheduler(manager: Arc<WatchManager>, schedule: WatchSchedule) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let ok = manager.renew().await.is_ok();
            let last_expiry = manager.last_renewal().map(|r| r.expiration);
            let now = Utc::now();
            if let Some(exp) = last_expiry.filter(|e| ok && schedule.within_margin(now, *e)) {
                tracing::warn!(
                    target: "watch",
                    expiration = %exp.to_rfc3339(),
                    margin_secs = schedule.margin_secs,
                    "renewed watch already expires within the safety margin"
                );
            }
            let delay = schedule.next_delay(now, last_expiry, ok);
            tracing::info!(
                target: "watch",
                next_in_secs = delay.as_secs(),
                last_ok = ok,
                "watch renewal scheduled"
            );
            tokio::time::sleep(delay).await;
        }
    })
}
