// src/gmail/client.rs
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::GmailConfig;
use crate::gmail::credentials::DynCredentials;
use crate::retry::Backoff;

/// Shared Gmail REST plumbing for the message fetcher and the watch manager.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    base_url: String,
    user_id: String,
    credentials: DynCredentials,
    fetch_retry: Backoff,
}

impl GmailClient {
    pub fn new(cfg: &GmailConfig, credentials: DynCredentials) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("trade-alert-ingest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("building Gmail HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.api_base.trim_end_matches('/').to_string(),
            user_id: cfg.user_id.clone(),
            credentials,
            fetch_retry: cfg.fetch_retry,
        })
    }

    pub fn credentials(&self) -> &DynCredentials {
        &self.credentials
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn fetch_retry(&self) -> &Backoff {
        &self.fetch_retry
    }

    /// `{base}/gmail/v1/users/{user}/{tail}`
    pub(crate) fn user_url(&self, tail: &str) -> String {
        format!(
            "{}/gmail/v1/users/{}/{}",
            self.base_url, self.user_id, tail
        )
    }
}

/// Gmail ids are URL-safe tokens; anything else can never resolve to a message.
pub(crate) fn is_valid_message_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 256
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
