// src/gmail/credentials.rs
//! Gmail API credentials: parsing the secret blob and a shared read-mostly cache.
//!
//! Concurrent cache misses may each read the secret store; the last writer wins the slot.
//! `invalidate` only clears the slot if it still holds the credential the caller saw
//! rejected, so one invocation's refresh never throws away another's fresh credential.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::error::CredentialError;
use crate::retry::{retry, Backoff};
use crate::secrets::SecretStore;

/// Treat credentials as expired this long before their stated expiry.
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

// Never print token material.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &format_args!("<{}>", self.fingerprint()))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[derive(Deserialize)]
struct SecretBlob {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expiry,
        }
    }

    /// Parse an authorized-user JSON blob as stored in the secret store.
    /// `token` wins over `access_token` when both are present.
    pub fn from_secret_json(raw: &str) -> Result<Self, CredentialError> {
        let blob: SecretBlob = serde_json::from_str(raw)
            .map_err(|e| CredentialError::Malformed(format!("not a JSON credential: {e}")))?;

        let access_token = blob
            .token
            .or(blob.access_token)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CredentialError::Malformed("no access token".into()))?;

        let expiry = match blob.expiry.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(parse_expiry(s).ok_or_else(|| {
                CredentialError::Malformed(format!("unparseable expiry `{s}`"))
            })?),
        };

        Ok(Self {
            access_token,
            refresh_token: blob.refresh_token.filter(|t| !t.is_empty()),
            expiry,
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(exp) => exp <= now + ChronoDuration::seconds(EXPIRY_SKEW_SECS),
            None => false,
        }
    }

    /// Short SHA-256 prefix of the access token, safe for logs.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(self.access_token.as_bytes());
        let mut out = String::with_capacity(12);
        for b in digest.iter().take(6) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// RFC 3339, or the naive ISO form (`2025-01-01T10:00:00.123456`) that Python tooling writes.
fn parse_expiry(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|n| n.and_utc())
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Cached credential if still valid, otherwise a fresh read of the secret store.
    async fn get(&self) -> Result<Credential, CredentialError>;

    /// Drop `stale` from the cache so the next `get` re-reads the store.
    fn invalidate(&self, stale: &Credential);
}

pub type DynCredentials = Arc<dyn CredentialProvider>;

#[derive(Debug, Clone)]
struct CachedCredential {
    credential: Credential,
    fetched_at: DateTime<Utc>,
}

/// Secret-store backed provider with a single cache slot.
pub struct CachedCredentials {
    store: Arc<dyn SecretStore>,
    secret_name: String,
    retry: Backoff,
    slot: RwLock<Option<CachedCredential>>,
}

impl CachedCredentials {
    pub fn new(store: Arc<dyn SecretStore>, secret_name: impl Into<String>, retry: Backoff) -> Self {
        Self {
            store,
            secret_name: secret_name.into(),
            retry,
            slot: RwLock::new(None),
        }
    }

    /// When the cached credential was read from the store, if any.
    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        let g = self.slot.read().unwrap_or_else(|p| p.into_inner());
        g.as_ref().map(|c| c.fetched_at)
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<Credential> {
        let g = self.slot.read().unwrap_or_else(|p| p.into_inner());
        g.as_ref()
            .filter(|c| !c.credential.is_expired_at(now))
            .map(|c| c.credential.clone())
    }

    async fn read_store(&self) -> Result<Credential, CredentialError> {
        let raw = retry(
            &self.retry,
            |e: &CredentialError| matches!(e, CredentialError::SecretUnavailable(_)),
            |attempt, e| {
                tracing::warn!(
                    target: "credentials",
                    attempt,
                    store = self.store.name(),
                    error = %e,
                    "secret read failed; retrying"
                );
            },
            || self.store.get_secret(&self.secret_name),
        )
        .await?;
        Credential::from_secret_json(&raw)
    }
}

#[async_trait]
impl CredentialProvider for CachedCredentials {
    async fn get(&self) -> Result<Credential, CredentialError> {
        let now = Utc::now();
        if let Some(c) = self.cached(now) {
            return Ok(c);
        }

        counter!("credential_fetch_total").increment(1);
        let fresh = self.read_store().await?;
        if fresh.is_expired_at(now) {
            // Still usable as a best effort: the provider decides, and a 401 re-reads the store.
            tracing::warn!(
                target: "credentials",
                fingerprint = %fresh.fingerprint(),
                expiry = ?fresh.expiry,
                "stored credential is already expired"
            );
        } else {
            tracing::debug!(
                target: "credentials",
                fingerprint = %fresh.fingerprint(),
                "credential loaded from secret store"
            );
        }

        let mut g = self.slot.write().unwrap_or_else(|p| p.into_inner());
        *g = Some(CachedCredential {
            credential: fresh.clone(),
            fetched_at: now,
        });
        Ok(fresh)
    }

    fn invalidate(&self, stale: &Credential) {
        let mut g = self.slot.write().unwrap_or_else(|p| p.into_inner());
        let holds_stale = g
            .as_ref()
            .is_some_and(|c| c.credential.access_token == stale.access_token);
        if holds_stale {
            *g = None;
            tracing::info!(
                target: "credentials",
                fingerprint = %stale.fingerprint(),
                "credential invalidated"
            );
        }
    }
}
