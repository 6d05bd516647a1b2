// src/auth/jwks.rs
//! Issuer key set (JWKS) retrieval and caching.
//!
//! Keys are cached for `ttl`. A token signed with an unknown `kid` forces one refresh
//! (key rotation), at most once per `min_refresh`, and never twice within one lookup.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    #[serde(default)]
    pub kid: Option<String>,
    pub kty: String,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Where issuer keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch_keys(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches the key set over HTTPS.
pub struct HttpKeySource {
    http: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let resp = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| AuthError::KeysUnavailable(format!("request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::KeysUnavailable(format!("HTTP {status}")));
        }
        resp.json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeysUnavailable(format!("unreadable key set: {e}")))
    }
}

struct CachedKeys {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

pub struct JwksCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    min_refresh: Duration,
    state: RwLock<Option<CachedKeys>>,
}

enum Lookup {
    Hit(DecodingKey),
    /// Cached set is fresh but lacks the kid; carries the age of the set.
    Miss(Duration),
    Stale,
}

impl JwksCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration, min_refresh: Duration) -> Self {
        Self {
            source,
            ttl,
            min_refresh,
            state: RwLock::new(None),
        }
    }

    /// Decoding key for `kid`, refreshing the set when it is expired or lacks the key.
    pub async fn key_for(&self, kid: &str) -> Result<DecodingKey, AuthError> {
        let mut refreshed = false;
        let age = match self.lookup(kid) {
            Lookup::Hit(k) => return Ok(k),
            Lookup::Miss(age) => age,
            Lookup::Stale => {
                self.refresh().await?;
                refreshed = true;
                match self.lookup(kid) {
                    Lookup::Hit(k) => return Ok(k),
                    _ => Duration::ZERO,
                }
            }
        };

        if !refreshed && age >= self.min_refresh {
            tracing::info!(target: "auth", kid, "unknown key id; refreshing issuer keys");
            self.refresh().await?;
            if let Lookup::Hit(k) = self.lookup(kid) {
                return Ok(k);
            }
        }
        Err(AuthError::UnknownKey(kid.to_string()))
    }

    /// Number of usable keys currently cached.
    pub fn len(&self) -> usize {
        self.read_state().as_ref().map_or(0, |c| c.keys.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, Option<CachedKeys>> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn lookup(&self, kid: &str) -> Lookup {
        let guard = self.read_state();
        match guard.as_ref() {
            Some(c) if c.fetched_at.elapsed() < self.ttl => match c.keys.get(kid) {
                Some(k) => Lookup::Hit(k.clone()),
                None => Lookup::Miss(c.fetched_at.elapsed()),
            },
            _ => Lookup::Stale,
        }
    }

    async fn refresh(&self) -> Result<(), AuthError> {
        let set = self.source.fetch_keys().await?;
        let mut keys = HashMap::new();
        for jwk in set.keys {
            let (Some(kid), Some(n), Some(e)) = (jwk.kid.as_deref(), jwk.n.as_deref(), jwk.e.as_deref())
            else {
                continue;
            };
            if jwk.kty != "RSA" || jwk.alg.as_deref().is_some_and(|a| a != "RS256") {
                continue;
            }
            match DecodingKey::from_rsa_components(n, e) {
                Ok(k) => {
                    keys.insert(kid.to_string(), k);
                }
                Err(err) => {
                    tracing::warn!(target: "auth", kid, error = %err, "skipping unusable issuer key");
                }
            }
        }
        if keys.is_empty() {
            return Err(AuthError::KeysUnavailable("key set has no usable RS256 keys".into()));
        }
        tracing::debug!(target: "auth", keys = keys.len(), "issuer keys refreshed");
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}
