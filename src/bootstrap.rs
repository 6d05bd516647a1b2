// src/bootstrap.rs
//! Wires configured collaborators into the pipeline and the watch manager.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::api::AppState;
use crate::auth::{HttpKeySource, JwksCache, JwtVerifier, TokenVerifier};
use crate::classify::build_classifier;
use crate::config::{AppConfig, AuthConfig, SecretBackend, SecretsConfig, StoreBackend, StoreConfig};
use crate::gmail::{CachedCredentials, DynCredentials, GmailClient, WatchManager, WatchSchedule};
use crate::ingest::IngestionPipeline;
use crate::secrets::{EnvSecretStore, FileSecretStore, SecretStore};
use crate::store::{AlertStore, DynKvStore, FileKv, MemoryKv};

pub struct Services {
    pub pipeline: Arc<IngestionPipeline>,
    pub credentials: DynCredentials,
    /// Present when `watch.enabled` is set.
    pub watch: Option<(Arc<WatchManager>, WatchSchedule)>,
    pub audience: String,
}

impl Services {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let audience = required_audience(&cfg.auth)?;
        let verifier = build_verifier(&cfg.auth)?;
        let credentials = build_credentials(&cfg.secrets);
        let gmail = GmailClient::new(&cfg.gmail, credentials.clone())?;
        let classifier = build_classifier(&cfg.classifier)?;
        let store = AlertStore::new(build_kv(&cfg.store), cfg.store.table.clone());
        info!(
            classifier = classifier.name(),
            store = store.backend(),
            table = store.table(),
            "ingestion pipeline configured"
        );

        let pipeline = IngestionPipeline::new(
            verifier,
            Arc::new(gmail.clone()),
            classifier,
            store,
            cfg.auth.issuer.clone(),
        )
        .with_max_payload_bytes(cfg.store.max_payload_bytes)
        .with_store_retry(cfg.store.retry);

        let watch = if cfg.watch.enabled {
            Some(build_watch(cfg, gmail)?)
        } else {
            None
        };

        Ok(Self {
            pipeline: Arc::new(pipeline),
            credentials,
            watch,
            audience,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            pipeline: self.pipeline.clone(),
            audience: self.audience.clone(),
        }
    }
}

/// The push endpoint's own audience. Never derived from request input.
pub fn required_audience(cfg: &AuthConfig) -> Result<String> {
    match cfg.audience.as_deref().map(str::trim) {
        Some(a) if !a.is_empty() => Ok(a.to_string()),
        _ => bail!("auth.audience (or INGEST_AUDIENCE) must be set to the push endpoint URL"),
    }
}

pub fn build_verifier(cfg: &AuthConfig) -> Result<Arc<dyn TokenVerifier>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(cfg.timeout_ms))
        .build()
        .context("building JWKS HTTP client")?;
    let keys = JwksCache::new(
        Arc::new(HttpKeySource::new(http, cfg.jwks_url.clone())),
        Duration::from_secs(cfg.jwks_ttl_secs),
        Duration::from_secs(cfg.jwks_min_refresh_secs),
    );
    Ok(Arc::new(JwtVerifier::new(Arc::new(keys), cfg.leeway_secs)))
}

pub fn build_secret_store(cfg: &SecretsConfig) -> Arc<dyn SecretStore> {
    match cfg.backend {
        SecretBackend::Env => Arc::new(EnvSecretStore),
        SecretBackend::File => Arc::new(FileSecretStore::new(cfg.dir.clone())),
    }
}

pub fn build_credentials(cfg: &SecretsConfig) -> DynCredentials {
    Arc::new(CachedCredentials::new(
        build_secret_store(cfg),
        cfg.credential_secret.clone(),
        cfg.retry,
    ))
}

pub fn build_kv(cfg: &StoreConfig) -> DynKvStore {
    match cfg.backend {
        StoreBackend::Memory => Arc::new(MemoryKv::new()),
        StoreBackend::File => Arc::new(FileKv::new(cfg.dir.clone())),
    }
}

/// Watch manager and its validated schedule. Fails on a missing topic or unsafe cadence.
pub fn build_watch(cfg: &AppConfig, gmail: GmailClient) -> Result<(Arc<WatchManager>, WatchSchedule)> {
    if cfg.watch.topic.trim().is_empty() {
        bail!("watch is enabled but no topic is configured (watch.topic / GMAIL_WATCH_TOPIC)");
    }
    let schedule = WatchSchedule::from_config(&cfg.watch)?;
    let manager = WatchManager::new(gmail, cfg.watch.topic.clone(), cfg.watch.label_ids.clone());
    Ok((Arc::new(manager), schedule))
}
