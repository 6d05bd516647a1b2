// src/secrets.rs
//! Secret-store backends. The credential cache is the only caller.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::CredentialError;

/// `getSecret(name) -> JSON blob`.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String, CredentialError>;
    fn name(&self) -> &'static str;
}

/// Reads secrets from environment variables.
/// `gmail/api/credentials` is looked up as `GMAIL_API_CREDENTIALS`.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore;

pub fn env_var_for_secret(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, CredentialError> {
        let var = env_var_for_secret(name);
        match std::env::var(&var) {
            Ok(v) if !v.trim().is_empty() => Ok(v),
            _ => Err(CredentialError::SecretUnavailable(format!(
                "secret `{name}` not set (env {var})"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "env"
    }
}

/// Reads `<dir>/<name>.json`; `gmail/api/credentials` maps to `<dir>/gmail/api/credentials.json`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let rel = Path::new(name);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean || name.is_empty() {
            return None;
        }
        Some(self.dir.join(format!("{name}.json")))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, CredentialError> {
        let path = self.path_for(name).ok_or_else(|| {
            CredentialError::SecretUnavailable(format!("invalid secret name `{name}`"))
        })?;
        tokio::fs::read_to_string(&path).await.map_err(|e| {
            CredentialError::SecretUnavailable(format!("reading {}: {e}", path.display()))
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-memory store for tests and embedding callers.
#[derive(Debug, Default)]
pub struct StaticSecretStore {
    values: RwLock<HashMap<String, String>>,
    reads: AtomicUsize,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or rotate a secret.
    pub fn set(&self, name: &str, value: &str) {
        let mut g = self.values.write().unwrap_or_else(|p| p.into_inner());
        g.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) {
        let mut g = self.values.write().unwrap_or_else(|p| p.into_inner());
        g.remove(name);
    }

    /// Number of `get_secret` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, CredentialError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let g = self.values.read().unwrap_or_else(|p| p.into_inner());
        g.get(name)
            .cloned()
            .ok_or_else(|| CredentialError::SecretUnavailable(format!("secret `{name}` missing")))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
