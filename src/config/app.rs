// src/config/app.rs
//! Service configuration.
//!
//! Lookup order:
//! 1) $INGEST_CONFIG_PATH (must exist when set)
//! 2) config/ingest.toml
//! 3) built-in defaults
//!
//! A few environment variables override the file afterwards (see [`AppConfig::apply_env`]).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::retry::Backoff;

pub const ENV_CONFIG_PATH: &str = "INGEST_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/ingest.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub gmail: GmailConfig,
    pub secrets: SecretsConfig,
    pub store: StoreConfig,
    pub classifier: ClassifierConfig,
    pub watch: WatchConfig,
    pub metrics_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub issuer: String,
    /// Expected `aud`: the full push endpoint URL. Required to start the service.
    pub audience: Option<String>,
    pub jwks_url: String,
    pub jwks_ttl_secs: u64,
    /// Minimum spacing between forced refreshes on an unknown `kid`.
    pub jwks_min_refresh_secs: u64,
    pub leeway_secs: u64,
    pub timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "https://accounts.google.com".into(),
            audience: None,
            jwks_url: "https://www.googleapis.com/oauth2/v3/certs".into(),
            jwks_ttl_secs: 3_600,
            jwks_min_refresh_secs: 60,
            leeway_secs: 30,
            timeout_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    pub api_base: String,
    pub user_id: String,
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
    pub fetch_retry: Backoff,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            api_base: "https://gmail.googleapis.com".into(),
            user_id: "me".into(),
            connect_timeout_ms: 4_000,
            timeout_ms: 8_000,
            fetch_retry: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretBackend {
    #[default]
    Env,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub backend: SecretBackend,
    /// Root directory for the `file` backend.
    pub dir: PathBuf,
    pub credential_secret: String,
    pub retry: Backoff,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackend::Env,
            dir: PathBuf::from("secrets"),
            credential_secret: "gmail/api/credentials".into(),
            retry: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub dir: PathBuf,
    pub table: String,
    /// Upper bound for the serialized `email_data` of one record.
    pub max_payload_bytes: usize,
    pub retry: Backoff,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            dir: PathBuf::from("data/alerts"),
            table: "trade-alerts".into(),
            max_payload_bytes: 256 * 1024,
            retry: Backoff::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierStrategy {
    Unknown,
    #[default]
    Rules,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub strategy: ClassifierStrategy,
    /// JSON rule file; the built-in rules are used when unset.
    pub rules_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub enabled: bool,
    /// `projects/<project>/topics/<topic>`
    pub topic: String,
    pub label_ids: Vec<String>,
    pub interval_secs: u64,
    pub validity_secs: u64,
    pub margin_secs: u64,
    pub retry_after_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: String::new(),
            label_ids: vec!["INBOX".into()],
            interval_secs: 24 * 3_600,
            validity_secs: 7 * 24 * 3_600,
            margin_secs: 24 * 3_600,
            retry_after_secs: 15 * 60,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s)?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing config from {}", path.display()))
    }

    /// Load using env var + fallbacks, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let default_p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_p.exists() {
                Self::load_from(&default_p)?
            } else {
                AppConfig::default()
            }
        };
        cfg.apply_env();
        Ok(cfg)
    }

    /// Environment overrides:
    /// INGEST_AUDIENCE, GMAIL_WATCH_TOPIC, ALERT_STORE_DIR, GMAIL_SECRET_NAME, CLASSIFIER_RULES_PATH.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_nonempty("INGEST_AUDIENCE") {
            self.auth.audience = Some(v);
        }
        if let Some(v) = env_nonempty("GMAIL_WATCH_TOPIC") {
            self.watch.topic = v;
        }
        if let Some(v) = env_nonempty("ALERT_STORE_DIR") {
            self.store.dir = PathBuf::from(v);
        }
        if let Some(v) = env_nonempty("GMAIL_SECRET_NAME") {
            self.secrets.credential_secret = v;
        }
        if let Some(v) = env_nonempty("CLASSIFIER_RULES_PATH") {
            self.classifier.rules_path = Some(PathBuf::from(v));
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = AppConfig::default();
        assert_eq!(c.auth.issuer, "https://accounts.google.com");
        assert_eq!(c.store.table, "trade-alerts");
        assert_eq!(c.store.max_payload_bytes, 262_144);
        assert_eq!(c.gmail.fetch_retry, Backoff::new(3, 200, 2_000));
        assert_eq!(c.watch.label_ids, vec!["INBOX".to_string()]);
        assert_eq!(c.classifier.strategy, ClassifierStrategy::Rules);
        assert!(!c.watch.enabled);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c = AppConfig::from_toml_str(
            r#"
            metrics_enabled = true

            [auth]
            audience = "https://ingest.example.com/push"

            [store]
            backend = "memory"
            retry = { attempts = 5 }

            [watch]
            enabled = true
            topic = "projects/p/topics/gmail"
            "#,
        )
        .unwrap();
        assert!(c.metrics_enabled);
        assert_eq!(c.auth.audience.as_deref(), Some("https://ingest.example.com/push"));
        assert_eq!(c.auth.leeway_secs, 30);
        assert_eq!(c.store.backend, StoreBackend::Memory);
        assert_eq!(c.store.retry, Backoff::new(5, 200, 2_000));
        assert_eq!(c.watch.interval_secs, 86_400);
        assert_eq!(c.gmail.user_id, "me");
    }

    #[test]
    fn unknown_backend_is_an_error() {
        assert!(AppConfig::from_toml_str("[store]\nbackend = \"dynamo\"").is_err());
    }
}
