// src/config/mod.rs
pub mod app;

pub use app::{
    AppConfig, AuthConfig, ClassifierConfig, ClassifierStrategy, GmailConfig, SecretBackend,
    SecretsConfig, StoreBackend, StoreConfig, WatchConfig, ENV_CONFIG_PATH,
};
