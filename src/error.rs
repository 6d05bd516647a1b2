//! Error taxonomy for the ingestion components.
//!
//! Each component owns one enum; the pipeline maps them onto response codes.
//! Messages never carry credential material.

use thiserror::Error;

/// Push-token verification failures. All of them end the invocation with 401.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token could not be parsed, uses an unsupported algorithm or has no `kid`.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// No issuer key matches the token's key id, even after a key-set refresh.
    #[error("unknown signing key: {0}")]
    UnknownKey(String),

    /// The issuer key set could not be fetched or contained an unusable key.
    #[error("issuer keys unavailable: {0}")]
    KeysUnavailable(String),

    #[error("invalid token signature")]
    InvalidSignature,

    /// Issuer, audience or another required claim did not match.
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),

    #[error("token expired")]
    Expired,
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Malformed(_) => "malformed",
            AuthError::UnknownKey(_) => "unknown_key",
            AuthError::KeysUnavailable(_) => "keys_unavailable",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidClaims(_) => "invalid_claims",
            AuthError::Expired => "expired",
        }
    }
}

/// Secret-store and credential parsing failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The store is unreachable or the named secret does not exist.
    #[error("secret unavailable: {0}")]
    SecretUnavailable(String),

    /// The secret exists but is not a usable credential.
    #[error("malformed credential: {0}")]
    Malformed(String),
}

impl CredentialError {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialError::SecretUnavailable(_) => "secret_unavailable",
            CredentialError::Malformed(_) => "credential_malformed",
        }
    }
}

/// Message retrieval failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The provider rejected the credential, including after one forced refresh.
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),

    /// The message id is permanently invalid. Never retried.
    #[error("message not found: {0}")]
    NotFound(String),

    /// Transient failures persisted past the retry budget.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Unauthorized(_) => "unauthorized",
            FetchError::NotFound(_) => "not_found",
            FetchError::Unavailable(_) => "unavailable",
            FetchError::Credential(e) => e.kind(),
        }
    }
}

/// Alert persistence failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend error; the pipeline retries these.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An existing record could not be read back. Not retried.
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::Corrupt(_) => "store_corrupt",
        }
    }
}

/// Watch registration failures. Reported to the scheduler, never retried here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("watch registration failed: {0}")]
    RegistrationFailed(String),
}

impl From<CredentialError> for WatchError {
    fn from(e: CredentialError) -> Self {
        WatchError::RegistrationFailed(e.to_string())
    }
}
