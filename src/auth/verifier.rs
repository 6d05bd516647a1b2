// src/auth/verifier.rs
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};

use crate::auth::jwks::JwksCache;
use crate::error::AuthError;

/// `aud` may be a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::One(a) => a == aud,
            Audience::Many(v) => v.iter().any(|a| a == aud),
        }
    }
}

/// Claims of a verified push token. Only meaningful after `verify` succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedClaims {
    pub iss: String,
    pub aud: Audience,
    #[serde(default)]
    pub sub: Option<String>,
    /// Service account the push subscription authenticates as.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify signature, issuer, audience and expiry.
    /// `expected_audience` comes from the caller's request context, never from the token.
    async fn verify(
        &self,
        token: &str,
        expected_audience: &str,
        expected_issuer: &str,
    ) -> Result<VerifiedClaims, AuthError>;
}

/// RS256 verification against the issuer's published keys.
pub struct JwtVerifier {
    keys: Arc<JwksCache>,
    leeway_secs: u64,
}

impl JwtVerifier {
    pub fn new(keys: Arc<JwksCache>, leeway_secs: u64) -> Self {
        Self { keys, leeway_secs }
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(
        &self,
        token: &str,
        expected_audience: &str,
        expected_issuer: &str,
    ) -> Result<VerifiedClaims, AuthError> {
        if expected_audience.trim().is_empty() {
            return Err(AuthError::InvalidClaims("no expected audience".into()));
        }

        // The header is read before any signature check; only `alg` and `kid` are used.
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::Malformed(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthError::Malformed("token has no key id".into()))?;

        let key = self.keys.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[expected_audience]);
        validation.set_issuer(&[expected_issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);
        validation.leeway = self.leeway_secs;

        decode::<VerifiedClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| map_jwt_error(e.kind()))
    }
}

fn map_jwt_error(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidAudience => AuthError::InvalidClaims("audience mismatch".into()),
        ErrorKind::InvalidIssuer => AuthError::InvalidClaims("issuer mismatch".into()),
        ErrorKind::ImmatureSignature => AuthError::InvalidClaims("token not yet valid".into()),
        ErrorKind::MissingRequiredClaim(c) => AuthError::InvalidClaims(format!("missing `{c}`")),
        other => AuthError::Malformed(format!("{other:?}")),
    }
}
