// src/auth/mod.rs
//! Push-request authentication: bearer extraction and OIDC token verification.

pub mod jwks;
pub mod verifier;

pub use jwks::{HttpKeySource, Jwk, JwkSet, JwksCache, KeySource};
pub use verifier::{Audience, JwtVerifier, TokenVerifier, VerifiedClaims};

/// Token from an `Authorization: Bearer <token>` value.
/// The scheme is case-insensitive; anything else (including an empty token) is `None`.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() || token.contains(char::is_whitespace) {
        None
    } else {
        Some(token)
    }
}
