//! Password hashing, session tokens and authentication middleware.
//!
//! Passwords are stored as `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.
//! Bearer tokens are random; only their SHA-256 is persisted. The middleware
//! resolves `Authorization: Bearer <token>` and injects an `Identity` into the
//! request extensions.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use medai_core::types::Identity;

use crate::error::ApiError;
use crate::state::AppState;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

// =============================================================================
// Passwords
// =============================================================================

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let salt: [u8; SALT_LEN] = rand::rng().random();
    let mut hash = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut hash);
    format!(
        "{}${}${}${}",
        HASH_SCHEME,
        iterations,
        hex::encode(salt),
        hex::encode(hash)
    )
}

/// A well-formed hash with the given cost that no password verifies against.
///
/// Login checks unknown usernames against it so they cost the same as
/// wrong passwords.
pub fn unmatchable_hash(iterations: u32) -> String {
    format!(
        "{}${}${}${}",
        HASH_SCHEME,
        iterations,
        hex::encode([0u8; SALT_LEN]),
        hex::encode([0u8; HASH_LEN])
    )
}

/// Check a password against an encoded hash in constant time.
///
/// Malformed encodings never verify.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut fields = encoded.split('$');
    let (Some(scheme), Some(iterations), Some(salt), Some(expected), None) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let (Ok(iterations), Ok(salt), Ok(expected)) = (
        iterations.parse::<u32>(),
        hex::decode(salt),
        hex::decode(expected),
    ) else {
        return false;
    };
    if iterations == 0 || expected.is_empty() {
        return false;
    }

    let mut actual = vec![0u8; expected.len()];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, iterations, &mut actual);
    actual.ct_eq(&expected).into()
}

// =============================================================================
// Tokens
// =============================================================================

/// Generate a random 64-character hex session token.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// Hex SHA-256 of a token, the form stored in the sessions table.
pub fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extract the bearer token, if an Authorization header is present.
///
/// A header that is present but not a well-formed bearer credential is an
/// error rather than "no token".
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| {
        ApiError::Unauthorized("Invalid Authorization header encoding".to_string())
    })?;
    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Some)
        .ok_or_else(|| ApiError::Unauthorized("Invalid bearer token".to_string()))
}

fn resolve_identity(state: &AppState, token: &str) -> Result<Identity, ApiError> {
    state
        .sessions
        .resolve(&token_hash(token), Utc::now())?
        .ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".to_string()))
}

// =============================================================================
// Middleware
// =============================================================================

/// Middleware for routes that need a logged-in user.
///
/// Returns 401 if the token is missing, unknown or expired.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let identity = match bearer_token(req.headers()) {
        Ok(Some(token)) => resolve_identity(&state, token),
        Ok(None) => Err(ApiError::Unauthorized(
            "Missing Authorization header".to_string(),
        )),
        Err(e) => Err(e),
    };

    match identity {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Middleware for routes open to anonymous callers.
///
/// No Authorization header means anonymous. A header that does not resolve
/// to a live session is rejected with 401.
pub async fn optional_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let identity = match bearer_token(req.headers()) {
        Ok(Some(token)) => resolve_identity(&state, token).map(Some),
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    };

    match identity {
        Ok(Some(identity)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Ok(None) => next.run(req).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_hash_and_verify() {
        let encoded = hash_password("correct horse", 1_000);
        assert!(encoded.starts_with("pbkdf2-sha256$1000$"));
        assert!(verify_password("correct horse", &encoded));
        assert!(!verify_password("wrong horse", &encoded));
    }

    #[test]
    fn test_hash_uses_fresh_salt() {
        let a = hash_password("secret", 10);
        let b = hash_password("secret", 10);
        assert_ne!(a, b);
        assert!(verify_password("secret", &a));
        assert!(verify_password("secret", &b));
    }

    #[test]
    fn test_unmatchable_hash_runs_full_cost_and_never_verifies() {
        let encoded = unmatchable_hash(1_000);
        assert!(encoded.starts_with("pbkdf2-sha256$1000$"));
        assert_eq!(encoded.split('$').count(), 4);
        assert!(!verify_password("", &encoded));
        assert!(!verify_password("s3cret", &encoded));
    }

    #[test]
    fn test_verify_rejects_malformed() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "plaintext"));
        assert!(!verify_password("x", "bcrypt$10$00$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$abc$00$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$0$00$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$10$zz$00"));
        assert!(!verify_password("x", "pbkdf2-sha256$10$00$00$extra"));
    }

    #[test]
    fn test_generate_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_token_hash_is_stable() {
        assert_eq!(token_hash("abc"), token_hash("abc"));
        assert_ne!(token_hash("abc"), token_hash("abd"));
        assert_eq!(
            token_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Ok(None)));

        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).unwrap(), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcg=="));
        assert!(bearer_token(&headers).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());
    }
}
