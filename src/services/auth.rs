//! Token verifier — resolves an opaque bearer credential to a user.
//!
//! DESIGN
//! ======
//! Tokens are 32 random bytes, hex-encoded, stored hashed. Verification is
//! a local well-formedness check plus exactly one lookup against the user
//! backing store.
//!
//! Every rejection — malformed token, expired session, unknown user — is
//! the same opaque [`AuthError`]. Callers and clients learn nothing about
//! which part failed; the specific reason only appears in server logs.

use std::fmt::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::event::WireCode;
use crate::presence::UserIdentity;

/// Uniform authentication failure. Deliberately carries no detail.
#[derive(Debug, thiserror::Error)]
#[error("authentication failed")]
pub struct AuthError;

impl WireCode for AuthError {
    fn wire_code(&self) -> &'static str {
        "E_AUTH"
    }
}

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

fn hash_token(token: &str) -> String {
    bytes_to_hex(&Sha256::digest(token.as_bytes()))
}

fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

fn well_formed(token: &str) -> bool {
    token.len() == 64 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Create a session for the given user, returning the bearer token. Only the
/// hash is stored.
///
/// # Errors
///
/// Returns a database error if the insert fails.
pub async fn create_session(pool: &PgPool, user_id: i64, ttl_ms: i64) -> Result<String, sqlx::Error> {
    let token = generate_token();
    sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(now_ms().saturating_add(ttl_ms))
        .execute(pool)
        .await?;
    Ok(token)
}

/// Resolve a bearer token to a user identity.
///
/// # Errors
///
/// Returns the opaque [`AuthError`] for any failure: malformed token,
/// expired or unknown session, or a backing-store fault.
pub async fn verify_token(pool: &PgPool, token: &str) -> Result<UserIdentity, AuthError> {
    if !well_formed(token) {
        debug!("auth: malformed token");
        return Err(AuthError);
    }

    let row = sqlx::query(
        "SELECT u.id, u.username, u.role
         FROM sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.token_hash = $1 AND s.expires_at > $2",
    )
    .bind(hash_token(token))
    .bind(now_ms())
    .fetch_optional(pool)
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "auth: session lookup failed");
        AuthError
    })?;

    let Some(row) = row else {
        debug!("auth: unknown or expired session");
        return Err(AuthError);
    };

    Ok(UserIdentity { id: row.get("id"), username: row.get("username"), role: row.get("role") })
}

/// Delete a session by its bearer token.
///
/// # Errors
///
/// Returns a database error if the delete fails.
pub async fn delete_session(pool: &PgPool, token: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(hash_token(token))
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
