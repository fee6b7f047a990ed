// ── Bearer credential store ──
//
// The SHC issues JWT access tokens from POST /auth/token. We decode the
// `exp` claim (when the payload segment parses) so requests can refresh
// proactively instead of burning a round-trip on a guaranteed 2007.

use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};

/// An opaque bearer token plus its decoded expiry instant.
///
/// Replaced wholesale on refresh, never mutated. Identity (via `Arc`
/// pointer equality) is what the single-flight refresh compares to decide
/// whether another task already replaced an expired credential.
#[derive(Debug, Clone)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Wrap a raw token string, decoding the expiry claim when possible.
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        let expires_at = decode_expiry(&token);
        Self { token, expires_at }
    }

    /// The raw token string.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Decoded expiry instant, if the token payload was decodable.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// `true` only when the expiry is known and in the past. An
    /// undecodable expiry means "might still be valid" -- the request
    /// outcome decides.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| exp <= Utc::now())
    }
}

/// Decode the `exp` claim from the JWT payload segment.
///
/// Returns `None` on any shape mismatch -- the token is still usable,
/// we just can't predict its expiry.
fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

/// Holds the session's current credential.
///
/// Reads are brief and lock-scoped; all replacement goes through the
/// session's single-flight refresh lock, so two tasks never race a write.
#[derive(Debug, Default)]
pub struct TokenStore {
    current: RwLock<Option<Arc<Credential>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current credential, if any.
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Replace the stored credential wholesale.
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Arc::clone(&credential));
        credential
    }

    /// Drop the stored credential (on close).
    pub fn clear(&self) {
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    }
}
