//! Bearer credential value type.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// An opaque signed token with a server-asserted absolute expiry.
///
/// Lives in memory only. The token text is redacted from `Debug` output so a
/// stray `{:?}` in a log line cannot leak it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    token: String,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    claims: Map<String, Value>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
            claims: Map::new(),
        }
    }

    pub fn with_claims(mut self, claims: Map<String, Value>) -> Self {
        self.claims = claims;
        self
    }

    /// Builds a credential from a JWT, taking the expiry from its `exp` claim.
    ///
    /// The signature is not verified; the identity provider already vouched
    /// for the token and the backend verifies it on every request.
    pub fn from_jwt(token: &str) -> Option<Self> {
        let claims = decode_jwt_claims(token)?;
        let exp = claims.get("exp").and_then(Value::as_i64)?;
        let expires_at = DateTime::<Utc>::from_timestamp(exp, 0)?;
        Some(Self::new(token, expires_at).with_claims(claims))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Email claim, when the provider included one.
    pub fn email(&self) -> Option<&str> {
        self.claims.get("email").and_then(Value::as_str)
    }

    /// Lifetime left at `now`; negative once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.expires_at - now
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True when the token stays valid for at least `margin` past `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.remaining_at(now) >= margin
    }

    /// Value for the `Authorization` header.
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("claims", &self.claims.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Decodes the payload segment of a JWT without verifying it.
fn decode_jwt_claims(token: &str) -> Option<Map<String, Value>> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .ok()?;
    match serde_json::from_slice::<Value>(&payload).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/credential_tests.rs"]
mod tests;
