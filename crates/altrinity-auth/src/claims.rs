//! JWT payload decoding.
//!
//! The signature is never checked here; the API verifies every request.

use crate::{AuthError, AuthResult};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const BASE64_URL: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Claims the sync client reads from an identity provider access token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    #[serde(default)]
    pub sub: Option<String>,
    /// Login name.
    #[serde(default)]
    pub preferred_username: Option<String>,
    /// Realm-level role assignments.
    #[serde(default)]
    pub realm_access: RealmAccess,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Claims {
    /// Expiry time, if the token carries one.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Whether the token has expired at `now`. Tokens without `exp` never do.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }
}

/// Decode the payload segment of a JWT into [`Claims`].
pub fn decode_claims(token: &str) -> AuthResult<Claims> {
    let payload = token
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| AuthError::InvalidToken("missing payload segment".to_string()))?;

    let bytes = BASE64_URL
        .decode(payload.trim_end_matches('='))
        .map_err(|e| AuthError::InvalidToken(format!("payload is not base64url: {}", e)))?;

    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &serde_json::Value) -> String {
    let header = BASE64_URL.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = BASE64_URL.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
