use std::fmt;

use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::error::AuthError;

/// Lifetime assumed when the token response carries neither `expires_in`
/// nor a decodable JWT `exp` claim.
const FALLBACK_LIFETIME_SECS: i64 = 30 * 60;

/// Bearer credential handed to request builders. `Debug` never prints it.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// One grant's current credentials.
#[derive(Clone)]
pub struct Token {
    pub access: AccessToken,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// `true` when the token outlives `now + margin`.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now.checked_add_signed(margin)
            .is_some_and(|deadline| self.expires_at > deadline)
    }

    /// Build a token from an exchange response.
    ///
    /// The provider may omit a rotated refresh token, in which case the one
    /// that was spent stays valid.
    #[must_use]
    pub fn from_response(response: TokenResponse, spent_refresh: &str, now: DateTime<Utc>) -> Self {
        let expires_at = response
            .expires_in
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .or_else(|| decode_expiry(&response.access_token).ok())
            .unwrap_or_else(|| now + Duration::seconds(FALLBACK_LIFETIME_SECS));
        Self {
            access: AccessToken(response.access_token),
            refresh_token: response
                .refresh_token
                .filter(|rt| !rt.is_empty())
                .unwrap_or_else(|| spent_refresh.to_string()),
            expires_at,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access", &self.access)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Body of a successful `refresh_token` grant.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Decode the JWT `exp` claim without verifying the signature.
///
/// # Errors
///
/// Returns `AuthError::Jwt` if the token is not a three-part JWT or the `exp`
/// claim is missing or unparseable.
pub fn decode_expiry(jwt: &str) -> Result<DateTime<Utc>, AuthError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::Jwt("invalid JWT format".into()));
    }
    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1].trim_end_matches('='))
        .map_err(|e| AuthError::Jwt(format!("base64 decode failed: {e}")))?;
    let value: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::Jwt(format!("JSON parse failed: {e}")))?;
    let exp = value["exp"]
        .as_i64()
        .ok_or_else(|| AuthError::Jwt("missing exp claim".into()))?;
    DateTime::from_timestamp(exp, 0).ok_or_else(|| AuthError::Jwt("invalid exp timestamp".into()))
}
