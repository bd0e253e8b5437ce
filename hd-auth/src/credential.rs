//! Access credentials and JWT expiry decoding.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use hd_core::error::{HdError, HdResult};
use hd_models::AuthResponse;

/// `exp` claims above this value are milliseconds rather than seconds.
const MILLIS_THRESHOLD: f64 = 1e12;

/// An access/refresh token pair plus the decoded access token expiry.
///
/// A credential is valid only while `now < expires_at`. Credentials are
/// immutable; a refresh produces a new one.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Build a credential from raw tokens.
    ///
    /// The expiry comes from the access token's `exp` claim. When the token
    /// is opaque or carries no claim, `expires_in` (seconds from now) is used
    /// instead; with neither the token is rejected.
    pub fn from_tokens(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: Option<i64>,
    ) -> HdResult<Self> {
        let access_token = access_token.into();
        let expires_at = match decode_expiry(&access_token) {
            Ok(Some(exp)) => exp,
            Ok(None) => fallback_expiry(expires_in)?,
            Err(e) => {
                debug!("access token expiry not decodable ({e}), using expiresIn");
                fallback_expiry(expires_in)?
            }
        };
        Ok(Self::new(access_token, refresh_token, expires_at))
    }

    /// Build a credential from a login or refresh response.
    pub fn from_auth_response(resp: &AuthResponse) -> HdResult<Self> {
        Self::from_tokens(&resp.access_token, &resp.refresh_token, resp.expires_in)
    }

    /// Whether the credential is still accepted at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether the credential has expired.
    pub fn is_expired(&self) -> bool {
        !self.is_valid_at(Utc::now())
    }

    /// Remaining lifetime, zero once expired.
    pub fn time_to_expiry(&self) -> std::time::Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or_default()
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

// Tokens never reach logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn fallback_expiry(expires_in: Option<i64>) -> HdResult<DateTime<Utc>> {
    match expires_in {
        Some(secs) if secs > 0 => Ok(Utc::now() + chrono::Duration::seconds(secs)),
        _ => Err(HdError::Token("access token carries no expiry".into())),
    }
}

/// Read the `exp` claim of a JWT without verifying its signature.
///
/// Returns `Ok(None)` when the payload has no `exp` claim.
pub fn decode_expiry(token: &str) -> HdResult<Option<DateTime<Utc>>> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| HdError::Token("not a JWT".into()))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| HdError::Token(format!("invalid payload encoding: {e}")))?;

    let claims: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| HdError::Token(format!("invalid payload json: {e}")))?;

    let Some(exp) = claims.get("exp").and_then(|v| v.as_f64()) else {
        return Ok(None);
    };

    let millis = if exp > MILLIS_THRESHOLD { exp } else { exp * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .map(Some)
        .ok_or_else(|| HdError::Token(format!("exp out of range: {exp}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: serde_json::Value) -> String {
        format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    #[test]
    fn test_decode_seconds_exp() {
        let token = jwt(serde_json::json!({"sub": "42", "exp": 1_700_000_000}));
        let exp = decode_expiry(&token).unwrap().unwrap();
        assert_eq!(exp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_millis_exp() {
        let token = jwt(serde_json::json!({"exp": 1_700_000_000_123_i64}));
        let exp = decode_expiry(&token).unwrap().unwrap();
        assert_eq!(exp.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_missing_exp() {
        let token = jwt(serde_json::json!({"sub": "42"}));
        assert!(decode_expiry(&token).unwrap().is_none());
        assert!(matches!(decode_expiry("opaque"), Err(HdError::Token(_))));
    }

    #[test]
    fn test_from_tokens_prefers_claim() {
        let token = jwt(serde_json::json!({"exp": 1_700_000_000}));
        let cred = Credential::from_tokens(token, "r", Some(60)).unwrap();
        assert_eq!(cred.expires_at.timestamp(), 1_700_000_000);
        assert!(cred.is_expired());
    }

    #[test]
    fn test_from_tokens_falls_back_to_expires_in() {
        let cred = Credential::from_tokens("opaque-token", "r", Some(900)).unwrap();
        let remaining = cred.time_to_expiry().as_secs();
        assert!(remaining > 890 && remaining <= 900);
        assert!(Credential::from_tokens("opaque-token", "r", None).is_err());
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let cred = Credential::new("secret-access", "secret-refresh", Utc::now());
        let rendered = format!("{cred:?}");
        assert!(!rendered.contains("secret"));
        assert_eq!(cred.bearer(), "Bearer secret-access");
    }
}
