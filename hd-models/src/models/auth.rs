//! Authentication payloads and user profiles.

use serde::{Deserialize, Serialize};

/// Authenticated user profile as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub fio: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(default)]
    pub specialist: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl User {
    /// Full name when known, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.fio.as_deref().filter(|s| !s.is_empty()).unwrap_or(&self.username)
    }

    /// Whether the user holds the given role (case-sensitive, e.g. "ADMIN").
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Abbreviated user reference embedded in other payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserShort {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub fio: Option<String>,
}

impl UserShort {
    /// Full name when known, otherwise the username.
    pub fn display_name(&self) -> &str {
        self.fio.as_deref().filter(|s| !s.is_empty()).unwrap_or(&self.username)
    }
}

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body of `POST /auth/refresh`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Token pair issued by login and refresh.
///
/// Older servers nest the profile under `userAuthResponse` instead of `user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default, alias = "userAuthResponse")]
    pub user: Option<User>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}
