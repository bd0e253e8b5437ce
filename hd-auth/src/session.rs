//! Session value and lifecycle events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hd_core::error::HdResult;
use hd_models::{AuthResponse, User};

use crate::credential::Credential;

/// The authenticated session: one credential plus the user it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub credential: Credential,
    #[serde(default)]
    pub user: Option<User>,
}

impl Session {
    pub fn new(credential: Credential, user: Option<User>) -> Self {
        Self { credential, user }
    }

    /// Build a session from a login or refresh response.
    pub fn from_auth_response(resp: &AuthResponse) -> HdResult<Self> {
        Ok(Self {
            credential: Credential::from_auth_response(resp)?,
            user: resp.user.clone(),
        })
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|u| u.id)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.credential.expires_at
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearReason {
    /// Explicit logout by the user or the owning application.
    Logout,
    /// The refresh exchange failed; the user must re-authenticate.
    RefreshFailed,
}

impl fmt::Display for ClearReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClearReason::Logout => write!(f, "logout"),
            ClearReason::RefreshFailed => write!(f, "refresh failed"),
        }
    }
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was created by login or restored from storage.
    Established {
        user_id: Option<i64>,
        expires_at: DateTime<Utc>,
    },
    /// The credential was rotated by a refresh.
    Refreshed { expires_at: DateTime<Utc> },
    /// The session was destroyed.
    Cleared { reason: ClearReason },
}
