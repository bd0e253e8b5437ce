//! Authentication endpoints.

use async_trait::async_trait;
use tracing::{debug, info};

use hd_auth::{AuthRefresher, Session};
use hd_core::error::HdResult;
use hd_models::{AuthResponse, LoginRequest, RefreshRequest};

use crate::client::ApiClient;

impl ApiClient {
    /// Log in with username and password.
    ///
    /// On success an unbound client starts sending the new access token.
    pub async fn login(&self, username: &str, password: &str) -> HdResult<Session> {
        let body = serde_json::to_value(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })?;
        let resp = self.post_json::<AuthResponse>("/auth/login", &body).await?;
        let session = Session::from_auth_response(&resp.into_data()?)?;
        self.set_access_token(Some(session.credential.access_token.clone()))
            .await;
        info!("logged in as {username}");
        Ok(session)
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// Uses the dedicated refresh timeout and is never retried. The new pair
    /// is only returned; installing it is up to the session owner.
    pub async fn refresh_session(&self, refresh_token: &str) -> HdResult<Session> {
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh_token.to_string(),
        })?;
        let resp = self
            .post_with_timeout("/auth/refresh", &body, self.refresh_timeout())
            .await?;
        let envelope = Self::parse_response::<AuthResponse>(resp).await?;
        let session = Session::from_auth_response(&envelope.into_data()?)?;
        debug!("token pair refreshed");
        Ok(session)
    }

    /// Invalidate the session server-side and forget the access token.
    pub async fn logout(&self) -> HdResult<()> {
        let result = self.post("/auth/logout", &serde_json::json!({})).await;
        self.set_access_token(None).await;
        result.map(|_| ())
    }
}

#[async_trait]
impl AuthRefresher for ApiClient {
    async fn refresh(&self, refresh_token: &str) -> HdResult<Session> {
        self.refresh_session(refresh_token).await
    }
}
