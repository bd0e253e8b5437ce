//! HTTP client for the helpdesk REST API.
//!
//! Handles bearer authentication, timeout management, exponential backoff
//! retry for idempotent requests, and status-to-error mapping.

use std::sync::{Arc, PoisonError, RwLock as StdRwLock, Weak};
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use hd_auth::CredentialSource;
use hd_core::config::{AppConfig, ServerConfig};
use hd_core::constants;
use hd_core::error::{HdError, HdResult};

use crate::response::ApiResponse;

/// Retry configuration for HTTP requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// HTTP status codes that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            retryable_statuses: vec![502, 503, 504],
        }
    }
}

/// Whether a request may be retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Allowed,
    Never,
}

/// HTTP client for communicating with the helpdesk backend.
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    /// Base URL for the API (e.g. "https://example.com/api/v1").
    api_root: String,
    /// Default request timeout.
    timeout: Duration,
    /// Timeout for the refresh exchange.
    refresh_timeout: Duration,
    /// Access token attached to authenticated requests when no session
    /// is bound.
    access_token: Arc<RwLock<Option<String>>>,
    /// Session the bearer is read from on every request.
    credentials: Arc<StdRwLock<Option<Weak<dyn CredentialSource>>>>,
    /// Retry configuration.
    retry_config: RetryConfig,
}

impl ApiClient {
    /// Create a new ApiClient from server configuration.
    pub fn new(config: &ServerConfig) -> HdResult<Self> {
        let base = AppConfig::sanitize_server_address(&config.api_base_url);
        if base.is_empty() {
            return Err(HdError::MissingConfig("server.api_base_url".into()));
        }

        let inner = Client::builder()
            .timeout(Duration::from_millis(config.api_timeout_ms))
            .connect_timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| HdError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            api_root: format!("{base}/api/{}", constants::API_VERSION),
            timeout: Duration::from_millis(config.api_timeout_ms),
            refresh_timeout: Duration::from_millis(config.refresh_timeout_ms),
            access_token: Arc::new(RwLock::new(None)),
            credentials: Arc::new(StdRwLock::new(None)),
            retry_config: RetryConfig::default(),
        })
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Get the current API root URL.
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    /// Timeout applied to the refresh exchange.
    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    /// Set or clear the bearer token used for authenticated requests.
    pub async fn set_access_token(&self, token: Option<String>) {
        let mut guard = self.access_token.write().await;
        *guard = token;
        if guard.is_some() {
            debug!("api access token set");
        } else {
            debug!("api access token cleared");
        }
    }

    /// Read the bearer from `source` on every request.
    ///
    /// Once bound, the session is the only place the token comes from: a
    /// cleared or failed session sends requests without `Authorization`.
    pub fn bind_credentials(&self, source: Weak<dyn CredentialSource>) {
        *self
            .credentials
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(source);
        debug!("api bearer bound to session");
    }

    async fn bearer(&self) -> Option<String> {
        let bound = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match bound {
            Some(source) => source
                .upgrade()
                .and_then(|s| s.current_credential())
                .map(|c| c.access_token),
            None => self.access_token.read().await.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_root)
    }

    /// Internal: build a request for the given method, URL, timeout, and optional JSON body.
    async fn build_request(
        &self,
        method: Method,
        url: &str,
        timeout: Duration,
        body: Option<&serde_json::Value>,
    ) -> RequestBuilder {
        let mut builder = self.inner.request(method, url).timeout(timeout);
        if let Some(token) = self.bearer().await {
            builder = builder.bearer_auth(token);
        }
        if let Some(b) = body {
            builder = builder.json(b);
        }
        builder
    }

    /// Execute a request, retrying transient failures when allowed.
    async fn execute(
        &self,
        method: Method,
        path: &str,
        timeout: Duration,
        body: Option<&serde_json::Value>,
        retry: Retry,
    ) -> HdResult<Response> {
        let url = self.url(path);
        debug!("{} {}", method, path);

        let max_retries = match retry {
            Retry::Allowed => self.retry_config.max_retries,
            Retry::Never => 0,
        };
        let mut last_error: Option<HdError> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay = self.calculate_retry_delay(attempt - 1);
                warn!(
                    "retrying {} {} (attempt {}/{}) after {:.1}s",
                    method,
                    path,
                    attempt + 1,
                    max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            let builder = self.build_request(method.clone(), &url, timeout, body).await;

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();

                    if self
                        .retry_config
                        .retryable_statuses
                        .contains(&status.as_u16())
                        && attempt < max_retries
                    {
                        warn!("retryable status {} from {}", status.as_u16(), path);
                        last_error = Some(HdError::ServerError {
                            status: status.as_u16(),
                            message: format!("retryable status {status}"),
                        });
                        continue;
                    }

                    return Self::check_status(response).await;
                }
                Err(e) => {
                    let is_retryable = e.is_timeout() || e.is_connect();
                    let err = Self::classify_error(e);

                    if is_retryable && attempt < max_retries {
                        warn!("retryable error on {}: {}", path, err);
                        last_error = Some(err);
                        continue;
                    }

                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| HdError::Http("max retries exceeded".into())))
    }

    /// Calculate retry delay with exponential backoff.
    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_config.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(32));
        let max_ms = self.retry_config.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    // --- Public HTTP methods ---

    /// Execute a GET request with automatic retry.
    pub async fn get(&self, path: &str) -> HdResult<Response> {
        self.execute(Method::GET, path, self.timeout, None, Retry::Allowed)
            .await
    }

    /// Execute a POST request with a JSON body. POSTs are never retried.
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> HdResult<Response> {
        self.execute(Method::POST, path, self.timeout, Some(body), Retry::Never)
            .await
    }

    /// Execute a POST with a custom timeout and no retry.
    pub async fn post_with_timeout(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> HdResult<Response> {
        self.execute(Method::POST, path, timeout, Some(body), Retry::Never)
            .await
    }

    // --- Response helpers ---

    /// Deserialize a response body into an ApiResponse<T>.
    pub async fn parse_response<T: DeserializeOwned>(
        response: Response,
    ) -> HdResult<ApiResponse<T>> {
        response
            .json::<ApiResponse<T>>()
            .await
            .map_err(|e| HdError::Serialization(format!("failed to parse response: {e}")))
    }

    /// Convenience: GET + parse into ApiResponse<T>.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> HdResult<ApiResponse<T>> {
        let resp = self.get(path).await?;
        Self::parse_response(resp).await
    }

    /// Convenience: POST + parse into ApiResponse<T>.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> HdResult<ApiResponse<T>> {
        let resp = self.post(path, body).await?;
        Self::parse_response(resp).await
    }

    /// Check the HTTP status code and convert to HdError if needed.
    async fn check_status(response: Response) -> HdResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }

    /// Classify a reqwest error into an HdError variant.
    fn classify_error(e: reqwest::Error) -> HdError {
        if e.is_timeout() {
            HdError::Timeout(e.to_string())
        } else if e.is_connect() {
            HdError::Http(format!("connection failed: {e}"))
        } else {
            HdError::Http(e.to_string())
        }
    }
}

/// Map a non-success status and its body to an error.
fn status_error(status: StatusCode, body: &str) -> HdError {
    let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(body)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let detail = if message.is_empty() { status.to_string() } else { message };
        return HdError::Unauthorized(detail);
    }

    HdError::ServerError {
        status: status.as_u16(),
        message,
    }
}
