//! Application configuration management.
//!
//! Handles loading, saving, and accessing application configuration including
//! the API server location, realtime transport tuning, and session policy.
//! Configuration is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{HdError, HdResult};
use crate::platform::Platform;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server connection settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Realtime connection settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Session and token refresh settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the helpdesk REST API (e.g., "https://support.example.com").
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// WebSocket endpoint of the message broker. Derived from the API base
    /// URL when empty.
    #[serde(default)]
    pub ws_url: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub api_timeout_ms: u64,

    /// Timeout for the token refresh exchange in milliseconds.
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_ms: u64,
}

/// Realtime (STOMP over WebSocket) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Delay before a reconnection attempt, in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Upper bound on the reconnection delay. Equal to the base delay
    /// means a fixed delay; larger values enable exponential backoff.
    #[serde(default = "default_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,

    /// Random jitter applied to reconnection delays (0.0 - 1.0).
    #[serde(default)]
    pub reconnect_jitter: f64,

    /// Interval at which the client promises to send heartbeats (0 = never).
    #[serde(default = "default_heartbeat")]
    pub heartbeat_outgoing_ms: u64,

    /// Interval at which the client wants to receive heartbeats (0 = never).
    #[serde(default = "default_heartbeat")]
    pub heartbeat_incoming_ms: u64,

    /// Time allowed for opening the transport and completing the handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Largest inbound frame accepted before the connection is dropped.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Lead time before token expiry at which a refresh is scheduled.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    /// Path of the persisted session file. If empty, uses default location.
    #[serde(default)]
    pub storage_path: String,

    /// Force logout on any refresh failure, including network blips.
    #[serde(default = "default_true")]
    pub logout_on_transient_refresh_error: bool,

    /// Retry delay after a transient refresh failure when logout is not forced.
    #[serde(default = "default_transient_retry")]
    pub transient_retry_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_api_timeout() -> u64 {
    constants::DEFAULT_API_TIMEOUT_MS
}

fn default_refresh_timeout() -> u64 {
    constants::DEFAULT_REFRESH_TIMEOUT_MS
}

fn default_reconnect_delay() -> u64 {
    constants::RECONNECT_DELAY_SECS * 1000
}

fn default_heartbeat() -> u64 {
    constants::HEARTBEAT_INTERVAL_MS
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_max_frame_bytes() -> usize {
    1_048_576 // 1 MB
}

fn default_refresh_margin() -> u64 {
    constants::REFRESH_MARGIN_SECS
}

fn default_transient_retry() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_url: String::new(),
            api_timeout_ms: default_api_timeout(),
            refresh_timeout_ms: default_refresh_timeout(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_reconnect_delay(),
            reconnect_jitter: 0.0,
            heartbeat_outgoing_ms: default_heartbeat(),
            heartbeat_incoming_ms: default_heartbeat(),
            connect_timeout_ms: default_connect_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin(),
            storage_path: String::new(),
            logout_on_transient_refresh_error: true,
            transient_retry_secs: default_transient_retry(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl SessionConfig {
    /// Refresh lead time as a Duration.
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    /// Retry delay after a tolerated transient refresh failure.
    pub fn transient_retry(&self) -> Duration {
        Duration::from_secs(self.transient_retry_secs)
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> HdResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> HdResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default config file path.
    pub fn save_default(&self) -> HdResult<()> {
        let path = Self::default_config_path()?;
        self.save_to_file(&path)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> HdResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| HdError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> HdResult<PathBuf> {
        let config_dir = Platform::config_dir()?;
        Ok(config_dir.join("config.toml"))
    }

    /// Get the effective session file path, using the configured path or the default.
    pub fn effective_session_path(&self) -> HdResult<PathBuf> {
        if self.session.storage_path.is_empty() {
            let data_dir = Platform::data_dir()?;
            Ok(data_dir.join("session.json"))
        } else {
            Ok(PathBuf::from(&self.session.storage_path))
        }
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> HdResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let data_dir = Platform::data_dir()?;
            Ok(data_dir.join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Get the API base URL without a trailing slash.
    pub fn api_base_url(&self) -> HdResult<String> {
        let base = Self::sanitize_server_address(&self.server.api_base_url);
        if base.is_empty() {
            return Err(HdError::MissingConfig("server.api_base_url".into()));
        }
        Ok(base)
    }

    /// Get the broker WebSocket URL, deriving it from the API base URL
    /// (`http` -> `ws`, `https` -> `wss`, path `/ws`) when not set.
    pub fn effective_ws_url(&self) -> HdResult<String> {
        let explicit = self.server.ws_url.trim();
        if !explicit.is_empty() {
            return Ok(explicit.trim_end_matches('/').to_string());
        }
        let base = self.api_base_url()?;
        let derived = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}/ws")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}/ws")
        } else {
            return Err(HdError::Config(format!("unsupported api_base_url scheme: {base}")));
        };
        Ok(derived)
    }

    /// Sanitize and normalize a server address.
    ///
    /// Ensures the address has a scheme and strips trailing slashes.
    pub fn sanitize_server_address(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}

/// Thread-safe configuration holder for shared access across services.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<AppConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppConfig> {
        self.inner.write().await
    }

    /// Clone the current configuration out of the lock.
    pub async fn snapshot(&self) -> AppConfig {
        self.inner.read().await.clone()
    }

    /// Save the current configuration to disk.
    pub async fn save(&self) -> HdResult<()> {
        let config = self.inner.read().await;
        config.save_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.api_timeout_ms, 30_000);
        assert_eq!(config.realtime.reconnect_delay_ms, 5_000);
        assert_eq!(config.realtime.max_reconnect_delay_ms, 5_000);
        assert_eq!(config.realtime.heartbeat_outgoing_ms, 10_000);
        assert_eq!(config.realtime.heartbeat_incoming_ms, 10_000);
        assert_eq!(config.session.refresh_margin_secs, 300);
        assert!(config.session.logout_on_transient_refresh_error);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_ws_url_derivation() {
        let mut config = AppConfig::default();
        config.server.api_base_url = "https://support.example.com/".into();
        assert_eq!(config.effective_ws_url().unwrap(), "wss://support.example.com/ws");

        config.server.api_base_url = "localhost:8080".into();
        assert_eq!(config.effective_ws_url().unwrap(), "ws://localhost:8080/ws");

        config.server.ws_url = "wss://broker.example.com/stomp/".into();
        assert_eq!(config.effective_ws_url().unwrap(), "wss://broker.example.com/stomp");
    }

    #[test]
    fn test_missing_base_url() {
        let mut config = AppConfig::default();
        config.server.api_base_url = "  ".into();
        assert!(matches!(config.api_base_url(), Err(HdError::MissingConfig(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [realtime]
            max_reconnect_delay_ms = 60000

            [session]
            logout_on_transient_refresh_error = false
            "#,
        )
        .unwrap();
        assert_eq!(config.realtime.reconnect_delay_ms, 5_000);
        assert_eq!(config.realtime.max_reconnect_delay_ms, 60_000);
        assert!(!config.session.logout_on_transient_refresh_error);
        assert_eq!(config.session.transient_retry_secs, 30);
        assert_eq!(config.server.api_base_url, "http://localhost:8080");
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.session.refresh_margin_secs = 120;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.session.refresh_margin_secs, 120);
    }
}
