//! Server response types.
//!
//! Helpdesk REST responses share a common envelope:
//! ```json
//! { "success": true, "data": { ... }, "message": "OK", "timestamp": "..." }
//! ```

use serde::{Deserialize, Serialize};

use hd_core::error::{HdError, HdResult};

/// Standard server response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T = serde_json::Value> {
    /// Whether the server handled the request successfully.
    #[serde(default)]
    pub success: bool,
    /// Response payload (type varies by endpoint).
    pub data: Option<T>,
    /// Human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Server timestamp.
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Machine-readable error code on failures.
    #[serde(default)]
    pub error_code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Whether the response indicates success.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Unwrap the payload, turning unsuccessful or empty envelopes into errors.
    pub fn into_data(self) -> HdResult<T> {
        if !self.success {
            return Err(HdError::ServerError {
                status: 200,
                message: self
                    .message
                    .unwrap_or_else(|| "request was not successful".into()),
            });
        }
        self.data
            .ok_or_else(|| HdError::Serialization("response envelope has no data".into()))
    }
}
