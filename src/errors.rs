//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers all error cases the Gmail MCP server may encounter. Each variant maps
/// to an appropriate MCP error code in [`ErrorData`].
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid user input (validation failed, header injection, missing attachment source)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Malformed base64 or base64url data
    #[error("decode failed: {0}")]
    Decode(String),
    /// Attachment byte fetch failed while assembling an outgoing message
    #[error("attachment fetch failed: {0}")]
    Fetch(String),
    /// Gmail response is missing expected structure
    #[error("unexpected response shape: {0}")]
    Schema(String),
    /// Resource not found (account, message, thread, draft, label)
    #[error("not found: {0}")]
    NotFound(String),
    /// Authentication failure (expired or revoked token, missing scope)
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Request exceeded the configured timeout
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Gmail API returned a non-success status not covered above
    #[error("gmail api error: {0}")]
    Upstream(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput`, `Decode` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `AuthFailed` → `invalid_request`
    /// - `Fetch`, `Schema`, `Timeout`, `Upstream`, `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::Decode(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "decode" })))
            }
            Self::Fetch(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "fetch" })))
            }
            Self::Schema(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "schema" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::AuthFailed(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "auth_failed" })))
            }
            Self::Timeout(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "timeout" })))
            }
            Self::Upstream(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "upstream" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;
