//! Error types for azchat.
//!
//! Two families:
//! - Caller/configuration failures, raised before any request leaves the process
//! - Remote failures, surfaced to the caller exactly as the service reported them

use thiserror::Error;

/// Top-level error type for azchat.
#[derive(Debug, Error)]
pub enum AzChatError {
    // ═══════════════════════════════════════════════════════════════════
    // CALLER: bad configuration or input, detected locally
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ═══════════════════════════════════════════════════════════════════
    // REMOTE: the service or the network said no
    // ═══════════════════════════════════════════════════════════════════

    #[error("Azure OpenAI API error: {0}")]
    AzureApi(#[from] AzureApiError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INTERNAL: should not happen
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Worker task failed: {0}")]
    TaskFailed(String),
}

/// Errors returned by the Azure OpenAI data plane.
#[derive(Debug, Error)]
pub enum AzureApiError {
    #[error("Authentication failed (status {status}): {message}")]
    AuthenticationFailed { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors returned by the Entra ID token endpoint.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Token request failed (status {status}): {message}")]
    TokenRequest { status: u16, message: String },

    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),
}

impl AzChatError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Whether the error was raised before any network call.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidInput(_) | Self::Io { .. })
    }
}

/// Result type alias for azchat.
pub type Result<T> = std::result::Result<T, AzChatError>;
