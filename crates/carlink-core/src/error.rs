//! Connector error taxonomy

use thiserror::Error;

/// Result type for connector operations
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors that can occur anywhere in the connector core
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Required credentials could not be resolved (fatal at startup)
    #[error("Credential error: {0}")]
    Credential(String),

    /// Login was rejected by the remote identity service (fatal per session)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transient network failure (connection reset, 5xx, timeout on reads)
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// A single resource could not be fetched; contained per attribute
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The remote API rejected a command (bad S-PIN, unsupported operation)
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// A command could not reach the remote API; retryable by the caller
    #[error("Command transport failure: {0}")]
    CommandTransport(String),

    /// A command failed local validation before submission
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Remote response could not be parsed
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Remote API returned an unexpected error status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request exceeded its bounded timeout
    #[error("Request timed out")]
    Timeout,
}

impl ConnectorError {
    /// Create an API error from status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Whether the caller may retry the failed operation as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::TransientNetwork(_)
                | ConnectorError::CommandTransport(_)
                | ConnectorError::Timeout
        )
    }

    /// Whether this error ends the session until restart or credential fix
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectorError::Credential(_)
                | ConnectorError::Authentication(_)
                | ConnectorError::Config(_)
        )
    }
}
