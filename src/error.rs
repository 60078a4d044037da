use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error payload carried inside response envelopes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Error code the server uses when a bearer token is no longer valid.
pub const TOKEN_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("Driver is not open")]
    NotOpen,

    #[error("The transaction has been closed")]
    TransactionClosed,

    #[error("The transaction has been closed because of: {0}")]
    TransactionClosedWithCause(String),

    #[error("Authentication token expired")]
    TokenExpired,

    #[error("Illegal internal state: {0}")]
    IllegalState(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server error [{}]: {}", .0.code, .0.message)]
    Server(ServerError),

    #[error("Message too large")]
    MessageTooLarge,
}

pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    /// Whether this error signals an expired bearer token, the only error
    /// class the driver ever retries (exactly once, after renewal).
    pub fn is_token_expired(&self) -> bool {
        matches!(self, DriverError::TokenExpired)
    }

    pub(crate) fn from_server(err: ServerError) -> Self {
        if err.code == TOKEN_EXPIRED_CODE {
            DriverError::TokenExpired
        } else {
            DriverError::Server(err)
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::from_server(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DriverError::NotOpen;
        assert_eq!(err.to_string(), "Driver is not open");

        let err = DriverError::TransactionClosed;
        assert_eq!(err.to_string(), "The transaction has been closed");

        let err = DriverError::TransactionClosedWithCause("connection reset".to_string());
        assert_eq!(
            err.to_string(),
            "The transaction has been closed because of: connection reset"
        );

        let err = DriverError::Timeout("schema lock acquire".to_string());
        assert_eq!(err.to_string(), "Operation timed out: schema lock acquire");

        let err = DriverError::Transport("connection refused".to_string());
        assert_eq!(err.to_string(), "Transport failure: connection refused");

        let err = DriverError::Server(ServerError::new("QUERY_SYNTAX", "unexpected token"));
        assert_eq!(
            err.to_string(),
            "Server error [QUERY_SYNTAX]: unexpected token"
        );
    }

    #[test]
    fn test_token_expiry_mapping() {
        let err = DriverError::from_server(ServerError::new(TOKEN_EXPIRED_CODE, "expired"));
        assert!(err.is_token_expired());

        let err = DriverError::from_server(ServerError::new("AUTH_FAILED", "bad password"));
        assert!(!err.is_token_expired());
        assert!(matches!(err, DriverError::Server(_)));
    }
}
