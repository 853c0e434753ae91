//! Client error types.

use thiserror::Error;

use calbridge_protocol::ErrorResponse;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection to the daemon failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol/framing error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Request timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A command-line argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The daemon returned an error response.
    #[error("{0}")]
    Server(ErrorResponse),
}

impl From<ErrorResponse> for ClientError {
    fn from(error: ErrorResponse) -> Self {
        Self::Server(error)
    }
}
