//! Errors produced while framing and decoding wire messages.

use thiserror::Error;

/// Result type for framing and decoding operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Failures in the length-prefixed JSON wire format.
///
/// Every variant here maps to something a peer can actually put on the
/// wire: a bad length prefix, a truncated frame, a payload that is not the
/// envelope JSON, or a connection that stalled mid-frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The length prefix claims more than [`crate::MAX_MESSAGE_SIZE`] bytes.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: u32, max: u32 },

    /// The length prefix claims zero bytes.
    #[error("zero-length message")]
    EmptyMessage,

    /// The buffer ends before the framed payload does.
    #[error("truncated frame: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// The payload is not the JSON the envelope schema expects.
    #[error("malformed payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A read or write did not finish within the connection deadline.
    #[error("timed out while trying to {operation}")]
    Timeout { operation: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_limit_and_operation() {
        let err = ProtocolError::MessageTooLarge {
            size: 2_000_000,
            max: crate::MAX_MESSAGE_SIZE,
        };
        assert!(err.to_string().contains("1048576"));

        let err = ProtocolError::Timeout {
            operation: "read frame length".to_string(),
        };
        assert!(err.to_string().contains("read frame length"));
    }
}
