//! Transport layer error types

use ocpp_types::CallErrorCode;
use thiserror::Error;

/// Transport layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Message serialization error
    #[error("Message serialization error: {message}")]
    SerializationError { message: String },

    /// Frame did not follow OCPP-J framing
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    /// Message too large
    #[error("Message too large: {size} bytes exceeds limit of {limit} bytes")]
    MessageTooLarge { size: usize, limit: usize },

    /// No reply within the request timeout
    #[error("No response to {action} after {timeout_ms} ms")]
    Timeout { action: String, timeout_ms: u64 },

    /// Connection closed while a call was pending or before it was sent
    #[error("Connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// The charge point answered with a CallError
    #[error("Charge point returned {code}: {description}")]
    CallError {
        code: CallErrorCode,
        description: String,
    },

    /// Connection not ready
    #[error("Connection not ready, current state: {state:?}")]
    NotReady { state: crate::ConnectionState },

    /// Internal error
    #[error("Internal transport error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::SerializationError {
            message: err.to_string(),
        }
    }
}

impl From<ocpp_types::OcppError> for TransportError {
    fn from(err: ocpp_types::OcppError) -> Self {
        match err {
            ocpp_types::OcppError::Json { message } => {
                TransportError::SerializationError { message }
            }
            ocpp_types::OcppError::ProtocolViolation { message } => {
                TransportError::ProtocolError { message }
            }
            _ => TransportError::Internal {
                message: err.to_string(),
            },
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
