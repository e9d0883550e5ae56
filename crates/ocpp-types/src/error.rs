//! Error types for OCPP operations

use thiserror::Error;

/// Main error type for OCPP payload handling
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcppError {
    /// Invalid message type identifier
    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    /// JSON serialization/deserialization error
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Protocol violation
    #[error("Protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Message validation error
    #[error("Message validation error: {message}")]
    ValidationError { message: String },
}

impl OcppError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        OcppError::ValidationError {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for OcppError {
    fn from(err: serde_json::Error) -> Self {
        OcppError::Json {
            message: err.to_string(),
        }
    }
}

/// OCPP CallError codes as defined in the specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CallErrorCode {
    /// Requested Action is not known by receiver
    NotImplemented,
    /// Requested Action is recognized but not supported by the receiver
    NotSupported,
    /// An internal error occurred and the receiver was not able to process the requested Action
    InternalError,
    /// Payload for Action is incomplete
    ProtocolError,
    /// A security issue prevented the receiver from completing the Action
    SecurityError,
    /// Payload is syntactically incorrect or does not conform to the PDU structure
    FormationViolation,
    /// At least one field contains an invalid value
    PropertyConstraintViolation,
    /// At least one field violates occurrence constraints
    OccurrenceConstraintViolation,
    /// At least one field violates data type constraints
    TypeConstraintViolation,
    /// Any other error not covered by the above
    GenericError,
}

impl CallErrorCode {
    /// Wire name of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type alias for OCPP operations
pub type OcppResult<T> = Result<T, OcppError>;
