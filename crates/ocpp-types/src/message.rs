//! Message envelope exchanged with a charge point
//!
//! The station manager only ever originates `Call` frames; the device answers
//! each one with either a `CallResult` or a `CallError` carrying the same
//! unique id.

use crate::{CallErrorCode, MessageType, OcppError, OcppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A request sent from the central system to a charge point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Unique message identifier used to pair the reply
    pub unique_id: String,
    /// Action name (e.g. "RemoteStartTransaction")
    pub action: String,
    /// Request payload
    pub payload: Value,
}

impl Call {
    /// Build a call with a fresh unique id
    pub fn new<T: Serialize>(action: impl Into<String>, payload: &T) -> OcppResult<Self> {
        Ok(Call {
            unique_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Encode as the OCPP-J array `[2, id, action, payload]`
    pub fn to_frame(&self) -> Value {
        Value::Array(vec![
            Value::from(u8::from(MessageType::Call)),
            Value::String(self.unique_id.clone()),
            Value::String(self.action.clone()),
            self.payload.clone(),
        ])
    }
}

/// Device answer to a [`Call`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Successful answer with a response payload
    Result { unique_id: String, payload: Value },
    /// Protocol level failure reported by the device
    Error {
        unique_id: String,
        error_code: CallErrorCode,
        description: String,
        details: Value,
    },
}

impl Reply {
    /// Successful reply for the given call id
    pub fn result(unique_id: impl Into<String>, payload: Value) -> Self {
        Reply::Result {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Error reply for the given call id
    pub fn error(
        unique_id: impl Into<String>,
        error_code: CallErrorCode,
        description: impl Into<String>,
    ) -> Self {
        Reply::Error {
            unique_id: unique_id.into(),
            error_code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Reply::Result { unique_id, .. } | Reply::Error { unique_id, .. } => unique_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Reply::Result { .. } => MessageType::CallResult,
            Reply::Error { .. } => MessageType::CallError,
        }
    }

    /// Decode an OCPP-J reply frame (`[3, id, payload]` or `[4, id, code, desc, details]`)
    pub fn from_frame(frame: &Value) -> OcppResult<Self> {
        let items = frame.as_array().ok_or_else(|| OcppError::ProtocolViolation {
            message: "frame is not a JSON array".to_string(),
        })?;

        let type_id = items
            .first()
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| OcppError::ProtocolViolation {
                message: "missing message type id".to_string(),
            })?;
        let unique_id = items
            .get(1)
            .and_then(Value::as_str)
            .ok_or_else(|| OcppError::ProtocolViolation {
                message: "missing unique id".to_string(),
            })?
            .to_string();

        match MessageType::try_from(type_id)? {
            MessageType::CallResult => Ok(Reply::Result {
                unique_id,
                payload: items.get(2).cloned().unwrap_or(Value::Null),
            }),
            MessageType::CallError => {
                let code = items.get(2).cloned().unwrap_or(Value::Null);
                let error_code: CallErrorCode =
                    serde_json::from_value(code).map_err(|e| OcppError::ProtocolViolation {
                        message: format!("unknown error code: {}", e),
                    })?;
                Ok(Reply::Error {
                    unique_id,
                    error_code,
                    description: items
                        .get(3)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    details: items
                        .get(4)
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default())),
                })
            }
            MessageType::Call => Err(OcppError::ProtocolViolation {
                message: "expected a reply, got a Call".to_string(),
            }),
        }
    }

    /// Encode as an OCPP-J array
    pub fn to_frame(&self) -> Value {
        match self {
            Reply::Result { unique_id, payload } => Value::Array(vec![
                Value::from(u8::from(MessageType::CallResult)),
                Value::String(unique_id.clone()),
                payload.clone(),
            ]),
            Reply::Error {
                unique_id,
                error_code,
                description,
                details,
            } => Value::Array(vec![
                Value::from(u8::from(MessageType::CallError)),
                Value::String(unique_id.clone()),
                Value::String(error_code.as_str().to_string()),
                Value::String(description.clone()),
                details.clone(),
            ]),
        }
    }
}
