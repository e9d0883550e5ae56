//! # OCPP Messages
//!
//! Request and response payloads for the OCPP 1.6J commands a central system
//! sends to a charge point, together with the validation applied before any of
//! them goes out on the wire.

pub mod v16j;

pub use ocpp_types::{Call, MessageType, Reply};
use ocpp_types::{OcppError, OcppResult};

/// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// A central-system initiated OCPP request
pub trait OcppAction: Serialize + for<'de> Deserialize<'de> + Send + Sync {
    /// The action name as defined in the OCPP specification
    const ACTION_NAME: &'static str;
    /// The payload the charge point answers with
    type Response: Serialize + for<'de> Deserialize<'de> + Send + Sync;

    /// Validate the message content
    fn validate(&self) -> OcppResult<()> {
        Ok(())
    }
}

/// Utilities for working with OCPP messages
pub mod utils {
    use super::*;

    /// Validate an action and wrap it in a Call frame
    pub fn create_call<T: OcppAction>(action: &T) -> OcppResult<Call> {
        action.validate()?;
        Call::new(T::ACTION_NAME, action)
    }

    /// Parse the payload of a successful reply as the action's response type
    pub fn parse_response<T: OcppAction>(payload: &serde_json::Value) -> OcppResult<T::Response> {
        serde_json::from_value(payload.clone()).map_err(|e| OcppError::ProtocolViolation {
            message: format!("Invalid {} response: {}", T::ACTION_NAME, e),
        })
    }

    /// Read the `status` field most responses carry
    pub fn response_status(payload: &serde_json::Value) -> Option<&str> {
        payload.get("status").and_then(serde_json::Value::as_str)
    }
}
