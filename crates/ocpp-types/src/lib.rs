//! # OCPP Types
//!
//! Foundational OCPP 1.6J types used by the station manager: the message
//! envelope exchanged with a charge point, the status enums carried in command
//! acknowledgements, and the smart-charging data structures.

pub mod common;
pub mod error;
pub mod message;
pub mod v16j;

pub use error::*;
pub use message::*;

/// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;

/// Connector id addressing the whole charge point rather than one socket
pub const CHARGE_POINT_CONNECTOR_ID: u32 = 0;

/// Message type identifier for OCPP messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = OcppError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(MessageType::Call),
            3 => Ok(MessageType::CallResult),
            4 => Ok(MessageType::CallError),
            _ => Err(OcppError::InvalidMessageType(value)),
        }
    }
}

impl From<MessageType> for u8 {
    fn from(msg_type: MessageType) -> Self {
        msg_type as u8
    }
}

/// Identifier token (RFID badge, app token...) used throughout OCPP
pub type IdToken = String;
