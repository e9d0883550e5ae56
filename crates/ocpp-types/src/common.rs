//! Types shared by several OCPP messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Configuration key/value pair as reported by GetConfiguration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    /// Configuration key name
    pub key: String,
    /// Configuration value (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Whether the value is read-only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readonly: Option<bool>,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            readonly: Some(false),
        }
    }
}

/// Id tag info containing authorization data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTagInfo {
    /// Authorization status
    pub status: AuthorizationStatus,
    /// Parent id tag (optional)
    #[serde(rename = "parentIdTag", skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
    /// Expiry date (optional)
    #[serde(rename = "expiryDate", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl IdTagInfo {
    pub fn with_status(status: AuthorizationStatus) -> Self {
        Self {
            status,
            parent_id_tag: None,
            expiry_date: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == AuthorizationStatus::Accepted
    }
}

/// Authorization status for id tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    /// Identifier is allowed for charging
    Accepted,
    /// Identifier has been blocked
    Blocked,
    /// Identifier has expired
    Expired,
    /// Identifier is invalid
    Invalid,
    /// Identifier is already involved in another transaction
    ConcurrentTx,
}

/// Answer to a ChangeAvailability request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityStatus {
    Accepted,
    Rejected,
    /// Applied once the running transaction ends
    Scheduled,
}

/// Target availability of a connector or charge point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AvailabilityType {
    /// Make available for new transactions
    Operative,
    /// Stop accepting new transactions
    Inoperative,
}
