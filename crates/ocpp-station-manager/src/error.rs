//! Error types for station management operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Optional station capability an operation depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedFeature {
    /// Station does not declare static power limitation
    StaticPowerLimitation,
    /// Station does not declare charging profile support
    ChargingProfiles,
    /// No vendor adapter resolves for the station
    VendorImplementation,
}

impl std::fmt::Display for UnsupportedFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            UnsupportedFeature::StaticPowerLimitation => "static power limitation",
            UnsupportedFeature::ChargingProfiles => "charging profiles",
            UnsupportedFeature::VendorImplementation => "vendor implementation",
        })
    }
}

/// Stable code the HTTP layer maps to a status and a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    DeviceUnreachable,
    CommandExecution,
    CommandRejected,
    FeatureNotSupported,
    VendorNotSupported,
    ExistingTransaction,
    /// Resource held by another holder, or a recompute skipped for that reason
    LockUnavailable,
    ProfileCleanupFailed,
    NotFound,
    Authorization,
    Validation,
    TransactionAlreadyStopped,
    ConnectorNotAvailable,
    Store,
    Configuration,
    Internal,
}

/// Main error type for station management operations
#[derive(Error, Debug, Clone)]
pub enum CsmsError {
    /// No live session could be obtained for the station
    #[error("Charging station {charging_station_id} unreachable: {message}")]
    DeviceUnreachable {
        charging_station_id: String,
        message: String,
    },

    /// Command sent but no usable response came back
    #[error("Command {command} failed: {message}")]
    CommandExecution {
        command: String,
        params: serde_json::Value,
        message: String,
    },

    /// Station answered with a non accepted status
    #[error("Command {command} rejected with status {status}")]
    CommandRejected { command: String, status: String },

    #[error("Charging station {charging_station_id} does not support {feature}")]
    FeatureNotSupported {
        charging_station_id: String,
        feature: UnsupportedFeature,
    },

    /// Deletion blocked by a transaction that has not stopped
    #[error("Charging station {charging_station_id} has transaction {transaction_id} in progress on connector {connector_id}")]
    ExistingTransaction {
        charging_station_id: String,
        connector_id: u32,
        transaction_id: i32,
    },

    /// A site area edit could not take the lock a running recompute holds
    #[error("Lock on {resource} unavailable")]
    LockUnavailable { resource: String },

    #[error("Charging profile cleanup failed on site area {site_area_id}: {in_success} deleted, {in_error} failed")]
    ProfileCleanupFailed {
        site_area_id: String,
        in_success: usize,
        in_error: usize,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Authorization error: {message}")]
    Authorization { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Transaction {transaction_id} already stopped")]
    TransactionAlreadyStopped { transaction_id: i32 },

    #[error("Connector not available: {charging_station_id}/{connector_id}: {reason}")]
    ConnectorNotAvailable {
        charging_station_id: String,
        connector_id: u32,
        reason: String,
    },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CsmsError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CsmsError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CsmsError::Validation {
            message: message.into(),
        }
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        CsmsError::Authorization {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        CsmsError::Store {
            message: message.into(),
        }
    }

    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            CsmsError::DeviceUnreachable { .. } => ErrorCode::DeviceUnreachable,
            CsmsError::CommandExecution { .. } => ErrorCode::CommandExecution,
            CsmsError::CommandRejected { .. } => ErrorCode::CommandRejected,
            CsmsError::FeatureNotSupported {
                feature: UnsupportedFeature::VendorImplementation,
                ..
            } => ErrorCode::VendorNotSupported,
            CsmsError::FeatureNotSupported { .. } => ErrorCode::FeatureNotSupported,
            CsmsError::ExistingTransaction { .. } => ErrorCode::ExistingTransaction,
            CsmsError::LockUnavailable { .. } => ErrorCode::LockUnavailable,
            CsmsError::ProfileCleanupFailed { .. } => ErrorCode::ProfileCleanupFailed,
            CsmsError::NotFound { .. } => ErrorCode::NotFound,
            CsmsError::Authorization { .. } => ErrorCode::Authorization,
            CsmsError::Validation { .. } => ErrorCode::Validation,
            CsmsError::TransactionAlreadyStopped { .. } => ErrorCode::TransactionAlreadyStopped,
            CsmsError::ConnectorNotAvailable { .. } => ErrorCode::ConnectorNotAvailable,
            CsmsError::Store { .. } => ErrorCode::Store,
            CsmsError::Configuration { .. } => ErrorCode::Configuration,
            CsmsError::Internal { .. } => ErrorCode::Internal,
        }
    }
}

impl From<ocpp_types::OcppError> for CsmsError {
    fn from(err: ocpp_types::OcppError) -> Self {
        match err {
            ocpp_types::OcppError::ValidationError { message } => CsmsError::Validation { message },
            _ => CsmsError::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl From<ocpp_transport::TransportError> for CsmsError {
    fn from(err: ocpp_transport::TransportError) -> Self {
        use ocpp_transport::TransportError;
        match err {
            TransportError::NotReady { .. } | TransportError::ConnectionClosed { .. } => {
                CsmsError::DeviceUnreachable {
                    charging_station_id: String::new(),
                    message: err.to_string(),
                }
            }
            _ => CsmsError::Internal {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CsmsError {
    fn from(err: serde_json::Error) -> Self {
        CsmsError::Internal {
            message: format!("Serialization error: {}", err),
        }
    }
}

impl From<prometheus::Error> for CsmsError {
    fn from(err: prometheus::Error) -> Self {
        CsmsError::Internal {
            message: format!("Metrics error: {}", err),
        }
    }
}

/// Result type for station management operations
pub type CsmsResult<T> = Result<T, CsmsError>;
