//! OCPP 1.6J specific types and enums

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Connector status as reported by StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointStatus {
    /// Available for new transaction
    Available,
    /// Preparing for transaction
    Preparing,
    /// Charging in progress
    Charging,
    /// Charging suspended by EV
    SuspendedEV,
    /// Charging suspended by EVSE
    SuspendedEVSE,
    /// Transaction finished, cable still plugged
    Finishing,
    /// Reserved for specific user
    Reserved,
    /// Out of order
    Faulted,
    /// Unavailable due to local or remote action
    Unavailable,
}

impl ChargePointStatus {
    /// Faulted and Unavailable connectors cannot take a new transaction
    pub fn blocks_new_transaction(&self) -> bool {
        matches!(self, ChargePointStatus::Faulted | ChargePointStatus::Unavailable)
    }
}

impl Default for ChargePointStatus {
    fn default() -> Self {
        ChargePointStatus::Available
    }
}

/// Error code reported alongside a connector status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
}

impl Default for ChargePointErrorCode {
    fn default() -> Self {
        ChargePointErrorCode::NoError
    }
}

/// Remote start/stop status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RemoteStartStopStatus {
    Accepted,
    Rejected,
}

/// Unlock status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum UnlockStatus {
    Unlocked,
    UnlockFailed,
    NotSupported,
}

/// ChangeConfiguration status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConfigurationStatus {
    Accepted,
    Rejected,
    /// Reboot required for configuration to take effect
    RebootRequired,
    NotSupported,
}

/// Reset type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResetType {
    /// Hard reset (reboot)
    Hard,
    /// Soft reset (restart software)
    Soft,
}

/// Reset status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ResetStatus {
    Accepted,
    Rejected,
}

/// Clear cache status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ClearCacheStatus {
    Accepted,
    Rejected,
}

/// Charging profile purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingProfilePurposeType {
    /// Station wide maximum
    ChargePointMaxProfile,
    /// Default for new transactions
    TxDefaultProfile,
    /// Bound to one running transaction
    TxProfile,
}

/// Charging profile kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingProfileKindType {
    Absolute,
    Recurring,
    Relative,
}

/// Recurrency kind for charging profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RecurrencyKindType {
    Daily,
    Weekly,
}

/// Charging schedule period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSchedulePeriod {
    /// Start period offset in seconds from start of schedule
    #[serde(rename = "startPeriod")]
    pub start_period: i32,
    /// Limit expressed in the schedule's rate unit
    pub limit: f64,
    /// Number of phases (optional)
    #[serde(rename = "numberPhases", skip_serializing_if = "Option::is_none")]
    pub number_phases: Option<i32>,
}

/// Charging schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSchedule {
    /// Duration in seconds (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i32>,
    /// Start schedule timestamp (optional)
    #[serde(rename = "startSchedule", skip_serializing_if = "Option::is_none")]
    pub start_schedule: Option<DateTime<Utc>>,
    /// Charging rate unit
    #[serde(rename = "chargingRateUnit")]
    pub charging_rate_unit: ChargingRateUnitType,
    /// Charging schedule periods
    #[serde(rename = "chargingSchedulePeriod")]
    pub charging_schedule_period: Vec<ChargingSchedulePeriod>,
    /// Minimum charging rate (optional)
    #[serde(rename = "minChargingRate", skip_serializing_if = "Option::is_none")]
    pub min_charging_rate: Option<f64>,
}

impl ChargingSchedule {
    /// Single period schedule holding `limit` from the start
    pub fn constant(unit: ChargingRateUnitType, limit: f64, number_phases: Option<i32>) -> Self {
        Self {
            duration: None,
            start_schedule: None,
            charging_rate_unit: unit,
            charging_schedule_period: vec![ChargingSchedulePeriod {
                start_period: 0,
                limit,
                number_phases,
            }],
            min_charging_rate: None,
        }
    }
}

/// Charging rate unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargingRateUnitType {
    /// Watts
    W,
    /// Amperes
    A,
}

/// Charging profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingProfile {
    /// Unique identifier
    #[serde(rename = "chargingProfileId")]
    pub charging_profile_id: i32,
    /// Transaction ID (for TxProfile only, optional)
    #[serde(rename = "transactionId", skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    /// Stack level (for priority)
    #[serde(rename = "stackLevel")]
    pub stack_level: i32,
    /// Purpose of the profile
    #[serde(rename = "chargingProfilePurpose")]
    pub charging_profile_purpose: ChargingProfilePurposeType,
    /// Kind of profile
    #[serde(rename = "chargingProfileKind")]
    pub charging_profile_kind: ChargingProfileKindType,
    /// Recurrency kind (optional)
    #[serde(rename = "recurrencyKind", skip_serializing_if = "Option::is_none")]
    pub recurrency_kind: Option<RecurrencyKindType>,
    /// Valid from timestamp (optional)
    #[serde(rename = "validFrom", skip_serializing_if = "Option::is_none")]
    pub valid_from: Option<DateTime<Utc>>,
    /// Valid to timestamp (optional)
    #[serde(rename = "validTo", skip_serializing_if = "Option::is_none")]
    pub valid_to: Option<DateTime<Utc>>,
    /// Charging schedule
    #[serde(rename = "chargingSchedule")]
    pub charging_schedule: ChargingSchedule,
}

/// SetChargingProfile status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargingProfileStatus {
    Accepted,
    Rejected,
    NotSupported,
}

/// ClearChargingProfile status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ClearChargingProfileStatus {
    Accepted,
    /// The station holds no matching profile
    Unknown,
}

/// GetCompositeSchedule status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum GetCompositeScheduleStatus {
    Accepted,
    Rejected,
}

/// Composite schedule of one connector as computed by the station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSchedule {
    /// Connector the schedule applies to (0 = whole station)
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    /// Start of the schedule
    #[serde(rename = "scheduleStart", skip_serializing_if = "Option::is_none")]
    pub schedule_start: Option<DateTime<Utc>>,
    /// Resulting schedule
    #[serde(rename = "chargingSchedule", skip_serializing_if = "Option::is_none")]
    pub charging_schedule: Option<ChargingSchedule>,
}
