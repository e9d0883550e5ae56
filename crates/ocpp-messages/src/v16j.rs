//! OCPP 1.6J central-system initiated messages
//!
//! Grouped by the functional profile they belong to. Every request implements
//! [`OcppAction`], which ties it to its response payload.

use crate::OcppAction;
use chrono::{DateTime, Utc};
use ocpp_types::{common::*, v16j::*, IdToken, OcppError, OcppResult};
use serde::{Deserialize, Serialize};

/// Longest configuration key a charge point is required to accept
pub const MAX_CONFIGURATION_KEY_LEN: usize = 50;
/// Longest configuration value a charge point is required to accept
pub const MAX_CONFIGURATION_VALUE_LEN: usize = 500;

// =============================================================================
// Core Profile
// =============================================================================

/// Reset request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub reset_type: ResetType,
}

impl OcppAction for ResetRequest {
    const ACTION_NAME: &'static str = "Reset";
    type Response = ResetResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: ResetStatus,
}

/// ClearCache request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearCacheRequest {}

impl OcppAction for ClearCacheRequest {
    const ACTION_NAME: &'static str = "ClearCache";
    type Response = ClearCacheResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub status: ClearCacheStatus,
}

/// GetConfiguration request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationRequest {
    /// Keys to read, all keys when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<String>>,
}

impl OcppAction for GetConfigurationRequest {
    const ACTION_NAME: &'static str = "GetConfiguration";
    type Response = GetConfigurationResponse;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetConfigurationResponse {
    /// Known keys with their values
    #[serde(rename = "configurationKey", default, skip_serializing_if = "Option::is_none")]
    pub configuration_key: Option<Vec<KeyValue>>,
    /// Requested keys the charge point does not know
    #[serde(rename = "unknownKey", default, skip_serializing_if = "Option::is_none")]
    pub unknown_key: Option<Vec<String>>,
}

/// ChangeConfiguration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeConfigurationRequest {
    pub key: String,
    pub value: String,
}

impl OcppAction for ChangeConfigurationRequest {
    const ACTION_NAME: &'static str = "ChangeConfiguration";
    type Response = ChangeConfigurationResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.key.is_empty() || self.key.chars().count() > MAX_CONFIGURATION_KEY_LEN {
            return Err(OcppError::validation(format!(
                "configuration key must be 1..={} characters",
                MAX_CONFIGURATION_KEY_LEN
            )));
        }
        if self.value.chars().count() > MAX_CONFIGURATION_VALUE_LEN {
            return Err(OcppError::validation(format!(
                "configuration value for '{}' exceeds {} characters",
                self.key, MAX_CONFIGURATION_VALUE_LEN
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeConfigurationResponse {
    pub status: ConfigurationStatus,
}

/// UnlockConnector request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
}

impl OcppAction for UnlockConnectorRequest {
    const ACTION_NAME: &'static str = "UnlockConnector";
    type Response = UnlockConnectorResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.connector_id == 0 {
            return Err(OcppError::validation("connectorId must be greater than 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockConnectorResponse {
    pub status: UnlockStatus,
}

/// RemoteStartTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionRequest {
    /// Connector ID (optional)
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    /// ID tag
    #[serde(rename = "idTag")]
    pub id_tag: IdToken,
    /// Charging profile (optional)
    #[serde(rename = "chargingProfile", skip_serializing_if = "Option::is_none")]
    pub charging_profile: Option<ChargingProfile>,
}

impl OcppAction for RemoteStartTransactionRequest {
    const ACTION_NAME: &'static str = "RemoteStartTransaction";
    type Response = RemoteStartTransactionResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.id_tag.is_empty() || self.id_tag.len() > 20 {
            return Err(OcppError::validation("idTag must be 1..=20 characters"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStartTransactionResponse {
    pub status: RemoteStartStopStatus,
}

/// RemoteStopTransaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionRequest {
    #[serde(rename = "transactionId")]
    pub transaction_id: i32,
}

impl OcppAction for RemoteStopTransactionRequest {
    const ACTION_NAME: &'static str = "RemoteStopTransaction";
    type Response = RemoteStopTransactionResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.transaction_id <= 0 {
            return Err(OcppError::validation("transactionId must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopTransactionResponse {
    pub status: RemoteStartStopStatus,
}

/// ChangeAvailability request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityRequest {
    /// Connector ID, 0 for the whole charge point
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "type")]
    pub availability_type: AvailabilityType,
}

impl OcppAction for ChangeAvailabilityRequest {
    const ACTION_NAME: &'static str = "ChangeAvailability";
    type Response = ChangeAvailabilityResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeAvailabilityResponse {
    pub status: AvailabilityStatus,
}

// =============================================================================
// Smart Charging Profile
// =============================================================================

/// SetChargingProfile request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetChargingProfileRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    #[serde(rename = "csChargingProfiles")]
    pub cs_charging_profiles: ChargingProfile,
}

impl OcppAction for SetChargingProfileRequest {
    const ACTION_NAME: &'static str = "SetChargingProfile";
    type Response = SetChargingProfileResponse;

    fn validate(&self) -> OcppResult<()> {
        let profile = &self.cs_charging_profiles;
        if profile.charging_schedule.charging_schedule_period.is_empty() {
            return Err(OcppError::validation(
                "charging schedule must contain at least one period",
            ));
        }
        if profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile
            && profile.transaction_id.is_none()
        {
            return Err(OcppError::validation("TxProfile requires a transactionId"));
        }
        if profile.charging_profile_purpose == ChargingProfilePurposeType::ChargePointMaxProfile
            && self.connector_id != 0
        {
            return Err(OcppError::validation(
                "ChargePointMaxProfile must target connector 0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetChargingProfileResponse {
    pub status: ChargingProfileStatus,
}

/// ClearChargingProfile request, every field narrows the match
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClearChargingProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(rename = "chargingProfilePurpose", skip_serializing_if = "Option::is_none")]
    pub charging_profile_purpose: Option<ChargingProfilePurposeType>,
    #[serde(rename = "stackLevel", skip_serializing_if = "Option::is_none")]
    pub stack_level: Option<i32>,
}

impl OcppAction for ClearChargingProfileRequest {
    const ACTION_NAME: &'static str = "ClearChargingProfile";
    type Response = ClearChargingProfileResponse;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearChargingProfileResponse {
    pub status: ClearChargingProfileStatus,
}

/// GetCompositeSchedule request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCompositeScheduleRequest {
    #[serde(rename = "connectorId")]
    pub connector_id: u32,
    /// Length of the requested schedule in seconds
    pub duration: i32,
    #[serde(rename = "chargingRateUnit", skip_serializing_if = "Option::is_none")]
    pub charging_rate_unit: Option<ChargingRateUnitType>,
}

impl OcppAction for GetCompositeScheduleRequest {
    const ACTION_NAME: &'static str = "GetCompositeSchedule";
    type Response = GetCompositeScheduleResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.duration <= 0 {
            return Err(OcppError::validation("duration must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetCompositeScheduleResponse {
    pub status: GetCompositeScheduleStatus,
    #[serde(rename = "connectorId", skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(rename = "scheduleStart", skip_serializing_if = "Option::is_none")]
    pub schedule_start: Option<DateTime<Utc>>,
    #[serde(rename = "chargingSchedule", skip_serializing_if = "Option::is_none")]
    pub charging_schedule: Option<ChargingSchedule>,
}

impl GetCompositeScheduleResponse {
    /// Composite schedule carried by an accepted answer
    pub fn into_schedule(self, requested_connector: u32) -> Option<CompositeSchedule> {
        if self.status != GetCompositeScheduleStatus::Accepted {
            return None;
        }
        Some(CompositeSchedule {
            connector_id: self.connector_id.unwrap_or(requested_connector),
            schedule_start: self.schedule_start,
            charging_schedule: self.charging_schedule,
        })
    }
}

// =============================================================================
// Firmware Management Profile
// =============================================================================

/// GetDiagnostics request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDiagnosticsRequest {
    /// Upload URI for the diagnostics archive
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(rename = "retryInterval", skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<i32>,
    #[serde(rename = "startTime", skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(rename = "stopTime", skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<DateTime<Utc>>,
}

impl OcppAction for GetDiagnosticsRequest {
    const ACTION_NAME: &'static str = "GetDiagnostics";
    type Response = GetDiagnosticsResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.location.is_empty() {
            return Err(OcppError::validation("diagnostics location is required"));
        }
        if let (Some(start), Some(stop)) = (self.start_time, self.stop_time) {
            if stop < start {
                return Err(OcppError::validation("stopTime precedes startTime"));
            }
        }
        Ok(())
    }
}

/// GetDiagnostics response, data only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetDiagnosticsResponse {
    #[serde(rename = "fileName", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// UpdateFirmware request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFirmwareRequest {
    /// Download URI of the firmware image
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<i32>,
    #[serde(rename = "retrieveDate")]
    pub retrieve_date: DateTime<Utc>,
    #[serde(rename = "retryInterval", skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<i32>,
}

impl OcppAction for UpdateFirmwareRequest {
    const ACTION_NAME: &'static str = "UpdateFirmware";
    type Response = UpdateFirmwareResponse;

    fn validate(&self) -> OcppResult<()> {
        if self.location.is_empty() {
            return Err(OcppError::validation("firmware location is required"));
        }
        Ok(())
    }
}

/// UpdateFirmware carries no response fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateFirmwareResponse {}
