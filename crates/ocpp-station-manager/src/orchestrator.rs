//! Command orchestrator
//!
//! Turns abstract station operations into OCPP calls over the station's live
//! session and interprets the acknowledgement. A status other than the
//! expected one is returned to the caller, not raised; only a missing answer
//! is a hard failure.

use crate::error::UnsupportedFeature;
use crate::metrics::MetricsRegistry;
use crate::model::{ChargingProfileRecord, ChargingStation, TenantId};
use crate::registry::DeviceSessionRegistry;
use crate::store::Store;
use crate::tasks::TaskQueue;
use crate::vendor::VendorRegistry;
use crate::{CsmsError, CsmsResult};
use chrono::{DateTime, Utc};
use ocpp_messages::utils;
use ocpp_messages::v16j::*;
use ocpp_messages::OcppAction;
use ocpp_types::v16j::{ChargingProfile, ChargingRateUnitType, CompositeSchedule};
use ocpp_types::{Call, CHARGE_POINT_CONNECTOR_ID};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Commands a central system sends to a station
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reset(ResetRequest),
    ClearCache(ClearCacheRequest),
    GetConfiguration(GetConfigurationRequest),
    ChangeConfiguration(ChangeConfigurationRequest),
    UnlockConnector(UnlockConnectorRequest),
    RemoteStartTransaction(RemoteStartTransactionRequest),
    RemoteStopTransaction(RemoteStopTransactionRequest),
    SetChargingProfile(SetChargingProfileRequest),
    ClearChargingProfile(ClearChargingProfileRequest),
    GetCompositeSchedule(GetCompositeScheduleRequest),
    ChangeAvailability(ChangeAvailabilityRequest),
    GetDiagnostics(GetDiagnosticsRequest),
    UpdateFirmware(UpdateFirmwareRequest),
}

/// Apply `$body` to the request inside any command
macro_rules! with_request {
    ($command:expr, $request:ident => $body:expr) => {
        match $command {
            Command::Reset($request) => $body,
            Command::ClearCache($request) => $body,
            Command::GetConfiguration($request) => $body,
            Command::ChangeConfiguration($request) => $body,
            Command::UnlockConnector($request) => $body,
            Command::RemoteStartTransaction($request) => $body,
            Command::RemoteStopTransaction($request) => $body,
            Command::SetChargingProfile($request) => $body,
            Command::ClearChargingProfile($request) => $body,
            Command::GetCompositeSchedule($request) => $body,
            Command::ChangeAvailability($request) => $body,
            Command::GetDiagnostics($request) => $body,
            Command::UpdateFirmware($request) => $body,
        }
    };
}

fn action_name<T: OcppAction>(_request: &T) -> &'static str {
    T::ACTION_NAME
}

impl Command {
    pub fn action(&self) -> &'static str {
        with_request!(self, request => action_name(request))
    }

    pub fn validate(&self) -> CsmsResult<()> {
        with_request!(self, request => request.validate().map_err(CsmsError::from))
    }

    /// Request payload as sent on the wire
    pub fn params(&self) -> Value {
        let params = with_request!(self, request => serde_json::to_value(request));
        params.unwrap_or(Value::Null)
    }

    fn to_call(&self) -> CsmsResult<Call> {
        Ok(with_request!(self, request => utils::create_call(request))?)
    }

    /// Commands answered with data only, without a status field
    pub fn expects_status(&self) -> bool {
        !matches!(
            self,
            Command::GetConfiguration(_) | Command::GetDiagnostics(_) | Command::UpdateFirmware(_)
        )
    }

    /// Status meaning the station did what was asked
    pub fn accepted_status(&self) -> &'static str {
        match self {
            Command::UnlockConnector(_) => "Unlocked",
            _ => "Accepted",
        }
    }
}

/// Answer of a station to one command
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: &'static str,
    /// Status field when the command carries one
    pub status: Option<String>,
    pub payload: Value,
    pub duration: Duration,
    accepted: bool,
}

impl CommandResult {
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn status(&self) -> &str {
        self.status.as_deref().unwrap_or("")
    }

    /// Decode the payload as a typed response
    pub fn response_as<T: DeserializeOwned>(&self) -> CsmsResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| CsmsError::CommandExecution {
            command: self.command.to_string(),
            params: self.payload.clone(),
            message: format!("Unexpected response: {}", e),
        })
    }

    /// Turn a non accepted answer into a `CommandRejected` error
    pub fn into_accepted(self) -> CsmsResult<Self> {
        if self.accepted {
            Ok(self)
        } else {
            Err(CsmsError::CommandRejected {
                command: self.command.to_string(),
                status: self.status().to_string(),
            })
        }
    }
}

/// Outcome of one composite schedule query
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeScheduleResult {
    pub connector_id: u32,
    /// Central clock right before the query went out
    pub central_system_time: DateTime<Utc>,
    /// Station status, `Error` when the query got no usable answer
    pub status: String,
    pub schedule: Option<CompositeSchedule>,
    /// Why a per connector query failed
    pub error: Option<String>,
}

/// Issues commands to stations and applies their post-conditions
#[derive(Clone)]
pub struct CommandOrchestrator {
    sessions: Arc<DeviceSessionRegistry>,
    vendors: Arc<VendorRegistry>,
    store: Arc<dyn Store>,
    tasks: TaskQueue,
    metrics: Arc<MetricsRegistry>,
}

impl CommandOrchestrator {
    pub fn new(
        sessions: Arc<DeviceSessionRegistry>,
        vendors: Arc<VendorRegistry>,
        store: Arc<dyn Store>,
        tasks: TaskQueue,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            sessions,
            vendors,
            store,
            tasks,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn vendors(&self) -> &Arc<VendorRegistry> {
        &self.vendors
    }

    pub fn sessions(&self) -> &Arc<DeviceSessionRegistry> {
        &self.sessions
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Send a command and interpret the answer, without post-conditions
    pub async fn send(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        command: Command,
    ) -> CsmsResult<CommandResult> {
        let action = command.action();
        let call = command.to_call()?;
        let channel = self.sessions.get_or_connect(tenant, &station.id).await?;

        debug!("Sending {} to {} (tenant {})", action, station.id, tenant);
        let started = Instant::now();
        let reply = channel.call(call).await;
        let duration = started.elapsed();

        let payload = match reply {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_command_error(action);
                error!(
                    "Command {} to {} (tenant {}) got no usable response after {:?}: {}",
                    action, station.id, tenant, duration, e
                );
                return Err(CsmsError::CommandExecution {
                    command: action.to_string(),
                    params: command.params(),
                    message: e.to_string(),
                });
            }
        };
        self.metrics.record_command_sent(action, duration);

        if !command.expects_status() {
            return Ok(CommandResult {
                command: action,
                status: None,
                payload,
                duration,
                accepted: true,
            });
        }

        let status = utils::response_status(&payload).map(str::to_string);
        let accepted = status.as_deref() == Some(command.accepted_status());
        if !accepted {
            self.metrics.record_command_rejected(action);
            warn!(
                "Command {} to {} (tenant {}) answered {}",
                action,
                station.id,
                tenant,
                status.as_deref().unwrap_or("without status")
            );
        }
        Ok(CommandResult {
            command: action,
            status,
            payload,
            duration,
            accepted,
        })
    }

    /// Send a command and trigger its side effects
    pub async fn execute(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        command: Command,
    ) -> CsmsResult<CommandResult> {
        let change = match &command {
            Command::ChangeConfiguration(request) => Some(request.clone()),
            _ => None,
        };
        let result = self.send(tenant, station, command).await?;

        if let Some(change) = change {
            if result.is_accepted() {
                self.schedule_configuration_refresh(tenant, &station.id, change);
            }
        }
        Ok(result)
    }

    /// Re-read the whole configuration in the background, then run the vendor hook
    fn schedule_configuration_refresh(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        change: ChangeConfigurationRequest,
    ) {
        let orchestrator = self.clone();
        let tenant = tenant.clone();
        let station_id = charging_station_id.to_string();
        let label = format!("refresh-configuration {}/{}", tenant, station_id);

        self.tasks.submit(label, async move {
            let station = orchestrator
                .store
                .get_charging_station(&tenant, &station_id)
                .await?
                .ok_or_else(|| CsmsError::not_found("ChargingStation", station_id.clone()))?;

            let result = orchestrator
                .send(
                    &tenant,
                    &station,
                    Command::GetConfiguration(GetConfigurationRequest::default()),
                )
                .await?;
            let configuration: GetConfigurationResponse = result.response_as()?;
            let parameters = configuration.configuration_key.unwrap_or_default();
            // Only the configuration is written, the connectors may have moved on meanwhile
            let station = orchestrator
                .store
                .update_charging_station(&tenant, &station_id, &mut |current: &mut ChargingStation| {
                    current.ocpp_parameters = parameters.clone();
                    Ok(())
                })
                .await?
                .ok_or_else(|| CsmsError::not_found("ChargingStation", station_id.clone()))?;
            debug!(
                "Stored {} configuration keys for {}",
                station.ocpp_parameters.len(),
                station_id
            );

            if let Some(vendor) = orchestrator.vendors.resolve(&station) {
                vendor
                    .check_update_of_ocpp_params(
                        &orchestrator,
                        &tenant,
                        &station,
                        &change.key,
                        &change.value,
                    )
                    .await?;
            }
            Ok::<(), CsmsError>(())
        });
    }

    /// Push a profile and persist it once the station accepted it
    pub async fn set_charging_profile(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> CsmsResult<CommandResult> {
        if !station.capabilities.support_charging_profiles {
            return Err(CsmsError::FeatureNotSupported {
                charging_station_id: station.id.clone(),
                feature: UnsupportedFeature::ChargingProfiles,
            });
        }
        let vendor = self.resolve_vendor(station)?;

        let result = vendor
            .set_charging_profile(self, tenant, station, connector_id, &profile)
            .await?;
        if result.is_accepted() {
            let record = ChargingProfileRecord::new(&station.id, connector_id, profile);
            self.store.save_charging_profile(tenant, &record).await?;
            info!("Charging profile {} applied", record.id);
        }
        Ok(result)
    }

    /// Clear a profile on the station and drop its record.
    ///
    /// `Unknown` means the station no longer holds it, the record goes too.
    pub async fn clear_charging_profile(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        record: &ChargingProfileRecord,
    ) -> CsmsResult<CommandResult> {
        let vendor = self.resolve_vendor(station)?;

        let result = vendor
            .clear_charging_profile(self, tenant, station, record)
            .await?;
        if matches!(result.status(), "Accepted" | "Unknown") {
            self.store.delete_charging_profile(tenant, &record.id).await?;
            info!("Charging profile {} cleared ({})", record.id, result.status());
        }
        Ok(result)
    }

    /// Query the composite schedule.
    ///
    /// When the station refuses a station wide query, each connector is
    /// queried on its own. A connector whose query fails is reported with
    /// its error and does not discard the others.
    pub async fn get_composite_schedule(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        connector_id: u32,
        duration_secs: i32,
        unit: Option<ChargingRateUnitType>,
    ) -> CsmsResult<Vec<CompositeScheduleResult>> {
        let first = self
            .query_composite_schedule(tenant, station, connector_id, duration_secs, unit)
            .await?;
        if connector_id != CHARGE_POINT_CONNECTOR_ID || first.status == "Accepted" {
            return Ok(vec![first]);
        }

        debug!(
            "{} refused a station wide composite schedule, querying each connector",
            station.id
        );
        let mut results = Vec::with_capacity(station.connectors.len());
        for connector in &station.connectors {
            let central_system_time = Utc::now();
            let result = self
                .query_composite_schedule(
                    tenant,
                    station,
                    connector.connector_id,
                    duration_secs,
                    unit,
                )
                .await
                .unwrap_or_else(|e| {
                    warn!(
                        "Composite schedule of {}/{} failed: {}",
                        station.id, connector.connector_id, e
                    );
                    CompositeScheduleResult {
                        connector_id: connector.connector_id,
                        central_system_time,
                        status: "Error".to_string(),
                        schedule: None,
                        error: Some(e.to_string()),
                    }
                });
            results.push(result);
        }
        Ok(results)
    }

    async fn query_composite_schedule(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        connector_id: u32,
        duration_secs: i32,
        unit: Option<ChargingRateUnitType>,
    ) -> CsmsResult<CompositeScheduleResult> {
        let central_system_time = Utc::now();
        let result = self
            .send(
                tenant,
                station,
                Command::GetCompositeSchedule(GetCompositeScheduleRequest {
                    connector_id,
                    duration: duration_secs,
                    charging_rate_unit: unit,
                }),
            )
            .await?;
        let response: GetCompositeScheduleResponse = result.response_as()?;
        Ok(CompositeScheduleResult {
            connector_id,
            central_system_time,
            status: result.status().to_string(),
            schedule: response.into_schedule(connector_id),
            error: None,
        })
    }

    pub(crate) fn resolve_vendor(
        &self,
        station: &ChargingStation,
    ) -> CsmsResult<Arc<dyn crate::vendor::VendorAdapter>> {
        self.vendors
            .resolve(station)
            .ok_or_else(|| CsmsError::FeatureNotSupported {
                charging_station_id: station.id.clone(),
                feature: UnsupportedFeature::VendorImplementation,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ocpp_types::v16j::{
        ChargingProfileKindType, ChargingProfilePurposeType, ChargingSchedule, ResetType,
    };
    use serde_json::json;

    #[test]
    fn test_command_metadata() {
        let reset = Command::Reset(ResetRequest {
            reset_type: ResetType::Soft,
        });
        assert_eq!(reset.action(), "Reset");
        assert!(reset.expects_status());
        assert_eq!(reset.params(), json!({"type": "Soft"}));

        let unlock = Command::UnlockConnector(UnlockConnectorRequest { connector_id: 1 });
        assert_eq!(unlock.accepted_status(), "Unlocked");

        let config = Command::GetConfiguration(GetConfigurationRequest::default());
        assert!(!config.expects_status());
        assert_eq!(config.action(), "GetConfiguration");
    }

    #[test]
    fn test_validation_before_dispatch() {
        let stop =
            Command::RemoteStopTransaction(RemoteStopTransactionRequest { transaction_id: 0 });
        assert!(matches!(stop.validate(), Err(CsmsError::Validation { .. })));
        assert!(matches!(stop.to_call(), Err(CsmsError::Validation { .. })));

        let profile = ChargingProfile {
            charging_profile_id: 1,
            transaction_id: None,
            stack_level: 1,
            charging_profile_purpose: ChargingProfilePurposeType::TxProfile,
            charging_profile_kind: ChargingProfileKindType::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule::constant(ChargingRateUnitType::A, 16.0, None),
        };
        let set = Command::SetChargingProfile(SetChargingProfileRequest {
            connector_id: 1,
            cs_charging_profiles: profile,
        });
        assert!(set.validate().is_err());
    }

    #[test]
    fn test_result_helpers() {
        let result = CommandResult {
            command: "Reset",
            status: Some("Rejected".to_string()),
            payload: json!({"status": "Rejected"}),
            duration: Duration::from_millis(3),
            accepted: false,
        };
        let typed: ResetResponse = result.response_as().unwrap();
        assert_eq!(serde_json::to_value(typed.status).unwrap(), json!("Rejected"));

        let err = result.into_accepted().unwrap_err();
        assert!(matches!(err, CsmsError::CommandRejected { ref status, .. } if status == "Rejected"));
    }
}
