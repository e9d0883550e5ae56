//! Manufacturer specific implementations of optional station capabilities

use crate::model::{ChargingProfileRecord, ChargingStation, TenantId};
use crate::orchestrator::{Command, CommandOrchestrator, CommandResult};
use crate::{CsmsError, CsmsResult};
use async_trait::async_trait;
use dashmap::DashMap;
use ocpp_messages::v16j::{
    ChangeConfigurationRequest, ClearChargingProfileRequest, SetChargingProfileRequest,
};
use ocpp_types::v16j::{
    ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType, ChargingRateUnitType,
    ChargingSchedule,
};
use ocpp_types::CHARGE_POINT_CONNECTOR_ID;
use std::sync::Arc;
use tracing::{debug, info};

/// Profile id used for the station wide static limit
pub const STATIC_LIMITATION_PROFILE_ID: i32 = 1;

/// Schneider configuration key holding the per socket current limit
pub const SCHNEIDER_MAX_INTENSITY_KEY: &str = "maxintensitysocket";

#[async_trait]
pub trait VendorAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cap the whole station at `max_watts`
    async fn set_static_power_limitation(
        &self,
        orchestrator: &CommandOrchestrator,
        tenant: &TenantId,
        station: &ChargingStation,
        max_watts: f64,
    ) -> CsmsResult<CommandResult>;

    async fn set_charging_profile(
        &self,
        orchestrator: &CommandOrchestrator,
        tenant: &TenantId,
        station: &ChargingStation,
        connector_id: u32,
        profile: &ChargingProfile,
    ) -> CsmsResult<CommandResult> {
        orchestrator
            .execute(
                tenant,
                station,
                Command::SetChargingProfile(SetChargingProfileRequest {
                    connector_id,
                    cs_charging_profiles: profile.clone(),
                }),
            )
            .await
    }

    async fn clear_charging_profile(
        &self,
        orchestrator: &CommandOrchestrator,
        tenant: &TenantId,
        station: &ChargingStation,
        record: &ChargingProfileRecord,
    ) -> CsmsResult<CommandResult> {
        orchestrator
            .execute(
                tenant,
                station,
                Command::ClearChargingProfile(ClearChargingProfileRequest {
                    id: Some(record.profile.charging_profile_id),
                    connector_id: Some(record.connector_id),
                    ..Default::default()
                }),
            )
            .await
    }

    /// Called after a configuration change was accepted and re-read
    async fn check_update_of_ocpp_params(
        &self,
        _orchestrator: &CommandOrchestrator,
        _tenant: &TenantId,
        _station: &ChargingStation,
        _key: &str,
        _value: &str,
    ) -> CsmsResult<()> {
        Ok(())
    }
}

/// Stations that follow the smart charging profile as specified
pub struct StandardOcppVendor;

#[async_trait]
impl VendorAdapter for StandardOcppVendor {
    fn name(&self) -> &'static str {
        "standard-ocpp"
    }

    async fn set_static_power_limitation(
        &self,
        orchestrator: &CommandOrchestrator,
        tenant: &TenantId,
        station: &ChargingStation,
        max_watts: f64,
    ) -> CsmsResult<CommandResult> {
        // Express the limit in amps when the electrical layout is known
        let (unit, limit, phases) = match station.connectors.first() {
            Some(connector) if connector.voltage > 0.0 => (
                ChargingRateUnitType::A,
                (connector.watts_to_amps(max_watts) * 10.0).floor() / 10.0,
                Some(connector.effective_phases() as i32),
            ),
            _ => (ChargingRateUnitType::W, max_watts.floor(), None),
        };
        debug!(
            "Static limitation of {} W on {} as {} {:?}",
            max_watts, station.id, limit, unit
        );

        let profile = ChargingProfile {
            charging_profile_id: STATIC_LIMITATION_PROFILE_ID,
            transaction_id: None,
            stack_level: 0,
            charging_profile_purpose: ChargingProfilePurposeType::ChargePointMaxProfile,
            charging_profile_kind: ChargingProfileKindType::Absolute,
            recurrency_kind: None,
            valid_from: None,
            valid_to: None,
            charging_schedule: ChargingSchedule::constant(unit, limit, phases),
        };
        self.set_charging_profile(
            orchestrator,
            tenant,
            station,
            CHARGE_POINT_CONNECTOR_ID,
            &profile,
        )
        .await
    }
}

/// Schneider Electric EVlink stations
pub struct SchneiderVendor;

#[async_trait]
impl VendorAdapter for SchneiderVendor {
    fn name(&self) -> &'static str {
        "schneider"
    }

    async fn set_static_power_limitation(
        &self,
        orchestrator: &CommandOrchestrator,
        tenant: &TenantId,
        station: &ChargingStation,
        max_watts: f64,
    ) -> CsmsResult<CommandResult> {
        let connector = station.connectors.first().ok_or_else(|| CsmsError::Validation {
            message: format!("Charging station {} has no connector", station.id),
        })?;
        let per_socket = max_watts / station.connectors.len() as f64;
        let amps = connector.watts_to_amps(per_socket).floor();

        orchestrator
            .execute(
                tenant,
                station,
                Command::ChangeConfiguration(ChangeConfigurationRequest {
                    key: SCHNEIDER_MAX_INTENSITY_KEY.to_string(),
                    value: format!("{}", amps as i64),
                }),
            )
            .await
    }

    async fn check_update_of_ocpp_params(
        &self,
        orchestrator: &CommandOrchestrator,
        tenant: &TenantId,
        station: &ChargingStation,
        key: &str,
        value: &str,
    ) -> CsmsResult<()> {
        if !key.eq_ignore_ascii_case(SCHNEIDER_MAX_INTENSITY_KEY) {
            return Ok(());
        }
        let amps: f64 = value.trim().parse().map_err(|_| CsmsError::Validation {
            message: format!("{} is not a current: {}", SCHNEIDER_MAX_INTENSITY_KEY, value),
        })?;

        orchestrator
            .store()
            .update_charging_station(tenant, &station.id, &mut |updated: &mut ChargingStation| {
                for connector in updated.connectors.iter_mut() {
                    connector.amperage = amps;
                    connector.power = connector.amps_to_watts(amps);
                }
                updated.maximum_power = updated.connectors.iter().map(|c| c.power).sum();
                Ok(())
            })
            .await?
            .ok_or_else(|| CsmsError::not_found("ChargingStation", station.id.clone()))?;
        info!(
            "Mirrored {}={} into connectors of {}",
            SCHNEIDER_MAX_INTENSITY_KEY, value, station.id
        );
        Ok(())
    }
}

/// Resolves a vendor adapter from the station's manufacturer
pub struct VendorRegistry {
    adapters: DashMap<String, Arc<dyn VendorAdapter>>,
}

impl VendorRegistry {
    /// Registry without any adapter
    pub fn new() -> Self {
        Self {
            adapters: DashMap::new(),
        }
    }

    /// Registry with the built-in adapters
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let standard: Arc<dyn VendorAdapter> = Arc::new(StandardOcppVendor);
        for vendor in ["abb", "delta electronics", "ebee", "kempower"] {
            registry.register(vendor, standard.clone());
        }
        registry.register("schneider electric", Arc::new(SchneiderVendor));
        registry
    }

    pub fn register(&self, vendor: &str, adapter: Arc<dyn VendorAdapter>) {
        self.adapters.insert(vendor.trim().to_lowercase(), adapter);
    }

    pub fn resolve(&self, station: &ChargingStation) -> Option<Arc<dyn VendorAdapter>> {
        self.adapters
            .get(&station.vendor.trim().to_lowercase())
            .map(|adapter| adapter.clone())
    }
}

impl Default for VendorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
