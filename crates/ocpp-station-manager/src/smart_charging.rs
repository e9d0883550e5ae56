//! Smart charging: power allocation across a site area
//!
//! A recompute runs under an exclusive site area lock. Strategies only
//! compute allocations; pushing them goes through the orchestrator so a
//! profile is persisted only once its station accepted it.

use crate::config::SmartChargingConfig;
use crate::error::UnsupportedFeature;
use crate::lock::{LockGuard, LockManager};
use crate::metrics::MetricsRegistry;
use crate::model::{ChargingStation, LockEntity, SiteArea, TenantId};
use crate::orchestrator::{CommandOrchestrator, CommandResult};
use crate::store::Store;
use crate::{CsmsError, CsmsResult};
use async_trait::async_trait;
use dashmap::DashMap;
use ocpp_types::v16j::{
    ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType, ChargingRateUnitType,
    ChargingSchedule,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Profile ids of scheduler profiles are this base plus the connector id
pub const SMART_CHARGING_PROFILE_ID_BASE: i32 = 100;

/// Power granted to one connector
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorAllocation {
    pub charging_station_id: String,
    pub connector_id: u32,
    pub transaction_id: i32,
    /// Granted power in W
    pub watts: f64,
    pub profile: ChargingProfile,
}

/// Computes per connector allocations for a site area
#[async_trait]
pub trait SmartChargingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compute(
        &self,
        tenant: &TenantId,
        site_area: &SiteArea,
        stations: &[ChargingStation],
    ) -> CsmsResult<Vec<ConnectorAllocation>>;
}

/// Shares the site cap between charging connectors by water filling:
/// connectors needing less than an equal share get their full power and the
/// remainder is split between the others.
pub struct ProportionalStrategy {
    stack_level: i32,
}

struct Candidate<'a> {
    station: &'a ChargingStation,
    connector_id: u32,
    transaction_id: i32,
    max_watts: f64,
}

impl ProportionalStrategy {
    pub fn new(stack_level: i32) -> Self {
        Self { stack_level }
    }

    pub fn allocate(&self, site_area: &SiteArea, stations: &[ChargingStation]) -> Vec<ConnectorAllocation> {
        let mut candidates = Vec::new();
        for station in stations {
            if !station.capabilities.support_charging_profiles || station.inactive {
                continue;
            }
            for connector in &station.connectors {
                let Some(transaction_id) = connector.active_transaction_id else {
                    continue;
                };
                if connector.power <= 0.0 || connector.status.blocks_new_transaction() {
                    continue;
                }
                candidates.push(Candidate {
                    station,
                    connector_id: connector.connector_id,
                    transaction_id,
                    max_watts: connector.power,
                });
            }
        }

        let mut granted = vec![None; candidates.len()];
        let mut remaining = site_area.maximum_power.max(0.0);
        loop {
            let open: Vec<usize> = (0..candidates.len())
                .filter(|i| granted[*i].is_none())
                .collect();
            if open.is_empty() {
                break;
            }
            let share = remaining / open.len() as f64;
            let mut settled = false;
            for i in &open {
                if candidates[*i].max_watts <= share {
                    granted[*i] = Some(candidates[*i].max_watts);
                    remaining -= candidates[*i].max_watts;
                    settled = true;
                }
            }
            if !settled {
                for i in open {
                    granted[i] = Some(share);
                }
                break;
            }
        }

        candidates
            .iter()
            .zip(granted)
            .filter_map(|(candidate, watts)| {
                let watts = watts?;
                let connector = candidate.station.connector(candidate.connector_id)?;
                // Round down so the profile never exceeds the granted power
                let amps = (connector.watts_to_amps(watts) * 10.0).floor() / 10.0;
                Some(ConnectorAllocation {
                    charging_station_id: candidate.station.id.clone(),
                    connector_id: candidate.connector_id,
                    transaction_id: candidate.transaction_id,
                    watts,
                    profile: ChargingProfile {
                        charging_profile_id: SMART_CHARGING_PROFILE_ID_BASE
                            + candidate.connector_id as i32,
                        transaction_id: Some(candidate.transaction_id),
                        stack_level: self.stack_level,
                        charging_profile_purpose: ChargingProfilePurposeType::TxProfile,
                        charging_profile_kind: ChargingProfileKindType::Absolute,
                        recurrency_kind: None,
                        valid_from: None,
                        valid_to: None,
                        charging_schedule: ChargingSchedule::constant(
                            ChargingRateUnitType::A,
                            amps,
                            Some(connector.effective_phases() as i32),
                        ),
                    },
                })
            })
            .collect()
    }
}

#[async_trait]
impl SmartChargingStrategy for ProportionalStrategy {
    fn name(&self) -> &'static str {
        "proportional"
    }

    async fn compute(
        &self,
        _tenant: &TenantId,
        site_area: &SiteArea,
        stations: &[ChargingStation],
    ) -> CsmsResult<Vec<ConnectorAllocation>> {
        Ok(self.allocate(site_area, stations))
    }
}

/// Resolves the strategy of a tenant, falling back to a default
pub struct StrategyRegistry {
    default: Option<Arc<dyn SmartChargingStrategy>>,
    tenants: DashMap<TenantId, Arc<dyn SmartChargingStrategy>>,
}

impl StrategyRegistry {
    pub fn new(default: Option<Arc<dyn SmartChargingStrategy>>) -> Self {
        Self {
            default,
            tenants: DashMap::new(),
        }
    }

    pub fn from_config(config: &SmartChargingConfig) -> CsmsResult<Self> {
        let default: Arc<dyn SmartChargingStrategy> = match config.default_strategy.as_str() {
            "proportional" => Arc::new(ProportionalStrategy::new(config.profile_stack_level)),
            other => {
                return Err(CsmsError::Configuration {
                    message: format!("Unknown smart charging strategy: {}", other),
                })
            }
        };
        Ok(Self::new(Some(default)))
    }

    pub fn set_tenant_strategy(&self, tenant: &TenantId, strategy: Arc<dyn SmartChargingStrategy>) {
        self.tenants.insert(tenant.clone(), strategy);
    }

    pub fn resolve(&self, tenant: &TenantId) -> Option<Arc<dyn SmartChargingStrategy>> {
        self.tenants
            .get(tenant)
            .map(|strategy| strategy.clone())
            .or_else(|| self.default.clone())
    }
}

/// Per connector results of one recompute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeReport {
    pub site_area_id: String,
    pub applied: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Stations left alone because they cannot take charging profiles
    pub skipped_stations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecomputeOutcome {
    Applied(RecomputeReport),
    /// Another recompute holds the site area; nothing was done
    LockUnavailable,
    /// No strategy resolves for the tenant
    NoStrategy,
    /// Smart charging is off on the site area
    Disabled,
}

impl RecomputeOutcome {
    fn label(&self) -> &'static str {
        match self {
            RecomputeOutcome::Applied(_) => "applied",
            RecomputeOutcome::LockUnavailable => "lock_unavailable",
            RecomputeOutcome::NoStrategy => "no_strategy",
            RecomputeOutcome::Disabled => "disabled",
        }
    }
}

/// Counts of a bulk profile operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionsResponse {
    #[serde(rename = "inSuccess")]
    pub in_success: usize,
    #[serde(rename = "inError")]
    pub in_error: usize,
}

pub struct SmartChargingScheduler {
    store: Arc<dyn Store>,
    locks: LockManager,
    strategies: Arc<StrategyRegistry>,
    orchestrator: CommandOrchestrator,
    metrics: Arc<MetricsRegistry>,
    config: SmartChargingConfig,
    /// Latest trigger generation per site area
    triggers: DashMap<(TenantId, String), u64>,
}

impl SmartChargingScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        strategies: Arc<StrategyRegistry>,
        orchestrator: CommandOrchestrator,
        metrics: Arc<MetricsRegistry>,
        config: SmartChargingConfig,
    ) -> Self {
        Self {
            locks: LockManager::new(store.clone(), config.lock_ttl()),
            store,
            strategies,
            orchestrator,
            metrics,
            config,
            triggers: DashMap::new(),
        }
    }

    /// Schedule a recompute after the debounce delay.
    ///
    /// A later trigger for the same site area supersedes this one while it
    /// is still waiting.
    pub fn trigger(self: &Arc<Self>, tenant: &TenantId, site_area_id: &str) -> JoinHandle<()> {
        let key = (tenant.clone(), site_area_id.to_string());
        let generation = {
            let mut entry = self.triggers.entry(key.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        let scheduler = self.clone();
        let delay = self.config.debounce();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let latest = scheduler.triggers.get(&key).map(|g| *g);
            if latest != Some(generation) {
                debug!("Recompute of site area {} superseded", key.1);
                return;
            }
            if let Err(e) = scheduler.recompute_site_area_profiles(&key.0, &key.1).await {
                error!(
                    "Scheduled recompute of site area {} (tenant {}) failed: {}",
                    key.1, key.0, e
                );
            }
            // A trigger that arrived during the run keeps its entry
            scheduler.triggers.remove_if(&key, |_, latest| *latest == generation);
        })
    }

    /// Number of site areas with a trigger not yet run
    pub fn pending_triggers(&self) -> usize {
        self.triggers.len()
    }

    async fn lock_site_area(
        &self,
        tenant: &TenantId,
        site_area_id: &str,
    ) -> CsmsResult<Option<LockGuard>> {
        self.locks
            .acquire_guarded(
                tenant,
                LockEntity::SiteArea,
                site_area_id,
                self.config.lock_acquire_timeout(),
                self.config.lock_poll_interval(),
            )
            .await
    }

    /// Recompute and push the charging profiles of a site area.
    ///
    /// The site area lock is released even when the returned future is
    /// dropped before completion.
    pub async fn recompute_site_area_profiles(
        &self,
        tenant: &TenantId,
        site_area_id: &str,
    ) -> CsmsResult<RecomputeOutcome> {
        let Some(guard) = self.lock_site_area(tenant, site_area_id).await? else {
            info!(
                "Site area {} is already being recomputed, skipping",
                site_area_id
            );
            self.metrics.record_recomputation("lock_unavailable");
            return Ok(RecomputeOutcome::LockUnavailable);
        };

        let result = self.compute_and_apply(tenant, site_area_id).await;

        if let Err(e) = guard.release().await {
            error!("Cannot release lock on site area {}: {}", site_area_id, e);
        }

        match result {
            Ok(outcome) => {
                self.metrics.record_recomputation(outcome.label());
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    "Smart charging failed on site area {} (tenant {}): {:?}",
                    site_area_id, tenant, e
                );
                self.metrics.record_recomputation("error");
                Err(e)
            }
        }
    }

    async fn compute_and_apply(
        &self,
        tenant: &TenantId,
        site_area_id: &str,
    ) -> CsmsResult<RecomputeOutcome> {
        let site_area = self
            .store
            .get_site_area(tenant, site_area_id)
            .await?
            .ok_or_else(|| CsmsError::not_found("SiteArea", site_area_id))?;
        if !site_area.smart_charging {
            debug!("Smart charging is off on site area {}", site_area_id);
            return Ok(RecomputeOutcome::Disabled);
        }
        let Some(strategy) = self.strategies.resolve(tenant) else {
            warn!("No smart charging strategy for tenant {}", tenant);
            return Ok(RecomputeOutcome::NoStrategy);
        };

        let stations = self
            .store
            .charging_stations_in_site_area(tenant, site_area_id)
            .await?;
        let mut report = RecomputeReport {
            site_area_id: site_area_id.to_string(),
            ..Default::default()
        };
        for station in &stations {
            if !station.capabilities.support_charging_profiles {
                warn!(
                    "Charging station {} does not support charging profiles, skipped",
                    station.id
                );
                report.skipped_stations.push(station.id.clone());
            }
        }

        let allocations = strategy.compute(tenant, &site_area, &stations).await?;
        debug!(
            "Strategy {} computed {} allocations for site area {}",
            strategy.name(),
            allocations.len(),
            site_area_id
        );

        for allocation in allocations {
            let Some(station) = stations
                .iter()
                .find(|s| s.id == allocation.charging_station_id)
            else {
                continue;
            };
            match self
                .orchestrator
                .set_charging_profile(
                    tenant,
                    station,
                    allocation.connector_id,
                    allocation.profile,
                )
                .await
            {
                Ok(result) if result.is_accepted() => report.applied += 1,
                Ok(_) => report.rejected += 1,
                Err(e) => {
                    error!(
                        "Cannot push profile to {}/{} in site area {}: {}",
                        station.id, allocation.connector_id, site_area_id, e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Site area {} recomputed: {} applied, {} rejected, {} failed",
            site_area_id, report.applied, report.rejected, report.failed
        );
        Ok(RecomputeOutcome::Applied(report))
    }

    /// Store a site area edit.
    ///
    /// Runs under the site area lock so it never interleaves with a
    /// recompute; `LockUnavailable` is returned when the lock cannot be had
    /// in time. Turning smart charging off first clears every transaction
    /// profile of the area. When some cannot be cleared the other fields are
    /// still saved, smart charging stays on and `ProfileCleanupFailed` is
    /// returned.
    pub async fn update_site_area(
        self: &Arc<Self>,
        tenant: &TenantId,
        update: SiteArea,
    ) -> CsmsResult<ActionsResponse> {
        let site_area_id = update.id.clone();
        let guard = self
            .lock_site_area(tenant, &site_area_id)
            .await?
            .ok_or_else(|| CsmsError::LockUnavailable {
                resource: format!("{}:{}", LockEntity::SiteArea, site_area_id),
            })?;

        let result = self.save_site_area_update(tenant, update).await;

        if let Err(e) = guard.release().await {
            error!("Cannot release lock on site area {}: {}", site_area_id, e);
        }
        let (actions, recompute) = result?;
        if recompute {
            self.trigger(tenant, &site_area_id);
        }
        Ok(actions)
    }

    /// Apply the edit; the flag tells whether the allocations are now stale
    async fn save_site_area_update(
        &self,
        tenant: &TenantId,
        update: SiteArea,
    ) -> CsmsResult<(ActionsResponse, bool)> {
        let previous = self
            .store
            .get_site_area(tenant, &update.id)
            .await?
            .ok_or_else(|| CsmsError::not_found("SiteArea", update.id.clone()))?;
        let mut next = update;
        let mut actions = ActionsResponse::default();

        if previous.smart_charging && !next.smart_charging {
            actions = self.clear_site_area_profiles(tenant, &previous).await?;
            if actions.in_error > 0 {
                next.smart_charging = true;
                self.store.save_site_area(tenant, &next).await?;
                return Err(CsmsError::ProfileCleanupFailed {
                    site_area_id: next.id,
                    in_success: actions.in_success,
                    in_error: actions.in_error,
                });
            }
        }
        self.store.save_site_area(tenant, &next).await?;

        let cap_changed = previous.maximum_power != next.maximum_power;
        let recompute = next.smart_charging && (cap_changed || !previous.smart_charging);
        Ok((actions, recompute))
    }

    /// Clear and delete the transaction profiles of every station in the area
    pub async fn clear_site_area_profiles(
        &self,
        tenant: &TenantId,
        site_area: &SiteArea,
    ) -> CsmsResult<ActionsResponse> {
        let mut actions = ActionsResponse::default();
        let stations = self
            .store
            .charging_stations_in_site_area(tenant, &site_area.id)
            .await?;

        for station in &stations {
            let records = self
                .store
                .charging_profiles_for_station(tenant, &station.id)
                .await?;
            for record in records.iter().filter(|r| {
                r.profile.charging_profile_purpose == ChargingProfilePurposeType::TxProfile
            }) {
                match self
                    .orchestrator
                    .clear_charging_profile(tenant, station, record)
                    .await
                {
                    Ok(result) if matches!(result.status(), "Accepted" | "Unknown") => {
                        actions.in_success += 1
                    }
                    Ok(result) => {
                        warn!(
                            "Charging profile {} not cleared: {}",
                            record.id,
                            result.status()
                        );
                        actions.in_error += 1;
                    }
                    Err(e) => {
                        error!(
                            "Cannot clear charging profile {} in site area {}: {}",
                            record.id, site_area.id, e
                        );
                        actions.in_error += 1;
                    }
                }
            }
        }
        Ok(actions)
    }

    /// Cap a single station through its vendor adapter
    pub async fn set_power_limitation(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        max_watts: f64,
    ) -> CsmsResult<CommandResult> {
        if !(max_watts > 0.0) {
            return Err(CsmsError::validation("power limitation must be positive"));
        }
        let station = self
            .store
            .get_charging_station(tenant, charging_station_id)
            .await?
            .ok_or_else(|| CsmsError::not_found("ChargingStation", charging_station_id))?;
        if !station.capabilities.support_static_limitation {
            return Err(CsmsError::FeatureNotSupported {
                charging_station_id: station.id.clone(),
                feature: UnsupportedFeature::StaticPowerLimitation,
            });
        }
        let vendor = self.orchestrator.resolve_vendor(&station)?;

        let result = vendor
            .set_static_power_limitation(&self.orchestrator, tenant, &station, max_watts)
            .await?;
        info!(
            "Power limitation of {} W on {} via {}: {}",
            max_watts,
            station.id,
            vendor.name(),
            result.status()
        );
        Ok(result)
    }
}
