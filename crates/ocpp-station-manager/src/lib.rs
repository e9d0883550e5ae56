//! # OCPP Station Manager
//!
//! Central system core for OCPP 1.6J charging stations:
//!
//! - **Command Orchestrator**: typed station commands and their acknowledgements
//! - **Transaction State Machine**: connector occupancy, remote start and stop
//! - **Smart Charging**: site area power allocation under an exclusive lock
//! - **Vendor Adapters**: manufacturer specific power limitation
//! - **Session Registry**: one live channel per station, connected on first use
//!
//! Persistence, authorization and the transport handshake are collaborators
//! passed to [`StationManager::new`].

pub mod auth;
pub mod config;
pub mod error;
pub mod lock;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod smart_charging;
pub mod store;
pub mod tasks;
pub mod transactions;
pub mod vendor;

pub use error::*;

use auth::{AuthorizationOracle, UserContext};
use config::Config;
use metrics::MetricsRegistry;
use model::{ChargingProfileRecord, ChargingStation, SiteArea, TenantId, Transaction};
use ocpp_transport::{DeviceChannel, MessageChannel};
use ocpp_types::v16j::{
    ChargePointErrorCode, ChargePointStatus, ChargingProfile, ChargingRateUnitType,
};
use orchestrator::{Command, CommandOrchestrator, CommandResult, CompositeScheduleResult};
use registry::{DeviceSessionRegistry, SessionConnector};
use smart_charging::{ActionsResponse, RecomputeOutcome, SmartChargingScheduler, StrategyRegistry};
use std::sync::Arc;
use store::Store;
use tasks::TaskQueue;
use tokio::sync::mpsc;
use tracing::info;
use transactions::{RemoteStopOutcome, StopEvent, TransactionManager};
use vendor::VendorRegistry;

/// Entry point handed to request handlers
pub struct StationManager {
    config: Config,
    store: Arc<dyn Store>,
    sessions: Arc<DeviceSessionRegistry>,
    orchestrator: CommandOrchestrator,
    transactions: TransactionManager,
    scheduler: Arc<SmartChargingScheduler>,
    tasks: TaskQueue,
    metrics: Arc<MetricsRegistry>,
}

impl StationManager {
    /// Wire the components together.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        oracle: Arc<dyn AuthorizationOracle>,
        connector: Arc<dyn SessionConnector>,
        vendors: VendorRegistry,
        strategies: StrategyRegistry,
    ) -> CsmsResult<Self> {
        config::validate_config(&config)
            .map_err(|message| CsmsError::Configuration { message })?;
        info!("Initializing station manager");

        let metrics = Arc::new(MetricsRegistry::new(&config.metrics)?);
        let tasks = TaskQueue::new();
        let sessions = Arc::new(DeviceSessionRegistry::new(connector));
        let orchestrator = CommandOrchestrator::new(
            sessions.clone(),
            Arc::new(vendors),
            store.clone(),
            tasks.clone(),
            metrics.clone(),
        );
        let transactions = TransactionManager::new(store.clone(), oracle, orchestrator.clone());
        let scheduler = Arc::new(SmartChargingScheduler::new(
            store.clone(),
            Arc::new(strategies),
            orchestrator.clone(),
            metrics.clone(),
            config.smart_charging.clone(),
        ));

        Ok(Self {
            config,
            store,
            sessions,
            orchestrator,
            transactions,
            scheduler,
            tasks,
            metrics,
        })
    }

    async fn load_station(&self, tenant: &TenantId, id: &str) -> CsmsResult<ChargingStation> {
        self.store
            .get_charging_station(tenant, id)
            .await?
            .ok_or_else(|| CsmsError::not_found("ChargingStation", id))
    }

    pub async fn execute_command(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        command: Command,
    ) -> CsmsResult<CommandResult> {
        let station = self.load_station(tenant, charging_station_id).await?;
        self.orchestrator.execute(tenant, &station, command).await
    }

    pub async fn remote_start(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        tag_id: &str,
    ) -> CsmsResult<CommandResult> {
        self.transactions
            .remote_start(tenant, charging_station_id, connector_id, tag_id)
            .await
    }

    pub async fn remote_stop(
        &self,
        tenant: &TenantId,
        transaction_id: Option<i32>,
        tag_id: &str,
        user: &UserContext,
    ) -> CsmsResult<RemoteStopOutcome> {
        self.transactions
            .remote_stop(tenant, transaction_id, tag_id, user)
            .await
    }

    pub async fn set_power_limitation(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        max_watts: f64,
    ) -> CsmsResult<CommandResult> {
        self.scheduler
            .set_power_limitation(tenant, charging_station_id, max_watts)
            .await
    }

    pub async fn set_charging_profile(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        profile: ChargingProfile,
    ) -> CsmsResult<CommandResult> {
        let station = self.load_station(tenant, charging_station_id).await?;
        self.orchestrator
            .set_charging_profile(tenant, &station, connector_id, profile)
            .await
    }

    /// Clear a persisted profile by record id
    pub async fn clear_charging_profile(
        &self,
        tenant: &TenantId,
        record_id: &str,
    ) -> CsmsResult<CommandResult> {
        let record: ChargingProfileRecord = self
            .store
            .get_charging_profile(tenant, record_id)
            .await?
            .ok_or_else(|| CsmsError::not_found("ChargingProfile", record_id))?;
        let station = self
            .load_station(tenant, &record.charging_station_id)
            .await?;
        self.orchestrator
            .clear_charging_profile(tenant, &station, &record)
            .await
    }

    pub async fn get_composite_schedule(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        duration_secs: i32,
        unit: Option<ChargingRateUnitType>,
    ) -> CsmsResult<Vec<CompositeScheduleResult>> {
        let station = self.load_station(tenant, charging_station_id).await?;
        self.orchestrator
            .get_composite_schedule(tenant, &station, connector_id, duration_secs, unit)
            .await
    }

    pub async fn recompute_site_area_profiles(
        &self,
        tenant: &TenantId,
        site_area_id: &str,
    ) -> CsmsResult<RecomputeOutcome> {
        self.scheduler
            .recompute_site_area_profiles(tenant, site_area_id)
            .await
    }

    /// Schedule a debounced recompute
    pub fn trigger_smart_charging(&self, tenant: &TenantId, site_area_id: &str) {
        self.scheduler.trigger(tenant, site_area_id);
    }

    pub async fn update_site_area(
        &self,
        tenant: &TenantId,
        site_area: SiteArea,
    ) -> CsmsResult<ActionsResponse> {
        self.scheduler.update_site_area(tenant, site_area).await
    }

    pub async fn can_delete(&self, tenant: &TenantId, charging_station_id: &str) -> CsmsResult<()> {
        let station = self.load_station(tenant, charging_station_id).await?;
        self.transactions.can_delete(tenant, &station).await
    }

    pub async fn delete_charging_station(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<()> {
        self.transactions
            .delete_charging_station(tenant, charging_station_id)
            .await
    }

    pub async fn bind_transaction(
        &self,
        tenant: &TenantId,
        transaction: &Transaction,
    ) -> CsmsResult<()> {
        self.transactions.bind_transaction(tenant, transaction).await
    }

    pub async fn record_stop(&self, tenant: &TenantId, event: StopEvent) -> CsmsResult<Transaction> {
        self.transactions.record_stop(tenant, event).await
    }

    pub async fn soft_stop(
        &self,
        tenant: &TenantId,
        transaction_id: i32,
        user: Option<&UserContext>,
    ) -> CsmsResult<Transaction> {
        self.transactions
            .soft_stop(tenant, transaction_id, user)
            .await
    }

    pub async fn free_connector(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        transaction_id: i32,
    ) -> CsmsResult<bool> {
        self.transactions
            .free_connector(tenant, charging_station_id, connector_id, transaction_id)
            .await
    }

    pub async fn update_connector_status(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
    ) -> CsmsResult<()> {
        self.transactions
            .update_connector_status(tenant, charging_station_id, connector_id, status, error_code)
            .await
    }

    /// Install a session opened by the station
    pub async fn register_session(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        channel: Arc<dyn DeviceChannel>,
    ) {
        self.sessions
            .register(tenant, charging_station_id, channel)
            .await;
    }

    /// Open a channel for a station that just connected and register it.
    ///
    /// The socket layer drains the returned frames to the station and feeds
    /// its replies to [`MessageChannel::handle_incoming`].
    pub async fn accept_session(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> (Arc<MessageChannel>, mpsc::Receiver<String>) {
        let (channel, frames) =
            MessageChannel::new(charging_station_id, self.config.ocpp.transport_config());
        let channel = Arc::new(channel);
        self.register_session(tenant, charging_station_id, channel.clone())
            .await;
        (channel, frames)
    }

    pub async fn unregister_session(&self, tenant: &TenantId, charging_station_id: &str) -> bool {
        self.sessions.unregister(tenant, charging_station_id).await
    }

    /// Wait for the background jobs in flight, used on shutdown
    pub async fn drain(&self) {
        self.tasks.wait_idle().await;
    }

    pub fn get_stats(&self) -> StationManagerStats {
        StationManagerStats {
            connected_sessions: self.sessions.connected_count(),
            pending_tasks: self.tasks.in_flight(),
            metrics_collected: self.metrics.get_stats().metrics_count,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }

    pub fn orchestrator(&self) -> &CommandOrchestrator {
        &self.orchestrator
    }

    pub fn transactions(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn scheduler(&self) -> Arc<SmartChargingScheduler> {
        self.scheduler.clone()
    }
}

/// Station manager statistics
#[derive(Debug, Clone)]
pub struct StationManagerStats {
    /// Sessions in the Ready state
    pub connected_sessions: usize,
    /// Background jobs not yet finished
    pub pending_tasks: usize,
    /// Metric families with samples
    pub metrics_collected: usize,
}
