//! Shared fixtures: a scripted fake station and builders

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use ocpp_station_manager::auth::TagListAuthorizer;
use ocpp_station_manager::config::{AuthConfig, Config, ConfigBuilder, SmartChargingConfig};
use ocpp_station_manager::model::{ChargingStation, Connector, SiteArea, TenantId};
use ocpp_station_manager::registry::SessionConnector;
use ocpp_station_manager::smart_charging::StrategyRegistry;
use ocpp_station_manager::store::{MemoryStore, Store};
use ocpp_station_manager::vendor::VendorRegistry;
use ocpp_station_manager::{CsmsError, CsmsResult, StationManager};
use ocpp_transport::{ConnectionState, DeviceChannel, TransportError, TransportResult};
use ocpp_types::Call;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TENANT: &str = "tenant-1";

pub fn tenant() -> TenantId {
    TenantId::from(TENANT)
}

/// Answer scripted for one action
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(Value),
    /// No answer, surfaced as a transport timeout
    Timeout,
}

/// Station side of a session answering from a script
pub struct FakeStation {
    id: String,
    defaults: DashMap<String, Scripted>,
    queued: DashMap<String, VecDeque<Scripted>>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
    connected: AtomicBool,
}

impl FakeStation {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            defaults: DashMap::new(),
            queued: DashMap::new(),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    /// Answer every `action` call with `payload`
    pub fn respond(&self, action: &str, payload: Value) {
        self.defaults
            .insert(action.to_string(), Scripted::Reply(payload));
    }

    /// Answer the next `action` call with `payload`, then fall back
    pub fn respond_once(&self, action: &str, payload: Value) {
        self.queued
            .entry(action.to_string())
            .or_default()
            .push_back(Scripted::Reply(payload));
    }

    pub fn time_out(&self, action: &str) {
        self.defaults.insert(action.to_string(), Scripted::Timeout);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, action: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| a == action)
            .count()
    }

    fn script_for(&self, action: &str) -> Scripted {
        if let Some(mut queue) = self.queued.get_mut(action) {
            if let Some(next) = queue.pop_front() {
                return next;
            }
        }
        if let Some(scripted) = self.defaults.get(action) {
            return scripted.clone();
        }
        match action {
            "GetConfiguration" => Scripted::Reply(json!({ "configurationKey": [] })),
            "UnlockConnector" => Scripted::Reply(json!({ "status": "Unlocked" })),
            "GetDiagnostics" => Scripted::Reply(json!({})),
            "UpdateFirmware" => Scripted::Reply(json!({})),
            _ => Scripted::Reply(json!({ "status": "Accepted" })),
        }
    }
}

#[async_trait]
impl DeviceChannel for FakeStation {
    fn charging_station_id(&self) -> &str {
        &self.id
    }

    async fn call(&self, call: Call) -> TransportResult<Value> {
        if !self.is_connected() {
            return Err(TransportError::NotReady {
                state: ConnectionState::Closed,
            });
        }
        self.calls
            .lock()
            .unwrap()
            .push((call.action.clone(), call.payload.clone()));
        let script = self.script_for(&call.action);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match script {
            Scripted::Reply(payload) => Ok(payload),
            Scripted::Timeout => Err(TransportError::Timeout {
                action: call.action,
                timeout_ms: 30_000,
            }),
        }
    }

    fn state(&self) -> ConnectionState {
        if self.connected.load(Ordering::SeqCst) {
            ConnectionState::Connected
        } else {
            ConnectionState::Closed
        }
    }

    async fn close(&self, _reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Hands out the fake stations registered with it
#[derive(Default)]
pub struct FakeConnector {
    stations: DashMap<String, Arc<FakeStation>>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn add(&self, station: Arc<FakeStation>) {
        self.stations.insert(station.id.clone(), station);
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(
        &self,
        _tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<Arc<dyn DeviceChannel>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.stations.get(charging_station_id) {
            Some(station) => Ok(station.clone()),
            None => Err(CsmsError::Internal {
                message: format!("{} did not answer the handshake", charging_station_id),
            }),
        }
    }
}

pub fn test_config() -> Config {
    ConfigBuilder::new()
        .smart_charging(SmartChargingConfig {
            debounce_ms: 50,
            lock_acquire_timeout_ms: 0,
            ..Default::default()
        })
        .auth(AuthConfig {
            enabled: true,
            accepted_tags: vec!["T1".to_string(), "T2".to_string()],
            admin_override: true,
        })
        .build()
}

/// Station in site area `SA-1` with `connectors` 32 A three phase sockets
pub fn station(id: &str, vendor: &str, connectors: u32) -> ChargingStation {
    let mut station = ChargingStation::new(id, vendor);
    station.site_area_id = Some("SA-1".to_string());
    station.connectors = (1..=connectors)
        .map(|id| Connector::three_phase(id, 32.0))
        .collect();
    station.capabilities.support_charging_profiles = true;
    station.capabilities.support_static_limitation = true;
    station.maximum_power = station.connectors.iter().map(|c| c.power).sum();
    station
}

pub fn site_area(id: &str, maximum_power: f64, smart_charging: bool) -> SiteArea {
    SiteArea {
        id: id.to_string(),
        name: format!("Site {}", id),
        maximum_power,
        smart_charging,
    }
}

pub struct Harness {
    pub manager: StationManager,
    pub store: Arc<MemoryStore>,
    pub connector: Arc<FakeConnector>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), None)
    }

    pub fn with(config: Config, strategies: Option<StrategyRegistry>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(FakeConnector::default());
        let strategies = match strategies {
            Some(strategies) => strategies,
            None => StrategyRegistry::from_config(&config.smart_charging).unwrap(),
        };
        let oracle = Arc::new(TagListAuthorizer::new(config.auth.clone()));
        let manager = StationManager::new(
            config,
            store.clone(),
            oracle,
            connector.clone(),
            VendorRegistry::with_defaults(),
            strategies,
        )
        .unwrap();
        Self {
            manager,
            store,
            connector,
        }
    }

    /// Persist the station and make a fake answer for it
    pub async fn add_station(&self, station: &ChargingStation) -> Arc<FakeStation> {
        self.store
            .save_charging_station(&tenant(), station)
            .await
            .unwrap();
        let fake = FakeStation::new(&station.id);
        self.connector.add(fake.clone());
        fake
    }

    pub async fn add_site_area(&self, site_area: &SiteArea) {
        self.store.save_site_area(&tenant(), site_area).await.unwrap();
    }

    pub async fn load_station(&self, id: &str) -> ChargingStation {
        self.store
            .get_charging_station(&tenant(), id)
            .await
            .unwrap()
            .unwrap()
    }
}
