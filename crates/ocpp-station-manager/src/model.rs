//! Records the station manager reads and writes through the [`Store`](crate::store::Store)

use chrono::{DateTime, Utc};
use ocpp_types::common::KeyValue;
use ocpp_types::v16j::{ChargePointErrorCode, ChargePointStatus, ChargingProfile};
use serde::{Deserialize, Serialize};

/// Tenant every record is scoped by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentType {
    AC,
    DC,
}

/// Optional features a station declares
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCapabilities {
    /// Station accepts a fixed power limit
    pub support_static_limitation: bool,
    /// Station accepts charging profiles
    pub support_charging_profiles: bool,
}

/// One independently addressable socket of a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    /// Ordinal id, starting at 1
    pub connector_id: u32,
    /// Maximum power in W
    pub power: f64,
    /// Voltage in V
    pub voltage: f64,
    /// Maximum current in A
    pub amperage: f64,
    pub current_type: CurrentType,
    pub number_of_phases: u32,
    pub status: ChargePointStatus,
    pub error_code: ChargePointErrorCode,
    /// Set while a transaction without a stop record occupies the connector
    pub active_transaction_id: Option<i32>,
}

impl Connector {
    /// Three phase AC connector sized from its per-phase amperage
    pub fn three_phase(connector_id: u32, amperage: f64) -> Self {
        let voltage = 230.0;
        Self {
            connector_id,
            power: voltage * amperage * 3.0,
            voltage,
            amperage,
            current_type: CurrentType::AC,
            number_of_phases: 3,
            status: ChargePointStatus::Available,
            error_code: ChargePointErrorCode::NoError,
            active_transaction_id: None,
        }
    }

    /// Phase count used for W/A conversions, DC counts as one
    pub fn effective_phases(&self) -> u32 {
        match self.current_type {
            CurrentType::DC => 1,
            CurrentType::AC => self.number_of_phases.max(1),
        }
    }

    /// Convert a power in W to a current in A for this connector
    pub fn watts_to_amps(&self, watts: f64) -> f64 {
        if self.voltage <= 0.0 {
            return 0.0;
        }
        watts / (self.voltage * self.effective_phases() as f64)
    }

    /// Convert a current in A to a power in W for this connector
    pub fn amps_to_watts(&self, amps: f64) -> f64 {
        amps * self.voltage * self.effective_phases() as f64
    }
}

/// A physical charging station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingStation {
    pub id: String,
    pub site_area_id: Option<String>,
    /// Manufacturer as reported at boot
    pub vendor: String,
    pub model: String,
    pub connectors: Vec<Connector>,
    pub capabilities: StationCapabilities,
    /// Maximum power of the whole station in W
    pub maximum_power: f64,
    pub current_type: CurrentType,
    /// Derived from the last heartbeat, computed outside this crate
    pub inactive: bool,
    /// Configuration as last read from the station
    pub ocpp_parameters: Vec<KeyValue>,
}

impl ChargingStation {
    pub fn new(id: impl Into<String>, vendor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            site_area_id: None,
            vendor: vendor.into(),
            model: String::new(),
            connectors: Vec::new(),
            capabilities: StationCapabilities::default(),
            maximum_power: 0.0,
            current_type: CurrentType::AC,
            inactive: false,
            ocpp_parameters: Vec::new(),
        }
    }

    pub fn connector(&self, connector_id: u32) -> Option<&Connector> {
        self.connectors
            .iter()
            .find(|c| c.connector_id == connector_id)
    }

    pub fn connector_mut(&mut self, connector_id: u32) -> Option<&mut Connector> {
        self.connectors
            .iter_mut()
            .find(|c| c.connector_id == connector_id)
    }

    /// Value of a configuration key from the last configuration read
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.ocpp_parameters
            .iter()
            .find(|kv| kv.key.eq_ignore_ascii_case(key))
            .and_then(|kv| kv.value.as_deref())
    }
}

/// Stop of a transaction, either reported by the station or closed centrally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRecord {
    pub timestamp: DateTime<Utc>,
    /// Meter reading in Wh
    pub meter_stop: i32,
    pub tag_id: Option<String>,
    pub user_id: Option<String>,
    pub reason: Option<String>,
    /// Energy delivered in Wh
    pub total_consumption_wh: i32,
    pub total_duration_secs: i64,
    /// Closed centrally rather than by a station event
    pub soft_stop: bool,
}

/// Left on a transaction when a remote stop was requested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStopMarker {
    pub timestamp: DateTime<Utc>,
    pub tag_id: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i32,
    pub charging_station_id: String,
    pub connector_id: u32,
    pub tag_id: String,
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Meter reading at start in Wh
    pub meter_start: i32,
    /// Latest meter reading, maintained by meter value ingestion
    pub last_meter_value: Option<i32>,
    pub stop: Option<StopRecord>,
    pub remotestop: Option<RemoteStopMarker>,
}

impl Transaction {
    pub fn new(
        id: i32,
        charging_station_id: impl Into<String>,
        connector_id: u32,
        tag_id: impl Into<String>,
        meter_start: i32,
    ) -> Self {
        Self {
            id,
            charging_station_id: charging_station_id.into(),
            connector_id,
            tag_id: tag_id.into(),
            user_id: None,
            timestamp: Utc::now(),
            meter_start,
            last_meter_value: None,
            stop: None,
            remotestop: None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_some()
    }

    /// Record the stop and compute its totals
    pub fn close(
        &mut self,
        timestamp: DateTime<Utc>,
        meter_stop: i32,
        tag_id: Option<String>,
        user_id: Option<String>,
        reason: Option<String>,
        soft_stop: bool,
    ) {
        self.stop = Some(StopRecord {
            timestamp,
            meter_stop,
            tag_id,
            user_id,
            reason,
            total_consumption_wh: (meter_stop - self.meter_start).max(0),
            total_duration_secs: (timestamp - self.timestamp).num_seconds().max(0),
            soft_stop,
        });
    }
}

/// Charging profile acknowledged by a station
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingProfileRecord {
    /// `station:connector:profileId`
    pub id: String,
    pub charging_station_id: String,
    /// 0 addresses the whole station
    pub connector_id: u32,
    pub profile: ChargingProfile,
}

impl ChargingProfileRecord {
    pub fn new(charging_station_id: &str, connector_id: u32, profile: ChargingProfile) -> Self {
        Self {
            id: Self::record_id(charging_station_id, connector_id, profile.charging_profile_id),
            charging_station_id: charging_station_id.to_string(),
            connector_id,
            profile,
        }
    }

    pub fn record_id(charging_station_id: &str, connector_id: u32, profile_id: i32) -> String {
        format!("{}:{}:{}", charging_station_id, connector_id, profile_id)
    }
}

/// Group of stations sharing an aggregate power cap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteArea {
    pub id: String,
    pub name: String,
    /// Aggregate power cap in W
    pub maximum_power: f64,
    pub smart_charging: bool,
}

/// Kind of resource a lock protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockEntity {
    SiteArea,
}

impl std::fmt::Display for LockEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LockEntity::SiteArea => "site_area",
        })
    }
}

/// Exclusive, time bounded claim on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    /// Unique per acquisition, required to release
    pub id: String,
    pub tenant: TenantId,
    pub entity: LockEntity,
    pub key: String,
    /// Process or task holding the lock
    pub holder: String,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lock {
    /// Identity of the protected resource
    pub fn resource(&self) -> String {
        format!("{}:{}", self.entity, self.key)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
