//! Live device sessions keyed by tenant and charging station

use crate::model::TenantId;
use crate::{CsmsError, CsmsResult};
use async_trait::async_trait;
use dashmap::DashMap;
use ocpp_transport::DeviceChannel;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Opens a protocol session with a station that has none yet
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<Arc<dyn DeviceChannel>>;
}

/// Connector for deployments where only stations open sessions
pub struct InboundOnlyConnector;

#[async_trait]
impl SessionConnector for InboundOnlyConnector {
    async fn connect(
        &self,
        _tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<Arc<dyn DeviceChannel>> {
        Err(CsmsError::DeviceUnreachable {
            charging_station_id: charging_station_id.to_string(),
            message: "station has no open session".to_string(),
        })
    }
}

/// Observable lifecycle of a session slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Ready,
    /// Last connect attempt failed, the next use retries
    Failed { reason: String },
}

type SessionKey = (TenantId, String);

struct SessionSlot {
    channel: Mutex<Option<Arc<dyn DeviceChannel>>>,
}

/// Maps (tenant, charging station) to its single live channel.
///
/// Concurrent first uses of a station share one connect attempt.
pub struct DeviceSessionRegistry {
    connector: Arc<dyn SessionConnector>,
    slots: DashMap<SessionKey, Arc<SessionSlot>>,
    states: DashMap<SessionKey, SessionState>,
}

impl DeviceSessionRegistry {
    pub fn new(connector: Arc<dyn SessionConnector>) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            states: DashMap::new(),
        }
    }

    fn slot(&self, key: &SessionKey) -> Arc<SessionSlot> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(SessionSlot {
                    channel: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Return the live channel, connecting first if there is none
    pub async fn get_or_connect(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<Arc<dyn DeviceChannel>> {
        let key = (tenant.clone(), charging_station_id.to_string());
        let slot = self.slot(&key);
        let mut current = slot.channel.lock().await;

        if let Some(channel) = current.as_ref() {
            if channel.is_connected() {
                return Ok(channel.clone());
            }
            debug!(
                "Session to {} closed, reconnecting",
                charging_station_id
            );
            *current = None;
        }

        self.states.insert(key.clone(), SessionState::Connecting);
        match self.connector.connect(tenant, charging_station_id).await {
            Ok(channel) => {
                info!(
                    "Session ready for {} (tenant {})",
                    charging_station_id, tenant
                );
                *current = Some(channel.clone());
                self.states.insert(key, SessionState::Ready);
                Ok(channel)
            }
            Err(e) => {
                warn!("Cannot open session to {}: {}", charging_station_id, e);
                self.states.insert(
                    key,
                    SessionState::Failed {
                        reason: e.to_string(),
                    },
                );
                Err(CsmsError::DeviceUnreachable {
                    charging_station_id: charging_station_id.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Install a session the station opened itself
    pub async fn register(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        channel: Arc<dyn DeviceChannel>,
    ) {
        let key = (tenant.clone(), charging_station_id.to_string());
        let slot = self.slot(&key);
        let mut current = slot.channel.lock().await;
        if let Some(previous) = current.replace(channel) {
            previous.close("replaced by a new session").await;
        }
        self.states.insert(key, SessionState::Ready);
        info!("Registered session for {}", charging_station_id);
    }

    /// Drop the session, closing its channel
    pub async fn unregister(&self, tenant: &TenantId, charging_station_id: &str) -> bool {
        let key = (tenant.clone(), charging_station_id.to_string());
        self.states.remove(&key);
        let Some((_, slot)) = self.slots.remove(&key) else {
            return false;
        };
        let channel = slot.channel.lock().await.take();
        if let Some(channel) = channel {
            channel.close("session unregistered").await;
        }
        info!("Unregistered session for {}", charging_station_id);
        true
    }

    pub fn session_state(&self, tenant: &TenantId, charging_station_id: &str) -> SessionState {
        self.states
            .get(&(tenant.clone(), charging_station_id.to_string()))
            .map(|s| s.clone())
            .unwrap_or(SessionState::Uninitialized)
    }

    /// Number of sessions in the Ready state
    pub fn connected_count(&self) -> usize {
        self.states
            .iter()
            .filter(|entry| *entry.value() == SessionState::Ready)
            .count()
    }
}
