//! Connector occupancy and transaction lifecycle
//!
//! This module is the only writer of `Connector::active_transaction_id`.

use crate::auth::{AuthorizationOracle, UserContext};
use crate::model::{ChargingStation, Connector, RemoteStopMarker, TenantId, Transaction};
use crate::orchestrator::{Command, CommandOrchestrator, CommandResult};
use crate::store::Store;
use crate::{CsmsError, CsmsResult};
use chrono::{DateTime, Utc};
use ocpp_messages::v16j::{RemoteStartTransactionRequest, RemoteStopTransactionRequest};
use ocpp_types::v16j::{ChargePointErrorCode, ChargePointStatus};
use ocpp_types::CHARGE_POINT_CONNECTOR_ID;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the caller should do after a remote stop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemoteStopOutcome {
    /// The station accepted the stop
    Accepted,
    /// The station did not accept; the marker stays and the caller should poll
    InFlight { status: String },
}

/// Stop event reported by a station
#[derive(Debug, Clone, PartialEq)]
pub struct StopEvent {
    pub transaction_id: i32,
    pub timestamp: DateTime<Utc>,
    pub meter_stop: i32,
    pub tag_id: Option<String>,
    pub reason: Option<String>,
}

pub struct TransactionManager {
    store: Arc<dyn Store>,
    oracle: Arc<dyn AuthorizationOracle>,
    orchestrator: CommandOrchestrator,
}

impl TransactionManager {
    pub fn new(
        store: Arc<dyn Store>,
        oracle: Arc<dyn AuthorizationOracle>,
        orchestrator: CommandOrchestrator,
    ) -> Self {
        Self {
            store,
            oracle,
            orchestrator,
        }
    }

    async fn load_station(&self, tenant: &TenantId, id: &str) -> CsmsResult<ChargingStation> {
        self.store
            .get_charging_station(tenant, id)
            .await?
            .ok_or_else(|| CsmsError::not_found("ChargingStation", id))
    }

    /// Patch the stored station in place, see [`Store::update_charging_station`]
    async fn update_station(
        &self,
        tenant: &TenantId,
        id: &str,
        update: &mut (dyn for<'s> FnMut(&'s mut ChargingStation) -> CsmsResult<()> + Send),
    ) -> CsmsResult<ChargingStation> {
        self.store
            .update_charging_station(tenant, id, update)
            .await?
            .ok_or_else(|| CsmsError::not_found("ChargingStation", id))
    }

    async fn load_transaction(&self, tenant: &TenantId, id: i32) -> CsmsResult<Transaction> {
        self.store
            .get_transaction(tenant, id)
            .await?
            .ok_or_else(|| CsmsError::not_found("Transaction", id.to_string()))
    }

    pub async fn authorize_start(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        tag_id: &str,
    ) -> CsmsResult<()> {
        if self
            .oracle
            .is_authorized_to_start(tenant, station, tag_id)
            .await?
        {
            Ok(())
        } else {
            Err(CsmsError::authorization(format!(
                "Tag {} is not allowed to start a transaction on {}",
                tag_id, station.id
            )))
        }
    }

    /// The owner of the transaction may always stop it, anyone else needs the oracle
    pub async fn authorize_stop(
        &self,
        tenant: &TenantId,
        station: &ChargingStation,
        transaction: &Transaction,
        user: &UserContext,
    ) -> CsmsResult<()> {
        if transaction.charging_station_id != station.id {
            return Err(CsmsError::validation(format!(
                "Transaction {} does not belong to {}",
                transaction.id, station.id
            )));
        }
        let owner = user.owns_tag(&transaction.tag_id)
            || (user.user_id.is_some() && user.user_id == transaction.user_id);
        if owner
            || self
                .oracle
                .is_authorized_to_stop(tenant, user, transaction)
                .await?
        {
            return Ok(());
        }
        Err(CsmsError::authorization(format!(
            "User {} is not allowed to stop transaction {}",
            user.user_id.as_deref().unwrap_or("anonymous"),
            transaction.id
        )))
    }

    /// Ask the station to start charging.
    ///
    /// The connector stays free until the station reports the start and the
    /// transaction is bound with [`TransactionManager::bind_transaction`].
    pub async fn remote_start(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        tag_id: &str,
    ) -> CsmsResult<CommandResult> {
        let station = self.load_station(tenant, charging_station_id).await?;
        let connector = station
            .connector(connector_id)
            .ok_or_else(|| {
                CsmsError::not_found("Connector", format!("{}/{}", station.id, connector_id))
            })?;
        if connector.status.blocks_new_transaction() {
            return Err(CsmsError::ConnectorNotAvailable {
                charging_station_id: station.id.clone(),
                connector_id,
                reason: format!("connector is {:?}", connector.status),
            });
        }
        if let Some(transaction_id) = connector.active_transaction_id {
            return Err(CsmsError::ConnectorNotAvailable {
                charging_station_id: station.id.clone(),
                connector_id,
                reason: format!("transaction {} in progress", transaction_id),
            });
        }

        self.authorize_start(tenant, &station, tag_id).await?;

        let result = self
            .orchestrator
            .execute(
                tenant,
                &station,
                Command::RemoteStartTransaction(RemoteStartTransactionRequest {
                    connector_id: Some(connector_id),
                    id_tag: tag_id.to_string(),
                    charging_profile: None,
                }),
            )
            .await?;
        info!(
            "Remote start on {}/{} with tag {}: {}",
            station.id,
            connector_id,
            tag_id,
            result.status()
        );
        Ok(result)
    }

    /// Ask the station to stop a transaction.
    ///
    /// The `remotestop` marker is stored before the command goes out and is
    /// left in place when the station does not accept.
    pub async fn remote_stop(
        &self,
        tenant: &TenantId,
        transaction_id: Option<i32>,
        tag_id: &str,
        user: &UserContext,
    ) -> CsmsResult<RemoteStopOutcome> {
        let transaction_id = transaction_id
            .filter(|id| *id > 0)
            .ok_or_else(|| CsmsError::validation("transactionId is required"))?;
        let mut transaction = self.load_transaction(tenant, transaction_id).await?;
        if transaction.is_stopped() {
            return Err(CsmsError::TransactionAlreadyStopped { transaction_id });
        }
        let station = self
            .load_station(tenant, &transaction.charging_station_id)
            .await?;

        self.authorize_stop(tenant, &station, &transaction, user)
            .await?;

        transaction.remotestop = Some(RemoteStopMarker {
            timestamp: Utc::now(),
            tag_id: tag_id.to_string(),
            user_id: user.user_id.clone(),
        });
        self.store.save_transaction(tenant, &transaction).await?;

        let result = self
            .orchestrator
            .execute(
                tenant,
                &station,
                Command::RemoteStopTransaction(RemoteStopTransactionRequest { transaction_id }),
            )
            .await?;

        if result.is_accepted() {
            info!("Remote stop of transaction {} accepted", transaction_id);
            Ok(RemoteStopOutcome::Accepted)
        } else {
            warn!(
                "Remote stop of transaction {} answered {}, keeping the request marker",
                transaction_id,
                result.status()
            );
            Ok(RemoteStopOutcome::InFlight {
                status: result.status().to_string(),
            })
        }
    }

    /// Release the connector if it still holds `transaction_id`.
    ///
    /// Returns false when the connector was already free or holds another
    /// transaction.
    pub async fn free_connector(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        transaction_id: i32,
    ) -> CsmsResult<bool> {
        let mut held: Option<i32> = None;
        self.update_station(tenant, charging_station_id, &mut |station: &mut ChargingStation| {
            let connector = connector_of(station, connector_id)?;
            held = connector.active_transaction_id;
            if held == Some(transaction_id) {
                connector.active_transaction_id = None;
            }
            Ok(())
        })
        .await?;
        if held != Some(transaction_id) {
            debug!(
                "Connector {}/{} not freed, holds {:?} instead of {}",
                charging_station_id, connector_id, held, transaction_id
            );
            return Ok(false);
        }
        debug!(
            "Connector {}/{} freed from transaction {}",
            charging_station_id, connector_id, transaction_id
        );
        Ok(true)
    }

    /// Fails with `ExistingTransaction` while a connector holds an open transaction
    pub async fn can_delete(&self, tenant: &TenantId, station: &ChargingStation) -> CsmsResult<()> {
        for connector in &station.connectors {
            let Some(transaction_id) = connector.active_transaction_id else {
                continue;
            };
            match self.store.get_transaction(tenant, transaction_id).await? {
                Some(transaction) if !transaction.is_stopped() => {
                    return Err(CsmsError::ExistingTransaction {
                        charging_station_id: station.id.clone(),
                        connector_id: connector.connector_id,
                        transaction_id,
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub async fn delete_charging_station(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
    ) -> CsmsResult<()> {
        let station = self.load_station(tenant, charging_station_id).await?;
        self.can_delete(tenant, &station).await?;

        for record in self
            .store
            .charging_profiles_for_station(tenant, charging_station_id)
            .await?
        {
            self.store.delete_charging_profile(tenant, &record.id).await?;
        }
        self.store
            .delete_charging_station(tenant, charging_station_id)
            .await?;
        self.orchestrator
            .sessions()
            .unregister(tenant, charging_station_id)
            .await;
        info!("Charging station {} deleted", charging_station_id);
        Ok(())
    }

    /// Occupy the connector with a transaction the station started.
    ///
    /// A transaction still open on the connector is soft stopped first.
    pub async fn bind_transaction(
        &self,
        tenant: &TenantId,
        transaction: &Transaction,
    ) -> CsmsResult<()> {
        let station_id = transaction.charging_station_id.as_str();
        let connector_id = transaction.connector_id;
        let mut previous: Option<i32> = None;
        self.update_station(tenant, station_id, &mut |station: &mut ChargingStation| {
            let connector = connector_of(station, connector_id)?;
            if connector.status.blocks_new_transaction() {
                return Err(CsmsError::ConnectorNotAvailable {
                    charging_station_id: station_id.to_string(),
                    connector_id,
                    reason: format!("connector is {:?}", connector.status),
                });
            }
            previous = connector.active_transaction_id;
            connector.active_transaction_id = Some(transaction.id);
            Ok(())
        })
        .await?;

        if let Some(previous_id) = previous.filter(|id| *id != transaction.id) {
            if let Some(mut stale) = self.store.get_transaction(tenant, previous_id).await? {
                if !stale.is_stopped() {
                    warn!(
                        "Connector {}/{} still held transaction {}, soft stopping it",
                        station_id, connector_id, previous_id
                    );
                    close_softly(&mut stale, None);
                    self.store.save_transaction(tenant, &stale).await?;
                }
            }
        }

        self.store.save_transaction(tenant, transaction).await?;
        info!(
            "Transaction {} bound to {}/{}",
            transaction.id, station_id, connector_id
        );
        Ok(())
    }

    /// Close a transaction from a station stop event and free its connector
    pub async fn record_stop(&self, tenant: &TenantId, event: StopEvent) -> CsmsResult<Transaction> {
        let mut transaction = self.load_transaction(tenant, event.transaction_id).await?;
        if transaction.is_stopped() {
            return Err(CsmsError::TransactionAlreadyStopped {
                transaction_id: transaction.id,
            });
        }

        let (tag_id, user_id) = match &transaction.remotestop {
            Some(marker) => {
                debug!(
                    "Stop of transaction {} follows the remote stop requested at {}",
                    transaction.id, marker.timestamp
                );
                (
                    event.tag_id.clone().or_else(|| Some(marker.tag_id.clone())),
                    marker.user_id.clone(),
                )
            }
            None => (event.tag_id.clone(), None),
        };
        transaction.close(
            event.timestamp,
            event.meter_stop,
            tag_id,
            user_id,
            event.reason.clone(),
            false,
        );
        self.store.save_transaction(tenant, &transaction).await?;
        self.free_connector(
            tenant,
            &transaction.charging_station_id,
            transaction.connector_id,
            transaction.id,
        )
        .await?;
        Ok(transaction)
    }

    /// Close a transaction centrally with its last known meter value
    pub async fn soft_stop(
        &self,
        tenant: &TenantId,
        transaction_id: i32,
        user: Option<&UserContext>,
    ) -> CsmsResult<Transaction> {
        let mut transaction = self.load_transaction(tenant, transaction_id).await?;
        if transaction.is_stopped() {
            return Err(CsmsError::TransactionAlreadyStopped { transaction_id });
        }
        close_softly(&mut transaction, user.and_then(|u| u.user_id.clone()));
        self.store.save_transaction(tenant, &transaction).await?;
        self.free_connector(
            tenant,
            &transaction.charging_station_id,
            transaction.connector_id,
            transaction.id,
        )
        .await?;
        info!("Transaction {} soft stopped", transaction_id);
        Ok(transaction)
    }

    /// Apply a StatusNotification; the active transaction is left untouched
    pub async fn update_connector_status(
        &self,
        tenant: &TenantId,
        charging_station_id: &str,
        connector_id: u32,
        status: ChargePointStatus,
        error_code: ChargePointErrorCode,
    ) -> CsmsResult<()> {
        if connector_id == CHARGE_POINT_CONNECTOR_ID {
            debug!("{} reported station status {:?}", charging_station_id, status);
            return Ok(());
        }
        self.update_station(tenant, charging_station_id, &mut |station: &mut ChargingStation| {
            let connector = connector_of(station, connector_id)?;
            connector.status = status;
            connector.error_code = error_code;
            Ok(())
        })
        .await?;
        Ok(())
    }
}

fn connector_of(station: &mut ChargingStation, connector_id: u32) -> CsmsResult<&mut Connector> {
    let station_id = station.id.clone();
    station
        .connector_mut(connector_id)
        .ok_or_else(|| CsmsError::not_found("Connector", format!("{}/{}", station_id, connector_id)))
}

fn close_softly(transaction: &mut Transaction, user_id: Option<String>) {
    let meter_stop = transaction
        .last_meter_value
        .unwrap_or(transaction.meter_start);
    let tag_id = Some(transaction.tag_id.clone());
    transaction.close(
        Utc::now(),
        meter_stop,
        tag_id,
        user_id,
        Some("SoftStop".to_string()),
        true,
    );
}
