mod common;

use common::{station, tenant, Harness};
use ocpp_messages::v16j::*;
use ocpp_station_manager::model::{ChargingProfileRecord, Transaction};
use ocpp_station_manager::orchestrator::Command;
use ocpp_station_manager::store::Store;
use ocpp_station_manager::{CsmsError, ErrorCode};
use ocpp_types::v16j::{
    ChargingProfile, ChargingProfileKindType, ChargingProfilePurposeType, ChargingRateUnitType,
    ChargingSchedule, ResetType,
};
use serde_json::json;
use std::time::Duration;

fn tx_profile(id: i32, transaction_id: i32) -> ChargingProfile {
    ChargingProfile {
        charging_profile_id: id,
        transaction_id: Some(transaction_id),
        stack_level: 2,
        charging_profile_purpose: ChargingProfilePurposeType::TxProfile,
        charging_profile_kind: ChargingProfileKindType::Absolute,
        recurrency_kind: None,
        valid_from: None,
        valid_to: None,
        charging_schedule: ChargingSchedule::constant(ChargingRateUnitType::A, 16.0, Some(3)),
    }
}

#[tokio::test]
async fn test_rejected_status_is_returned_not_raised() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    fake.respond("Reset", json!({ "status": "Rejected" }));

    let result = harness
        .manager
        .execute_command(
            &tenant(),
            "CS-1",
            Command::Reset(ResetRequest {
                reset_type: ResetType::Hard,
            }),
        )
        .await
        .unwrap();

    assert!(!result.is_accepted());
    assert_eq!(result.status.as_deref(), Some("Rejected"));
    assert_eq!(fake.calls()[0].1, json!({ "type": "Hard" }));
}

#[tokio::test]
async fn test_missing_response_carries_command_and_params() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    fake.time_out("UnlockConnector");

    let err = harness
        .manager
        .execute_command(
            &tenant(),
            "CS-1",
            Command::UnlockConnector(UnlockConnectorRequest { connector_id: 1 }),
        )
        .await
        .unwrap_err();

    match err {
        CsmsError::CommandExecution {
            command, params, ..
        } => {
            assert_eq!(command, "UnlockConnector");
            assert_eq!(params, json!({ "connectorId": 1 }));
        }
        other => panic!("expected CommandExecution, got {:?}", other),
    }
    assert_eq!(fake.call_count("UnlockConnector"), 1);
}

#[tokio::test]
async fn test_unreachable_station() {
    let harness = Harness::new();
    // persisted, but no session can be opened
    harness
        .store
        .save_charging_station(&tenant(), &station("CS-404", "ABB", 1))
        .await
        .unwrap();

    let err = harness
        .manager
        .execute_command(
            &tenant(),
            "CS-404",
            Command::ClearCache(ClearCacheRequest {}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::DeviceUnreachable);
}

#[tokio::test]
async fn test_unlock_uses_its_own_accepted_status() {
    let harness = Harness::new();
    harness.add_station(&station("CS-1", "ABB", 2)).await;

    let result = harness
        .manager
        .execute_command(
            &tenant(),
            "CS-1",
            Command::UnlockConnector(UnlockConnectorRequest { connector_id: 2 }),
        )
        .await
        .unwrap();
    assert!(result.is_accepted());
}

#[tokio::test]
async fn test_accepted_change_refreshes_configuration() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    fake.respond(
        "GetConfiguration",
        json!({ "configurationKey": [
            { "key": "HeartbeatInterval", "readonly": false, "value": "120" },
            { "key": "MeterValueSampleInterval", "readonly": false, "value": "60" }
        ]}),
    );

    let result = harness
        .manager
        .execute_command(
            &tenant(),
            "CS-1",
            Command::ChangeConfiguration(ChangeConfigurationRequest {
                key: "HeartbeatInterval".to_string(),
                value: "120".to_string(),
            }),
        )
        .await
        .unwrap();
    assert!(result.is_accepted());

    harness.manager.drain().await;
    assert_eq!(fake.call_count("GetConfiguration"), 1);
    let stored = harness.load_station("CS-1").await;
    assert_eq!(stored.ocpp_parameters.len(), 2);
    assert_eq!(stored.parameter("heartbeatinterval"), Some("120"));
}

#[tokio::test]
async fn test_rejected_change_does_not_refresh() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    fake.respond("ChangeConfiguration", json!({ "status": "Rejected" }));

    harness
        .manager
        .execute_command(
            &tenant(),
            "CS-1",
            Command::ChangeConfiguration(ChangeConfigurationRequest {
                key: "HeartbeatInterval".to_string(),
                value: "120".to_string(),
            }),
        )
        .await
        .unwrap();

    harness.manager.drain().await;
    assert_eq!(fake.call_count("GetConfiguration"), 0);
}

#[tokio::test]
async fn test_refresh_failure_does_not_fail_the_change() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    fake.time_out("GetConfiguration");

    let result = harness
        .manager
        .execute_command(
            &tenant(),
            "CS-1",
            Command::ChangeConfiguration(ChangeConfigurationRequest {
                key: "HeartbeatInterval".to_string(),
                value: "120".to_string(),
            }),
        )
        .await;
    assert!(result.unwrap().is_accepted());

    harness.manager.drain().await;
    assert!(harness.load_station("CS-1").await.ocpp_parameters.is_empty());
}

#[tokio::test]
async fn test_schneider_hook_mirrors_max_intensity() {
    let harness = Harness::new();
    let fake = harness
        .add_station(&station("CS-S", "Schneider Electric", 2))
        .await;
    fake.respond(
        "GetConfiguration",
        json!({ "configurationKey": [
            { "key": "maxintensitysocket", "readonly": false, "value": "20" }
        ]}),
    );

    let result = harness
        .manager
        .set_power_limitation(&tenant(), "CS-S", 27_600.0)
        .await
        .unwrap();
    assert!(result.is_accepted());
    // 27600 W over two 3x230 V sockets
    assert_eq!(
        fake.calls()[0].1,
        json!({ "key": "maxintensitysocket", "value": "20" })
    );

    harness.manager.drain().await;
    let stored = harness.load_station("CS-S").await;
    for connector in &stored.connectors {
        assert_eq!(connector.amperage, 20.0);
        assert_eq!(connector.power, 13_800.0);
    }
    assert_eq!(stored.maximum_power, 27_600.0);
}

#[tokio::test]
async fn test_refresh_keeps_transaction_bound_while_pending() {
    let harness = Harness::new();
    let fake = harness
        .add_station(&station("CS-S", "Schneider Electric", 2))
        .await;
    fake.respond(
        "GetConfiguration",
        json!({ "configurationKey": [
            { "key": "maxintensitysocket", "readonly": false, "value": "20" }
        ]}),
    );

    harness
        .manager
        .set_power_limitation(&tenant(), "CS-S", 27_600.0)
        .await
        .unwrap();
    // The refresh is now waiting on a slow GetConfiguration
    fake.set_latency(Duration::from_millis(100));
    tokio::time::sleep(Duration::from_millis(20)).await;
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(77, "CS-S", 1, "T1", 0))
        .await
        .unwrap();

    harness.manager.drain().await;
    assert_eq!(fake.call_count("GetConfiguration"), 1);
    let stored = harness.load_station("CS-S").await;
    assert_eq!(stored.connector(1).unwrap().active_transaction_id, Some(77));
    assert_eq!(stored.connector(1).unwrap().amperage, 20.0);
    assert_eq!(stored.maximum_power, 27_600.0);
    assert_eq!(stored.parameter("maxintensitysocket"), Some("20"));
    let transaction = harness
        .store
        .get_transaction(&tenant(), 77)
        .await
        .unwrap()
        .unwrap();
    assert!(!transaction.is_stopped());
}

#[tokio::test]
async fn test_profile_round_trip_leaves_no_record() {
    let harness = Harness::new();
    harness.add_station(&station("CS-1", "ABB", 2)).await;

    let set = harness
        .manager
        .set_charging_profile(&tenant(), "CS-1", 1, tx_profile(7, 42))
        .await
        .unwrap();
    assert!(set.is_accepted());
    assert_eq!(harness.store.charging_profile_count(), 1);

    let record_id = ChargingProfileRecord::record_id("CS-1", 1, 7);
    let cleared = harness
        .manager
        .clear_charging_profile(&tenant(), &record_id)
        .await
        .unwrap();
    assert!(cleared.is_accepted());
    assert_eq!(harness.store.charging_profile_count(), 0);
}

#[tokio::test]
async fn test_rejected_profile_is_not_persisted() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    fake.respond("SetChargingProfile", json!({ "status": "Rejected" }));

    let result = harness
        .manager
        .set_charging_profile(&tenant(), "CS-1", 1, tx_profile(7, 42))
        .await
        .unwrap();
    assert!(!result.is_accepted());
    assert_eq!(harness.store.charging_profile_count(), 0);
}

#[tokio::test]
async fn test_clear_unknown_profile_deletes_record() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 1)).await;
    harness
        .manager
        .set_charging_profile(&tenant(), "CS-1", 1, tx_profile(3, 9))
        .await
        .unwrap();
    fake.respond("ClearChargingProfile", json!({ "status": "Unknown" }));

    let result = harness
        .manager
        .clear_charging_profile(&tenant(), &ChargingProfileRecord::record_id("CS-1", 1, 3))
        .await
        .unwrap();
    assert_eq!(result.status(), "Unknown");
    assert_eq!(harness.store.charging_profile_count(), 0);
}

#[tokio::test]
async fn test_profiles_need_the_capability() {
    let harness = Harness::new();
    let mut plain = station("CS-1", "ABB", 1);
    plain.capabilities.support_charging_profiles = false;
    let fake = harness.add_station(&plain).await;

    let err = harness
        .manager
        .set_charging_profile(&tenant(), "CS-1", 1, tx_profile(1, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::FeatureNotSupported);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_composite_schedule_falls_back_per_connector() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 2)).await;
    fake.respond_once("GetCompositeSchedule", json!({ "status": "Rejected" }));
    fake.respond(
        "GetCompositeSchedule",
        json!({
            "status": "Accepted",
            "chargingSchedule": {
                "chargingRateUnit": "A",
                "chargingSchedulePeriod": [{ "startPeriod": 0, "limit": 16.0 }]
            }
        }),
    );

    let results = harness
        .manager
        .get_composite_schedule(&tenant(), "CS-1", 0, 3600, Some(ChargingRateUnitType::A))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].connector_id, 1);
    assert_eq!(results[1].connector_id, 2);
    assert!(results[0].central_system_time <= results[1].central_system_time);
    for result in &results {
        let schedule = result.schedule.as_ref().unwrap();
        assert_eq!(schedule.connector_id, result.connector_id);
    }

    let requested: Vec<_> = fake
        .calls()
        .iter()
        .map(|(_, payload)| payload["connectorId"].clone())
        .collect();
    assert_eq!(requested, vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test]
async fn test_composite_fallback_keeps_results_of_other_connectors() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 3)).await;
    fake.respond_once("GetCompositeSchedule", json!({ "status": "Rejected" }));
    fake.respond_once(
        "GetCompositeSchedule",
        json!({
            "status": "Accepted",
            "chargingSchedule": {
                "chargingRateUnit": "A",
                "chargingSchedulePeriod": [{ "startPeriod": 0, "limit": 16.0 }]
            }
        }),
    );
    fake.time_out("GetCompositeSchedule");

    let results = harness
        .manager
        .get_composite_schedule(&tenant(), "CS-1", 0, 3600, Some(ChargingRateUnitType::A))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].status, "Accepted");
    assert!(results[0].schedule.is_some());
    assert!(results[0].error.is_none());
    for failed in &results[1..] {
        assert_eq!(failed.status, "Error");
        assert!(failed.schedule.is_none());
        assert!(failed.error.as_deref().unwrap().contains("GetCompositeSchedule"));
    }
    assert_eq!(fake.call_count("GetCompositeSchedule"), 4);
}

#[tokio::test]
async fn test_composite_schedule_station_wide_accepted() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-1", "ABB", 2)).await;
    fake.respond(
        "GetCompositeSchedule",
        json!({ "status": "Accepted", "connectorId": 0 }),
    );

    let results = harness
        .manager
        .get_composite_schedule(&tenant(), "CS-1", 0, 600, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(fake.call_count("GetCompositeSchedule"), 1);
}
