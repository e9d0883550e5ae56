mod common;

use chrono::Utc;
use common::{station, tenant, Harness};
use ocpp_station_manager::auth::UserContext;
use ocpp_station_manager::model::Transaction;
use ocpp_station_manager::store::Store;
use ocpp_station_manager::transactions::{RemoteStopOutcome, StopEvent};
use ocpp_station_manager::{CsmsError, ErrorCode};
use ocpp_types::v16j::{ChargePointErrorCode, ChargePointStatus};
use proptest::prelude::*;
use serde_json::json;

fn owner() -> UserContext {
    UserContext::basic("u1", vec!["T1".to_string()])
}

#[tokio::test]
async fn test_remote_start_does_not_bind_the_connector() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 2)).await;

    let result = harness
        .manager
        .remote_start(&tenant(), "CS-A", 1, "T1")
        .await
        .unwrap();

    assert!(result.is_accepted());
    assert_eq!(
        fake.calls()[0].1,
        json!({ "connectorId": 1, "idTag": "T1" })
    );
    let stored = harness.load_station("CS-A").await;
    assert_eq!(stored.connector(1).unwrap().active_transaction_id, None);
}

#[tokio::test]
async fn test_remote_start_requires_authorization() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 1)).await;

    let err = harness
        .manager
        .remote_start(&tenant(), "CS-A", 1, "UNKNOWN")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Authorization);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_remote_start_on_occupied_or_faulted_connector() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 2)).await;
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(5, "CS-A", 1, "T2", 0))
        .await
        .unwrap();
    harness
        .manager
        .update_connector_status(
            &tenant(),
            "CS-A",
            2,
            ChargePointStatus::Unavailable,
            ChargePointErrorCode::NoError,
        )
        .await
        .unwrap();

    for connector_id in [1, 2] {
        let err = harness
            .manager
            .remote_start(&tenant(), "CS-A", connector_id, "T1")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConnectorNotAvailable);
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_delete_blocked_by_active_transaction() {
    let harness = Harness::new();
    harness.add_station(&station("CS-B", "ABB", 2)).await;
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(42, "CS-B", 2, "T1", 0))
        .await
        .unwrap();

    let err = harness.manager.can_delete(&tenant(), "CS-B").await.unwrap_err();
    assert!(matches!(
        err,
        CsmsError::ExistingTransaction {
            connector_id: 2,
            transaction_id: 42,
            ..
        }
    ));
    assert!(harness
        .manager
        .delete_charging_station(&tenant(), "CS-B")
        .await
        .is_err());

    harness.manager.soft_stop(&tenant(), 42, None).await.unwrap();
    harness
        .manager
        .delete_charging_station(&tenant(), "CS-B")
        .await
        .unwrap();
    assert!(harness
        .store
        .get_charging_station(&tenant(), "CS-B")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_remote_stop_without_transaction_id_sends_nothing() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 1)).await;

    let err = harness
        .manager
        .remote_stop(&tenant(), None, "T1", &owner())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Validation);
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_remote_stop_marker_written_before_dispatch_and_kept_on_rejection() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 1)).await;
    fake.respond("RemoteStopTransaction", json!({ "status": "Rejected" }));
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(11, "CS-A", 1, "T1", 100))
        .await
        .unwrap();

    let outcome = harness
        .manager
        .remote_stop(&tenant(), Some(11), "T1", &owner())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RemoteStopOutcome::InFlight {
            status: "Rejected".to_string()
        }
    );

    let transaction = harness
        .store
        .get_transaction(&tenant(), 11)
        .await
        .unwrap()
        .unwrap();
    let marker = transaction.remotestop.unwrap();
    assert_eq!(marker.tag_id, "T1");
    assert_eq!(marker.user_id.as_deref(), Some("u1"));
    assert!(transaction.stop.is_none());
    assert_eq!(fake.call_count("RemoteStopTransaction"), 1);
}

#[tokio::test]
async fn test_marker_present_even_when_station_times_out() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 1)).await;
    fake.time_out("RemoteStopTransaction");
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(12, "CS-A", 1, "T1", 0))
        .await
        .unwrap();

    let err = harness
        .manager
        .remote_stop(&tenant(), Some(12), "T1", &owner())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::CommandExecution);

    let transaction = harness
        .store
        .get_transaction(&tenant(), 12)
        .await
        .unwrap()
        .unwrap();
    assert!(transaction.remotestop.is_some());
}

#[tokio::test]
async fn test_remote_stop_by_stranger_is_refused() {
    let harness = Harness::new();
    let fake = harness.add_station(&station("CS-A", "ABB", 1)).await;
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(13, "CS-A", 1, "T1", 0))
        .await
        .unwrap();

    let stranger = UserContext::basic("u9", vec!["T2".to_string()]);
    let err = harness
        .manager
        .remote_stop(&tenant(), Some(13), "T2", &stranger)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::Authorization);
    assert!(fake.calls().is_empty());

    let transaction = harness
        .store
        .get_transaction(&tenant(), 13)
        .await
        .unwrap()
        .unwrap();
    assert!(transaction.remotestop.is_none());

    let admin = UserContext::admin("root");
    let outcome = harness
        .manager
        .remote_stop(&tenant(), Some(13), "ADMIN", &admin)
        .await
        .unwrap();
    assert_eq!(outcome, RemoteStopOutcome::Accepted);
}

#[tokio::test]
async fn test_stop_event_correlates_remote_stop() {
    let harness = Harness::new();
    harness.add_station(&station("CS-A", "ABB", 1)).await;
    harness
        .manager
        .bind_transaction(&tenant(), &Transaction::new(20, "CS-A", 1, "T1", 1_000))
        .await
        .unwrap();
    harness
        .manager
        .remote_stop(&tenant(), Some(20), "T1", &owner())
        .await
        .unwrap();

    let stopped = harness
        .manager
        .record_stop(
            &tenant(),
            StopEvent {
                transaction_id: 20,
                timestamp: Utc::now(),
                meter_stop: 6_000,
                tag_id: None,
                reason: Some("Remote".to_string()),
            },
        )
        .await
        .unwrap();

    let stop = stopped.stop.unwrap();
    assert_eq!(stop.tag_id.as_deref(), Some("T1"));
    assert_eq!(stop.user_id.as_deref(), Some("u1"));
    assert_eq!(stop.total_consumption_wh, 5_000);
    assert!(!stop.soft_stop);
    let stored = harness.load_station("CS-A").await;
    assert_eq!(stored.connector(1).unwrap().active_transaction_id, None);

    assert!(!harness
        .manager
        .free_connector(&tenant(), "CS-A", 1, 20)
        .await
        .unwrap());
}

#[derive(Debug, Clone)]
enum Op {
    Bind { connector: u32 },
    Stop { pick: usize },
    SoftStop { pick: usize },
    Free { connector: u32, pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..=3).prop_map(|connector| Op::Bind { connector }),
        any::<usize>().prop_map(|pick| Op::Stop { pick }),
        any::<usize>().prop_map(|pick| Op::SoftStop { pick }),
        ((1u32..=3), any::<usize>()).prop_map(|(connector, pick)| Op::Free { connector, pick }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_active_transaction_matches_open_transactions(ops in proptest::collection::vec(op(), 1..25)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let harness = Harness::new();
            harness.add_station(&station("CS-P", "ABB", 3)).await;
            let mut next_id = 1;
            let mut ids: Vec<i32> = Vec::new();

            for op in ops {
                match op {
                    Op::Bind { connector } => {
                        let tx = Transaction::new(next_id, "CS-P", connector, "T1", 0);
                        harness.manager.bind_transaction(&tenant(), &tx).await.unwrap();
                        ids.push(next_id);
                        next_id += 1;
                    }
                    Op::Stop { pick } if !ids.is_empty() => {
                        let id = ids[pick % ids.len()];
                        let _ = harness.manager.record_stop(&tenant(), StopEvent {
                            transaction_id: id,
                            timestamp: Utc::now(),
                            meter_stop: 10,
                            tag_id: None,
                            reason: None,
                        }).await;
                    }
                    Op::SoftStop { pick } if !ids.is_empty() => {
                        let id = ids[pick % ids.len()];
                        let _ = harness.manager.soft_stop(&tenant(), id, None).await;
                    }
                    Op::Free { connector, pick } if !ids.is_empty() => {
                        let id = ids[pick % ids.len()];
                        let tx = harness.store.get_transaction(&tenant(), id).await.unwrap().unwrap();
                        // only a closed transaction may release its connector
                        if tx.is_stopped() {
                            harness.manager.free_connector(&tenant(), "CS-P", connector, id).await.unwrap();
                        }
                    }
                    _ => {}
                }
            }

            let station = harness.load_station("CS-P").await;
            for connector in &station.connectors {
                let mut open = Vec::new();
                for id in &ids {
                    let tx = harness.store.get_transaction(&tenant(), *id).await.unwrap().unwrap();
                    if tx.connector_id == connector.connector_id && !tx.is_stopped() {
                        open.push(*id);
                    }
                }
                match connector.active_transaction_id {
                    Some(active) => assert_eq!(open, vec![active]),
                    None => assert!(open.is_empty()),
                }
            }
        });
    }
}
