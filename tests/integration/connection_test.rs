use std::sync::Arc;

use std::time::Duration;

use billing_core::{
    models::{BillingEvent, BillingStatus, ConnectionState},
    platform::{
        sandbox::SandboxOperation, CommercePlatform, ResponseCode, SandboxActivity,
        SandboxPlatform,
    },
};

use super::{connected, ids, manager, next_settlement, purchased, sku_ads, within};

#[tokio::test]
async fn test_connect_moves_none_to_connected() {
    let platform = Arc::new(SandboxPlatform::new());
    let manager = manager(&platform);
    let mut events = manager.subscribe_events();

    assert_eq!(manager.connection_state(), ConnectionState::None);

    let result = manager.connect().await;
    assert!(result.is_ok(), "connect failed: {:?}", result);
    assert_eq!(manager.connection_state(), ConnectionState::Connected);

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BillingEvent::Connection { state, .. } = event {
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let platform = Arc::new(SandboxPlatform::new());
    let manager = connected(&platform).await;

    let second = manager.connect().await;

    assert!(second.is_ok());
    assert_eq!(platform.counters().connects, 1);
    assert_eq!(manager.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_connect_while_connecting_is_rejected() {
    let platform = Arc::new(SandboxPlatform::new());
    platform.pause(SandboxOperation::Connect);
    let manager = Arc::new(manager(&platform));

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect().await }
    });
    within(platform.wait_for_counters(|c| c.connects == 1)).await;

    let second = manager.connect().await;
    let err = second.expect_err("second connect should not queue");
    assert_eq!(err.code(), "CONNECTING_IN_PROGRESS");

    platform.resume(SandboxOperation::Connect);
    let first = within(first).await.expect("connect task");
    assert!(first.is_ok());
    assert_eq!(platform.counters().connects, 1);
}

#[tokio::test]
async fn test_connect_failure_can_be_retried() {
    let platform = Arc::new(SandboxPlatform::new());
    platform.force(SandboxOperation::Connect, ResponseCode::BillingUnavailable);
    let manager = manager(&platform);
    let mut events = manager.subscribe_events();

    let err = manager.connect().await.expect_err("setup should fail");
    assert_eq!(err.code(), "CONNECT_FAILED");
    assert_eq!(manager.connection_state(), ConnectionState::ConnectFailed);

    let mut statuses = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BillingEvent::Status(status) = event {
            statuses.push(status);
        }
    }
    assert!(statuses.contains(&BillingStatus::ConnectFailed));

    platform.clear_forced(SandboxOperation::Connect);
    assert!(manager.connect().await.is_ok());
    assert_eq!(manager.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_service_loss_reports_disconnected() {
    let platform = Arc::new(SandboxPlatform::new().with_product(sku_ads()));
    let manager = connected(&platform).await;
    let mut state = manager.watch_connection_state();
    let mut events = manager.subscribe_events();

    platform.disconnect();

    within(state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .expect("state channel open");

    let event = within(events.recv()).await.expect("event");
    assert!(matches!(
        event,
        BillingEvent::Connection {
            state: ConnectionState::Disconnected,
            success: false,
            ..
        }
    ));

    // No automatic reconnect
    assert_eq!(platform.counters().connects, 1);
    let result = manager
        .query_catalog(&[], &ids(&["sku_ads"]), &[])
        .await;
    assert_eq!(
        result.error().map(|e| e.code()),
        Some("CONNECTION_DISCONNECTED")
    );
}

#[tokio::test]
async fn test_teardown_resets_everything() {
    let platform = Arc::new(SandboxPlatform::new().with_product(sku_ads()));
    let manager = connected(&platform).await;
    assert!(manager
        .query_catalog(&[], &ids(&["sku_ads"]), &[])
        .await
        .is_success());

    manager.teardown().await;

    assert_eq!(manager.connection_state(), ConnectionState::None);
    assert!(!platform.is_ready());
    let cached = manager.get_cached_entry("sku_ads", None).await;
    assert_eq!(
        cached.error().map(|e| e.code()),
        Some("CATALOG_NOT_YET_FETCHED")
    );
    assert!(manager.watch_catalog().borrow().is_empty());

    assert!(manager.connect().await.is_ok());
    assert_eq!(platform.counters().connects, 2);
}

#[tokio::test]
async fn test_teardown_waits_for_in_flight_connect() {
    let platform = Arc::new(SandboxPlatform::new().with_product(sku_ads()));
    platform.pause(SandboxOperation::Connect);
    let manager = Arc::new(manager(&platform));

    let connecting = tokio::spawn({
        let manager = manager.clone();
        async move { manager.connect().await }
    });
    within(platform.wait_for_counters(|c| c.connects == 1)).await;

    let teardown = tokio::spawn({
        let manager = manager.clone();
        async move { manager.teardown().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!teardown.is_finished(), "teardown must wait for connect");

    platform.resume(SandboxOperation::Connect);
    assert!(within(connecting).await.expect("connect task").is_ok());
    within(teardown).await.expect("teardown task");

    assert_eq!(manager.connection_state(), ConnectionState::None);
    assert!(!platform.is_ready());

    // The new connection must be wired to a live event pump
    assert!(manager.connect().await.is_ok());
    assert_eq!(platform.counters().connects, 2);
    assert!(manager.query_default_catalog().await.is_success());
    let mut settlements = manager.subscribe_settlements();
    assert!(manager
        .purchase(Some(&SandboxActivity), "sku_ads", None)
        .await
        .is_success());
    platform.settle(purchased("tok-ads", "sku_ads"));

    let report = next_settlement(&mut settlements).await;
    assert!(report.success);
    assert_eq!(platform.counters().acknowledgements, 1);
    assert_eq!(platform.counters().consumptions, 1);
}
