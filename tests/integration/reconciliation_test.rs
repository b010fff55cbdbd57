use std::collections::HashSet;
use std::sync::Arc;

use billing_core::{
    error::ReconciliationError,
    models::SkipReason,
    platform::{
        sandbox::{SandboxCall, SandboxOperation},
        ResponseCode, SandboxPlatform,
    },
    services::{ReconciliationService, StateBus},
};

use super::{ids, purchased, within};

fn engine(platform: &Arc<SandboxPlatform>) -> ReconciliationService<SandboxPlatform> {
    ReconciliationService::new(platform.clone(), Arc::new(StateBus::new(16)))
}

fn consumables(list: &[&str]) -> HashSet<String> {
    ids(list).into_iter().collect()
}

fn settle_calls(platform: &SandboxPlatform) -> Vec<SandboxCall> {
    platform
        .calls()
        .into_iter()
        .filter(|c| matches!(c, SandboxCall::Acknowledge(_) | SandboxCall::Consume(_)))
        .collect()
}

#[tokio::test]
async fn test_acknowledge_strictly_before_consume() {
    let purchases = vec![purchased("tok-1", "sku_ads"), purchased("tok-2", "sku_coins")];
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_purchase(purchases[0].clone())
            .with_purchase(purchases[1].clone()),
    );
    let engine = engine(&platform);

    let report = engine
        .reconcile(&purchases, &consumables(&["sku_ads", "sku_coins"]))
        .await;

    assert!(!report.has_errors());
    for token in ["tok-1", "tok-2"] {
        let calls = settle_calls(&platform);
        let ack = calls
            .iter()
            .position(|c| *c == SandboxCall::Acknowledge(token.to_string()))
            .expect("acknowledged");
        let consume = calls
            .iter()
            .position(|c| *c == SandboxCall::Consume(token.to_string()))
            .expect("consumed");
        assert!(ack < consume, "{} consumed before acknowledgement", token);
    }
}

#[tokio::test]
async fn test_acknowledged_purchase_is_only_consumed() {
    let mut purchase = purchased("tok-1", "sku_ads");
    purchase.is_acknowledged = true;
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    let engine = engine(&platform);

    let report = engine.reconcile(&[purchase], &consumables(&["sku_ads"])).await;

    assert_eq!(
        settle_calls(&platform),
        vec![SandboxCall::Consume("tok-1".to_string())]
    );
    let outcome = report.outcome("tok-1").expect("reconciled");
    assert!(outcome.acknowledged && outcome.consumed);
}

#[tokio::test]
async fn test_non_consumable_is_only_acknowledged() {
    let purchase = purchased("tok-1", "premium_unlock");
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    let engine = engine(&platform);

    let report = engine.reconcile(&[purchase], &consumables(&["sku_ads"])).await;

    assert_eq!(
        settle_calls(&platform),
        vec![SandboxCall::Acknowledge("tok-1".to_string())]
    );
    assert!(!report.outcome("tok-1").expect("reconciled").consumed);
}

#[tokio::test]
async fn test_failed_acknowledge_skips_consume() {
    let purchase = purchased("tok-1", "sku_ads");
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    platform.force(SandboxOperation::Acknowledge, ResponseCode::Error);
    let engine = engine(&platform);

    let report = engine.reconcile(&[purchase], &consumables(&["sku_ads"])).await;

    assert_eq!(platform.counters().consumptions, 0);
    let outcome = report.outcome("tok-1").expect("reconciled");
    assert!(!outcome.acknowledged);
    assert!(matches!(
        outcome.error,
        Some(ReconciliationError::AcknowledgeFailed { .. })
    ));
}

#[tokio::test]
async fn test_consume_failure_is_reported() {
    let purchase = purchased("tok-1", "sku_ads");
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    platform.force(SandboxOperation::Consume, ResponseCode::ServiceUnavailable);
    let engine = engine(&platform);

    let report = engine.reconcile(&[purchase], &consumables(&["sku_ads"])).await;

    let outcome = report.outcome("tok-1").expect("reconciled");
    assert!(outcome.acknowledged);
    assert!(!outcome.consumed);
    assert!(matches!(
        outcome.error,
        Some(ReconciliationError::ConsumeFailed { .. })
    ));
}

#[tokio::test]
async fn test_reconsume_is_tolerated() {
    let purchase = purchased("tok-1", "sku_ads");
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    let engine = engine(&platform);
    let consumable = consumables(&["sku_ads"]);

    let first = engine.reconcile(&[purchase.clone()], &consumable).await;
    assert!(first.outcome("tok-1").expect("reconciled").consumed);

    let mut replayed = purchase;
    replayed.is_acknowledged = true;
    let second = engine.reconcile(&[replayed], &consumable).await;

    let outcome = second.outcome("tok-1").expect("reconciled");
    assert!(outcome.consumed);
    assert!(outcome.error.is_none());
    assert_eq!(platform.counters().consumptions, 2);
}

#[tokio::test]
async fn test_duplicate_tokens_settle_once() {
    let purchase = purchased("tok-1", "sku_ads");
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    let engine = engine(&platform);

    let report = engine
        .reconcile(&[purchase.clone(), purchase], &consumables(&["sku_ads"]))
        .await;

    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(platform.counters().acknowledgements, 1);
    assert_eq!(platform.counters().consumptions, 1);
}

#[tokio::test]
async fn test_in_flight_token_is_skipped() {
    let purchase = purchased("tok-1", "sku_ads");
    let platform = Arc::new(SandboxPlatform::new().with_purchase(purchase.clone()));
    platform.pause(SandboxOperation::Acknowledge);
    let engine = Arc::new(engine(&platform));
    let consumable = consumables(&["sku_ads"]);

    let first = tokio::spawn({
        let engine = engine.clone();
        let purchase = purchase.clone();
        let consumable = consumable.clone();
        async move { engine.reconcile(&[purchase], &consumable).await }
    });
    within(platform.wait_for_counters(|c| c.acknowledgements == 1)).await;

    let second = engine.reconcile(&[purchase], &consumable).await;
    assert_eq!(
        second.outcome("tok-1").and_then(|o| o.skipped),
        Some(SkipReason::InFlight)
    );

    platform.resume(SandboxOperation::Acknowledge);
    let first = within(first).await.expect("reconcile task");
    assert!(first.outcome("tok-1").expect("reconciled").consumed);
    assert_eq!(platform.counters().acknowledgements, 1);
}
