use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use billing_core::{
    config::ProductsConfig,
    models::ProductType,
    platform::{
        sandbox::SandboxOperation, PurchaseState, ResponseCode, SandboxActivity, SandboxPlatform,
    },
    BillingManager, Config,
};

use super::{
    connected, gold_sub, ids, manager, premium_unlock, purchased, sku_ads, with_catalog, within,
};

#[tokio::test]
async fn test_empty_history_is_success() {
    let platform = Arc::new(SandboxPlatform::new());
    let manager = connected(&platform).await;

    let owned = manager
        .query_owned_purchases()
        .await
        .success()
        .expect("history fetched");

    assert!(owned.is_empty());
    assert_eq!(platform.counters().purchase_queries, 2);
    assert_eq!(platform.counters().product_queries, 0);
}

#[tokio::test]
async fn test_requires_connection() {
    let platform = Arc::new(SandboxPlatform::new());
    let manager = manager(&platform);

    let result = manager.query_owned_purchases().await;

    assert_eq!(result.error().map(|e| e.code()), Some("CONNECTION_INVALID"));
    assert_eq!(platform.counters().purchase_queries, 0);
}

#[tokio::test]
async fn test_unacknowledged_purchase_is_acknowledged() {
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(premium_unlock())
            .with_purchase(purchased("tok-premium", "premium_unlock")),
    );
    let manager = connected(&platform).await;

    let owned = manager
        .query_owned_purchases()
        .await
        .success()
        .expect("history fetched");

    assert_eq!(owned.len(), 1);
    let premium = &owned[0];
    assert_eq!(premium.product_type, ProductType::NonConsumable);
    assert_eq!(premium.product_title, "Premium");
    assert!(premium.acknowledged);
    assert!(!premium.consumed);

    assert_eq!(platform.counters().acknowledgements, 1);
    assert_eq!(platform.counters().consumptions, 0);
    assert!(platform.owned_purchases()[0].is_acknowledged);
}

#[tokio::test]
async fn test_consumables_are_labelled_and_consumed() {
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(sku_ads())
            .with_purchase(purchased("tok-ads", "sku_ads")),
    );
    let manager = with_catalog(&platform).await;

    let owned = manager
        .query_owned_purchases()
        .await
        .success()
        .expect("history fetched");

    assert_eq!(owned[0].product_type, ProductType::Consumable);
    assert!(owned[0].acknowledged);
    assert!(owned[0].consumed);
    assert!(platform.owned_purchases().is_empty());
}

#[tokio::test]
async fn test_subscription_is_labelled_with_plan() {
    let mut subscription = purchased("tok-gold", "gold_sub");
    subscription.is_acknowledged = true;
    subscription.is_auto_renewing = true;
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(gold_sub())
            .with_purchase(subscription),
    );
    let manager = connected(&platform).await;

    let owned = manager
        .query_owned_purchases()
        .await
        .success()
        .expect("history fetched");

    let gold = &owned[0];
    assert_eq!(gold.product_type, ProductType::Subscription);
    assert_eq!(gold.plan_id, "monthly");
    assert_eq!(gold.plan_title, "Monthly");
    assert!(gold.auto_renewing);
    assert_eq!(gold.purchased_at().map(|t| t.year()), Some(2023));
    assert_eq!(platform.counters().acknowledgements, 0);
}

#[tokio::test]
async fn test_pending_purchase_is_left_alone() {
    let mut pending = purchased("tok-pending", "premium_unlock");
    pending.purchase_state = PurchaseState::Pending;
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(premium_unlock())
            .with_purchase(pending),
    );
    let manager = connected(&platform).await;

    let owned = manager
        .query_owned_purchases()
        .await
        .success()
        .expect("history fetched");

    assert_eq!(owned.len(), 1);
    assert!(!owned[0].acknowledged);
    assert_eq!(platform.counters().acknowledgements, 0);
}

#[tokio::test]
async fn test_failed_acknowledge_is_retried_next_fetch() {
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(premium_unlock())
            .with_purchase(purchased("tok-premium", "premium_unlock")),
    );
    platform.force(SandboxOperation::Acknowledge, ResponseCode::ServiceUnavailable);
    let manager = connected(&platform).await;

    let first = manager.query_owned_purchases().await.success().expect("fetched");
    assert!(!first[0].acknowledged);

    platform.clear_forced(SandboxOperation::Acknowledge);
    let second = manager.query_owned_purchases().await.success().expect("fetched");
    assert!(second[0].acknowledged);
    assert_eq!(platform.counters().acknowledgements, 2);
}

#[tokio::test]
async fn test_platform_failure_is_reported() {
    let platform = Arc::new(SandboxPlatform::new());
    platform.force(SandboxOperation::QueryPurchases, ResponseCode::ServiceDisconnected);
    let manager = connected(&platform).await;

    let result = manager.query_owned_purchases().await;

    assert_eq!(result.error().map(|e| e.code()), Some("PLATFORM_ERROR"));
}

#[tokio::test]
async fn test_concurrent_fetch_is_single_flight() {
    let platform = Arc::new(SandboxPlatform::new());
    platform.pause(SandboxOperation::QueryPurchases);
    let manager = Arc::new(connected(&platform).await);

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.query_owned_purchases().await }
    });
    within(platform.wait_for_counters(|c| c.purchase_queries == 2)).await;

    assert!(manager.query_owned_purchases().await.is_loading());

    platform.resume(SandboxOperation::QueryPurchases);
    assert!(within(first).await.expect("fetch task").is_success());
    assert_eq!(platform.counters().purchase_queries, 2);
}

#[tokio::test]
async fn test_subscribers_receive_owned_list() {
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(premium_unlock())
            .with_purchase(purchased("tok-premium", "premium_unlock")),
    );
    let manager = connected(&platform).await;
    let mut updates = manager.subscribe_purchases();

    assert!(manager.query_owned_purchases().await.is_success());

    let published = within(updates.recv()).await.expect("owned list published");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].purchase_token, "tok-premium");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owned_lookups_do_not_block_refresh() {
    let mut owned = purchased("tok-gold", "gold_sub");
    owned.is_acknowledged = true;
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(gold_sub())
            .with_purchase(owned),
    );
    let manager = Arc::new(with_catalog(&platform).await);
    assert!(manager.query_owned_purchases().await.is_success());

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let manager = manager.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                while !stop.load(Ordering::Relaxed) {
                    // Old plan is never owned, so the lookup misses and nothing launches
                    let result = manager
                        .update_subscription(
                            Some(&SandboxActivity),
                            "gold_sub",
                            "weekly",
                            "gold_sub",
                            "yearly",
                        )
                        .await;
                    assert_eq!(result.error().map(|e| e.code()), Some("PLAN_NOT_FOUND"));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for _ in 0..200 {
        let result = manager.query_owned_purchases().await;
        assert!(result.is_success(), "refresh with no fetch running: {:?}", result);
    }

    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        within(reader).await.expect("reader task");
    }
    assert_eq!(platform.counters().launches, 0);
}

#[tokio::test]
async fn test_teardown_forgets_queried_consumables() {
    let platform = Arc::new(
        SandboxPlatform::new()
            .with_product(sku_ads())
            .with_purchase(purchased("tok-ads", "sku_ads")),
    );
    let config = Config::default().with_products(ProductsConfig::new(["premium_unlock"], [], []));
    let manager = BillingManager::new(platform.clone(), config);
    manager.connect().await.expect("sandbox connects");
    assert!(manager
        .query_catalog(&[], &ids(&["sku_ads"]), &[])
        .await
        .is_success());

    manager.teardown().await;
    manager.connect().await.expect("sandbox reconnects");

    let owned = manager
        .query_owned_purchases()
        .await
        .success()
        .expect("history fetched");
    assert_eq!(owned[0].product_type, ProductType::NonConsumable);
    assert!(!owned[0].consumed);
    assert_eq!(platform.counters().consumptions, 0);
}
