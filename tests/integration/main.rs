// Integration tests

mod connection_test;
mod history_test;
mod reconciliation_test;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use billing_core::{
    config::ProductsConfig,
    models::SettlementReport,
    platform::{
        PlatformPricingPhase, PlatformProduct, PlatformPurchase, SandboxPlatform,
        SubscriptionOffer,
    },
    BillingManager, Config,
};
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|id| id.to_string()).collect()
}

pub fn sku_ads() -> PlatformProduct {
    PlatformProduct::one_time("sku_ads", "Remove ads", "$2.00", 2_000_000, "USD")
}

pub fn premium_unlock() -> PlatformProduct {
    PlatformProduct::one_time("premium_unlock", "Premium", "$9.99", 9_990_000, "USD")
}

/// Subscription with a trial-led monthly plan and a plain yearly plan
pub fn gold_sub() -> PlatformProduct {
    PlatformProduct::subscription(
        "gold_sub",
        "Gold",
        vec![
            SubscriptionOffer::new(
                "monthly",
                "gold-monthly",
                vec![
                    PlatformPricingPhase::recurring("$4.99", 4_990_000, "USD", "P1M"),
                    PlatformPricingPhase::free_trial("USD", "P1W"),
                ],
            ),
            SubscriptionOffer::new(
                "yearly",
                "gold-yearly",
                vec![PlatformPricingPhase::recurring(
                    "$39.99", 39_990_000, "USD", "P1Y",
                )],
            ),
        ],
    )
}

/// Same product id, but only the yearly plan is on sale
pub fn gold_sub_yearly_only() -> PlatformProduct {
    PlatformProduct::subscription(
        "gold_sub",
        "Gold",
        vec![SubscriptionOffer::new(
            "yearly",
            "gold-yearly",
            vec![PlatformPricingPhase::recurring(
                "$39.99", 39_990_000, "USD", "P1Y",
            )],
        )],
    )
}

pub fn test_config() -> Config {
    Config::default().with_products(ProductsConfig::new(
        ["premium_unlock"],
        ["sku_ads"],
        ["gold_sub"],
    ))
}

pub fn manager(platform: &Arc<SandboxPlatform>) -> BillingManager<SandboxPlatform> {
    BillingManager::new(platform.clone(), test_config())
}

pub async fn connected(platform: &Arc<SandboxPlatform>) -> BillingManager<SandboxPlatform> {
    let manager = manager(platform);
    manager.connect().await.expect("sandbox connects");
    manager
}

/// Connected manager with the default catalog already fetched
pub async fn with_catalog(platform: &Arc<SandboxPlatform>) -> BillingManager<SandboxPlatform> {
    let manager = connected(platform).await;
    assert!(manager.query_default_catalog().await.is_success());
    manager
}

pub fn purchased(token: &str, product_id: &str) -> PlatformPurchase {
    let mut purchase = PlatformPurchase::purchased(token, product_id);
    purchase.purchase_time_millis = 1_700_000_000_000;
    purchase
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for billing engine")
}

pub async fn next_settlement(rx: &mut broadcast::Receiver<SettlementReport>) -> SettlementReport {
    within(rx.recv()).await.expect("settlement channel open")
}
