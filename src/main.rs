use std::sync::Arc;

use billing_core::{
    config::ProductsConfig,
    platform::{
        sandbox::TEST_PURCHASED_PRODUCT_ID, PlatformPricingPhase, PlatformProduct,
        SandboxActivity, SandboxPlatform, SubscriptionOffer,
    },
    BillingManager, Config, QueryResult,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,billing_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting billing sandbox demo");

    // Load configuration
    let mut config = Config::load()?;
    if config.products.is_empty() {
        config = config.with_products(ProductsConfig::new(
            ["premium_unlock"],
            ["sku_ads", TEST_PURCHASED_PRODUCT_ID],
            ["gold_sub"],
        ));
    }

    tracing::info!(
        "Loaded configuration - products: {} non-consumable, {} consumable, {} subscription",
        config.products.non_consumable_ids.len(),
        config.products.consumable_ids.len(),
        config.products.subscription_ids.len()
    );

    let platform = Arc::new(seed_platform(&config.products));
    let manager = BillingManager::new(platform, config);

    let message = manager.connect().await?;
    tracing::info!("{}", message);

    match manager.query_default_catalog().await {
        QueryResult::Success(entries) => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        QueryResult::Error(e) => return Err(e.into()),
        QueryResult::Loading => tracing::warn!("Catalog fetch already in flight"),
    }

    let mut settlements = manager.subscribe_settlements();
    let activity = SandboxActivity;
    if let QueryResult::Error(e) = manager
        .purchase(Some(&activity), TEST_PURCHASED_PRODUCT_ID, None)
        .await
    {
        return Err(e.into());
    }

    let report = settlements.recv().await?;
    tracing::info!(
        "Settlement: success={}, outcome={:?}, message={}",
        report.success,
        report.outcome,
        report.message
    );

    if let QueryResult::Success(owned) = manager.query_owned_purchases().await {
        println!("{}", serde_json::to_string_pretty(&owned)?);
    }

    manager.teardown().await;
    Ok(())
}

fn seed_platform(products: &ProductsConfig) -> SandboxPlatform {
    let mut platform = SandboxPlatform::new();

    for id in &products.non_consumable_ids {
        platform = platform.with_product(PlatformProduct::one_time(
            id, id, "$4.99", 4_990_000, "USD",
        ));
    }
    for id in &products.consumable_ids {
        platform = platform.with_product(PlatformProduct::one_time(
            id, id, "$0.99", 990_000, "USD",
        ));
    }
    for id in &products.subscription_ids {
        platform = platform.with_product(PlatformProduct::subscription(
            id,
            id,
            vec![
                SubscriptionOffer::new(
                    "weekly",
                    format!("{}-weekly", id),
                    vec![
                        PlatformPricingPhase::free_trial("USD", "P3D"),
                        PlatformPricingPhase::recurring("$1.99", 1_990_000, "USD", "P1W"),
                    ],
                ),
                SubscriptionOffer::new(
                    "monthly",
                    format!("{}-monthly", id),
                    vec![PlatformPricingPhase::recurring(
                        "$5.00", 5_000_000, "USD", "P1M",
                    )],
                ),
            ],
        ));
    }

    platform
}
