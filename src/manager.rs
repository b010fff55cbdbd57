use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    config::Config,
    error::Result,
    models::{
        BillingEvent, ConnectionState, OwnedPurchase, ProductCatalogEntry, QueryResult,
        SettlementReport,
    },
    platform::{CommercePlatform, PlatformEvent, PlatformListener},
    services::{
        CatalogService, ConnectionService, HistoryService, PurchaseService,
        ReconciliationService, StateBus,
    },
};

/// Task draining platform callbacks, plus the listener that feeds it
struct EventPump {
    listener: PlatformListener,
    handle: JoinHandle<()>,
}

/// Entry point for application code. One shared instance per platform client.
pub struct BillingManager<P: CommercePlatform> {
    config: Config,
    bus: Arc<StateBus>,
    connection: Arc<ConnectionService<P>>,
    catalog: Arc<CatalogService<P>>,
    history: Arc<HistoryService<P>>,
    purchases: Arc<PurchaseService<P>>,
    pump: Mutex<Option<EventPump>>,
}

impl<P: CommercePlatform> BillingManager<P> {
    pub fn new(platform: Arc<P>, config: Config) -> Self {
        let capacity = config.events.channel_capacity;
        let bus = Arc::new(StateBus::new(capacity));

        let connection = Arc::new(ConnectionService::new(platform.clone(), bus.clone()));
        let catalog = Arc::new(CatalogService::new(
            platform.clone(),
            connection.clone(),
            bus.clone(),
            config.products.consumable_ids.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(platform.clone(), bus.clone()));
        let history = Arc::new(HistoryService::new(
            platform.clone(),
            connection.clone(),
            catalog.clone(),
            reconciliation.clone(),
            bus.clone(),
            capacity,
        ));
        let purchases = Arc::new(PurchaseService::new(
            platform,
            connection.clone(),
            catalog.clone(),
            history.clone(),
            reconciliation,
            bus.clone(),
            &config.purchase,
            capacity,
        ));

        Self {
            config,
            bus,
            connection,
            catalog,
            history,
            purchases,
            pump: Mutex::new(None),
        }
    }

    /// Connects to the billing service. Ok carries a status message.
    pub async fn connect(&self) -> Result<String> {
        self.connection.connect(|| self.ensure_pump()).await
    }

    pub async fn query_catalog(
        &self,
        non_consumable_ids: &[String],
        consumable_ids: &[String],
        subscription_ids: &[String],
    ) -> QueryResult<Vec<ProductCatalogEntry>> {
        self.catalog
            .query_catalog(non_consumable_ids, consumable_ids, subscription_ids)
            .await
    }

    /// Queries the product ids listed in the configuration
    pub async fn query_default_catalog(&self) -> QueryResult<Vec<ProductCatalogEntry>> {
        let products = &self.config.products;
        self.catalog
            .query_catalog(
                &products.non_consumable_ids,
                &products.consumable_ids,
                &products.subscription_ids,
            )
            .await
    }

    pub async fn get_cached_entry(
        &self,
        product_id: &str,
        plan_id: Option<&str>,
    ) -> QueryResult<Vec<ProductCatalogEntry>> {
        self.catalog.get_cached_entry(product_id, plan_id).await
    }

    pub async fn query_owned_purchases(&self) -> QueryResult<Vec<OwnedPurchase>> {
        self.history.query_owned_purchases().await
    }

    pub async fn purchase(
        &self,
        context: Option<&P::UiContext>,
        product_id: &str,
        plan_id: Option<&str>,
    ) -> QueryResult<()> {
        self.purchases.purchase(context, product_id, plan_id).await
    }

    pub async fn update_subscription(
        &self,
        context: Option<&P::UiContext>,
        old_product_id: &str,
        old_plan_id: &str,
        product_id: &str,
        plan_id: &str,
    ) -> QueryResult<()> {
        self.purchases
            .update_subscription(context, old_product_id, old_plan_id, product_id, plan_id)
            .await
    }

    /// Closes the connection and drops everything learned so far.
    /// A later `connect()` starts from scratch.
    /// Waits for an in-flight `connect()` to finish first.
    pub async fn teardown(&self) {
        let _lifecycle = self.connection.lock_lifecycle().await;
        if let Some(pump) = self.take_pump() {
            pump.handle.abort();
        }
        self.connection.teardown().await;
        self.catalog.clear().await;
        self.history.clear().await;
        info!("Billing manager torn down");
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.bus.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.bus.watch_state()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BillingEvent> {
        self.bus.subscribe()
    }

    pub fn watch_catalog(&self) -> watch::Receiver<Arc<Vec<ProductCatalogEntry>>> {
        self.catalog.watch()
    }

    pub fn subscribe_purchases(&self) -> broadcast::Receiver<Vec<OwnedPurchase>> {
        self.history.subscribe()
    }

    pub fn subscribe_settlements(&self) -> broadcast::Receiver<SettlementReport> {
        self.purchases.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the live pump's listener, spawning the pump if needed
    fn ensure_pump(&self) -> PlatformListener {
        let mut pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pump.as_ref().filter(|p| !p.handle.is_finished()) {
            return existing.listener.clone();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = self.connection.clone();
        let purchases = self.purchases.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    PlatformEvent::ServiceDisconnected => connection.on_service_disconnected(),
                    PlatformEvent::PurchasesUpdated {
                        response,
                        purchases: updated,
                    } => {
                        purchases.on_purchases_updated(response, updated).await;
                    }
                }
            }
            debug!("Platform event pump stopped");
        });

        let listener = PlatformListener::new(tx);
        *pump = Some(EventPump {
            listener: listener.clone(),
            handle,
        });
        listener
    }

    fn take_pump(&self) -> Option<EventPump> {
        self.pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<P: CommercePlatform> Drop for BillingManager<P> {
    fn drop(&mut self) {
        if let Some(pump) = self.take_pump() {
            pump.handle.abort();
        }
    }
}
