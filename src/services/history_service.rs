use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::BillingError,
    models::{
        catalog, BillingStatus, OwnedPurchase, ProductType, QueryResult,
        ReconciliationReport,
    },
    platform::{
        BillingResponse, CommercePlatform, PlatformProduct, PlatformProductKind, PlatformPurchase,
        PlatformResult,
    },
    services::{CatalogService, ConnectionService, ReconciliationService, StateBus},
};

pub struct HistoryService<P: CommercePlatform> {
    platform: Arc<P>,
    connection: Arc<ConnectionService<P>>,
    catalog: Arc<CatalogService<P>>,
    reconciliation: Arc<ReconciliationService<P>>,
    bus: Arc<StateBus>,
    in_flight: Mutex<()>,
    owned: RwLock<Vec<OwnedPurchase>>,
    purchases_tx: broadcast::Sender<Vec<OwnedPurchase>>,
}

impl<P: CommercePlatform> HistoryService<P> {
    pub fn new(
        platform: Arc<P>,
        connection: Arc<ConnectionService<P>>,
        catalog: Arc<CatalogService<P>>,
        reconciliation: Arc<ReconciliationService<P>>,
        bus: Arc<StateBus>,
        capacity: usize,
    ) -> Self {
        let (purchases_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            platform,
            connection,
            catalog,
            reconciliation,
            bus,
            in_flight: Mutex::new(()),
            owned: RwLock::new(Vec::new()),
            purchases_tx,
        }
    }

    /// Reads owned purchases from the platform's local cache, labels them and
    /// settles any that are still unacknowledged or unconsumed.
    #[instrument(skip(self))]
    pub async fn query_owned_purchases(&self) -> QueryResult<Vec<OwnedPurchase>> {
        if let Err(e) = self.connection.ensure_ready() {
            return QueryResult::Error(e);
        }

        let Ok(_in_flight) = self.in_flight.try_lock() else {
            debug!("Owned purchases fetch already in flight");
            return QueryResult::Loading;
        };

        self.bus.status(BillingStatus::FetchingPurchases);

        let (in_app, subs) = tokio::join!(
            self.platform.query_purchases(PlatformProductKind::InApp),
            self.platform.query_purchases(PlatformProductKind::Subs),
        );

        let (in_app, subs) = match (in_app, subs) {
            (Ok(in_app), Ok(subs)) => (in_app, subs),
            (Err(response), _) | (_, Err(response)) => {
                return self.fetch_failed("query_purchases", response);
            }
        };

        let (in_app_details, subs_details) = tokio::join!(
            self.details_for(PlatformProductKind::InApp, &in_app),
            self.details_for(PlatformProductKind::Subs, &subs),
        );

        let details: HashMap<String, PlatformProduct> = match (in_app_details, subs_details) {
            (Ok(a), Ok(b)) => a
                .into_iter()
                .chain(b)
                .map(|product| (product.product_id.clone(), product))
                .collect(),
            (Err(response), _) | (_, Err(response)) => {
                return self.fetch_failed("query_product_details", response);
            }
        };

        let consumable_ids = self.catalog.consumable_ids();
        let mut purchases: Vec<OwnedPurchase> = in_app
            .iter()
            .map(|p| label(p, PlatformProductKind::InApp, &details, &consumable_ids))
            .chain(
                subs.iter()
                    .map(|p| label(p, PlatformProductKind::Subs, &details, &consumable_ids)),
            )
            .collect();

        let platform_purchases: Vec<PlatformPurchase> = in_app.into_iter().chain(subs).collect();
        let report = self
            .reconciliation
            .reconcile(&platform_purchases, &consumable_ids)
            .await;
        apply_report(&mut purchases, &report);

        *self.owned.write().await = purchases.clone();
        let _ = self.purchases_tx.send(purchases.clone());

        info!("Owned purchases fetched: {}", purchases.len());
        self.bus.status(BillingStatus::PurchasesFetched);
        QueryResult::Success(purchases)
    }

    /// Owned purchase for the product/plan from the last successful fetch
    pub async fn cached_purchase(&self, product_id: &str, plan_id: &str) -> Option<OwnedPurchase> {
        self.owned
            .read()
            .await
            .iter()
            .find(|p| p.product_id == product_id && p.plan_id == plan_id)
            .cloned()
    }

    /// Folds acknowledgement/consumption results into the cached list
    pub async fn apply_report(&self, report: &ReconciliationReport) {
        let mut owned = self.owned.write().await;
        apply_report(&mut owned, report);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<OwnedPurchase>> {
        self.purchases_tx.subscribe()
    }

    pub async fn clear(&self) {
        self.owned.write().await.clear();
    }

    async fn details_for(
        &self,
        kind: PlatformProductKind,
        purchases: &[PlatformPurchase],
    ) -> PlatformResult<Vec<PlatformProduct>> {
        let mut seen = HashSet::new();
        let ids: Vec<String> = purchases
            .iter()
            .flat_map(|p| p.product_ids.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.platform.query_product_details(kind, &ids).await
    }

    fn fetch_failed(
        &self,
        operation: &'static str,
        response: BillingResponse,
    ) -> QueryResult<Vec<OwnedPurchase>> {
        warn!("Owned purchases fetch failed at {}: {}", operation, response);
        self.bus.status(BillingStatus::PurchasesFetchFailed);
        QueryResult::Error(BillingError::platform(operation, response))
    }
}

fn label(
    purchase: &PlatformPurchase,
    kind: PlatformProductKind,
    details: &HashMap<String, PlatformProduct>,
    consumable_ids: &HashSet<String>,
) -> OwnedPurchase {
    let product_id = purchase.product_ids.first().cloned().unwrap_or_default();
    let product = details.get(&product_id);

    let product_type = match kind {
        PlatformProductKind::Subs => ProductType::Subscription,
        PlatformProductKind::InApp if consumable_ids.contains(&product_id) => {
            ProductType::Consumable
        }
        PlatformProductKind::InApp => ProductType::NonConsumable,
    };

    // Subscriptions are labelled from the first offer and its full-price phase
    let offer = product.and_then(|p| p.subscription_offers.first());
    let plan_id = offer.map(|o| o.base_plan_id.clone()).unwrap_or_default();
    let plan_title = offer
        .and_then(|o| {
            o.pricing_phases
                .iter()
                .find(|phase| phase.price_amount_micros > 0 && phase.billing_period != "P0D")
        })
        .map(|phase| catalog::plan_title(&phase.billing_period).to_string())
        .unwrap_or_default();

    OwnedPurchase {
        product_title: product.map(|p| p.title.clone()).unwrap_or_default(),
        product_id,
        plan_id,
        plan_title,
        purchase_token: purchase.purchase_token.clone(),
        product_type,
        purchase_state: purchase.purchase_state,
        purchase_time_millis: purchase.purchase_time_millis,
        auto_renewing: purchase.is_auto_renewing,
        acknowledged: purchase.is_acknowledged,
        consumed: false,
    }
}

fn apply_report(purchases: &mut [OwnedPurchase], report: &ReconciliationReport) {
    for purchase in purchases.iter_mut() {
        if let Some(outcome) = report.outcome(&purchase.purchase_token) {
            purchase.acknowledged |= outcome.acknowledged;
            purchase.consumed |= outcome.consumed;
        }
    }
}
