use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::{watch, Mutex, RwLock as AsyncRwLock};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::{BillingError, NotFoundError, ValidationError},
    models::{BillingStatus, ProductCatalogEntry, ProductType, QueryResult},
    platform::{CommercePlatform, PlatformProduct, PlatformProductKind, PlatformResult},
    services::{ConnectionService, StateBus},
};

/// A cached catalog entry together with the platform details it came from
#[derive(Debug, Clone)]
pub struct CachedProduct {
    pub entry: ProductCatalogEntry,
    pub product: Arc<PlatformProduct>,
}

#[derive(Default)]
struct CatalogCache {
    entries: Vec<ProductCatalogEntry>,
    products: HashMap<String, Arc<PlatformProduct>>,
}

pub struct CatalogService<P: CommercePlatform> {
    platform: Arc<P>,
    connection: Arc<ConnectionService<P>>,
    bus: Arc<StateBus>,
    in_flight: Mutex<()>,
    cache: AsyncRwLock<CatalogCache>,
    fetched: AtomicBool,
    configured_consumables: Vec<String>,
    consumable_ids: RwLock<HashSet<String>>,
    catalog_tx: watch::Sender<Arc<Vec<ProductCatalogEntry>>>,
}

impl<P: CommercePlatform> CatalogService<P> {
    pub fn new(
        platform: Arc<P>,
        connection: Arc<ConnectionService<P>>,
        bus: Arc<StateBus>,
        configured_consumables: Vec<String>,
    ) -> Self {
        let (catalog_tx, _) = watch::channel(Arc::new(Vec::new()));
        let consumable_ids = configured_consumables.iter().cloned().collect();
        Self {
            platform,
            connection,
            bus,
            in_flight: Mutex::new(()),
            cache: AsyncRwLock::new(CatalogCache::default()),
            fetched: AtomicBool::new(false),
            configured_consumables,
            consumable_ids: RwLock::new(consumable_ids),
            catalog_tx,
        }
    }

    /// Fetches all three product families concurrently and replaces the cache.
    ///
    /// Returns `Loading` without touching the platform if a fetch is already
    /// running. On any sub-query failure the previous cache stays in place.
    #[instrument(skip(self))]
    pub async fn query_catalog(
        &self,
        non_consumable_ids: &[String],
        consumable_ids: &[String],
        subscription_ids: &[String],
    ) -> QueryResult<Vec<ProductCatalogEntry>> {
        if let Err(e) = self.connection.ensure_ready() {
            return QueryResult::Error(e);
        }

        if non_consumable_ids.is_empty() && consumable_ids.is_empty() && subscription_ids.is_empty()
        {
            return QueryResult::Error(ValidationError::EmptyQueryList.into());
        }

        let Ok(_in_flight) = self.in_flight.try_lock() else {
            debug!("Catalog fetch already in flight");
            return QueryResult::Loading;
        };
        // Held until the swap so readers wait for the new catalog
        let mut cache = self.cache.write().await;

        self.bus.status(BillingStatus::FetchingProducts);

        let (non_consumables, consumables, subscriptions) = tokio::join!(
            self.fetch(PlatformProductKind::InApp, non_consumable_ids),
            self.fetch(PlatformProductKind::InApp, consumable_ids),
            self.fetch(PlatformProductKind::Subs, subscription_ids),
        );

        let batches = match (non_consumables, consumables, subscriptions) {
            (Ok(n), Ok(c), Ok(s)) => [
                (n, ProductType::NonConsumable),
                (c, ProductType::Consumable),
                (s, ProductType::Subscription),
            ],
            (Err(response), _, _) | (_, Err(response), _) | (_, _, Err(response)) => {
                warn!("Product details query failed: {}", response);
                self.bus.status(BillingStatus::ProductsFetchFailed);
                return QueryResult::Error(BillingError::platform(
                    "query_product_details",
                    response,
                ));
            }
        };

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        let mut products = HashMap::new();

        for (batch, product_type) in batches {
            for product in batch {
                let product = Arc::new(product);
                for entry in ProductCatalogEntry::from_platform(&product, product_type) {
                    if seen.insert((entry.product_id.clone(), entry.plan_id.clone())) {
                        entries.push(entry);
                    }
                }
                products
                    .entry(product.product_id.clone())
                    .or_insert(product);
            }
        }

        // Swap in one step while holding the lock
        *cache = CatalogCache {
            entries: entries.clone(),
            products,
        };
        self.fetched.store(true, Ordering::SeqCst);
        self.remember_consumables(consumable_ids);
        self.catalog_tx.send_replace(Arc::new(entries.clone()));

        info!("Catalog fetched: {} entries", entries.len());
        self.bus.status(BillingStatus::ProductsFetched);
        QueryResult::Success(entries)
    }

    /// Entries matching `product_id` and, when given, `plan_id`.
    ///
    /// Waits for any in-flight fetch so a half-replaced cache is never read.
    #[instrument(skip(self))]
    pub async fn get_cached_entry(
        &self,
        product_id: &str,
        plan_id: Option<&str>,
    ) -> QueryResult<Vec<ProductCatalogEntry>> {
        if !self.fetched.load(Ordering::SeqCst) {
            return QueryResult::Error(NotFoundError::CatalogNotYetFetched.into());
        }

        let cache = self.cache.read().await;
        let matches: Vec<ProductCatalogEntry> = cache
            .entries
            .iter()
            .filter(|entry| matches_entry(entry, product_id, plan_id))
            .cloned()
            .collect();

        if matches.is_empty() {
            return QueryResult::Error(
                NotFoundError::ProductNotFound {
                    product_id: product_id.to_string(),
                    plan_id: plan_id.map(str::to_string),
                }
                .into(),
            );
        }

        QueryResult::Success(matches)
    }

    /// First cached entry for the product/plan along with its platform details
    pub(crate) async fn lookup(&self, product_id: &str, plan_id: Option<&str>) -> Option<CachedProduct> {
        let cache = self.cache.read().await;
        let entry = cache
            .entries
            .iter()
            .find(|entry| matches_entry(entry, product_id, plan_id))?;
        let product = cache.products.get(product_id)?;

        Some(CachedProduct {
            entry: entry.clone(),
            product: Arc::clone(product),
        })
    }

    pub fn consumable_ids(&self) -> HashSet<String> {
        self.consumable_ids
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<Vec<ProductCatalogEntry>>> {
        self.catalog_tx.subscribe()
    }

    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        *cache = CatalogCache::default();
        self.fetched.store(false, Ordering::SeqCst);
        self.remember_consumables(&[]);
        self.catalog_tx.send_replace(Arc::new(Vec::new()));
    }

    async fn fetch(
        &self,
        kind: PlatformProductKind,
        product_ids: &[String],
    ) -> PlatformResult<Vec<PlatformProduct>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!("Querying {} {} products", product_ids.len(), kind.as_str());
        self.platform.query_product_details(kind, product_ids).await
    }

    fn remember_consumables(&self, consumable_ids: &[String]) {
        let mut ids = self
            .consumable_ids
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *ids = self
            .configured_consumables
            .iter()
            .chain(consumable_ids)
            .cloned()
            .collect();
    }
}

fn matches_entry(entry: &ProductCatalogEntry, product_id: &str, plan_id: Option<&str>) -> bool {
    entry.product_id == product_id && plan_id.map_or(true, |plan| entry.plan_id == plan)
}
