//! In-memory commerce platform.
//!
//! Used by the demo binary and the test suite. Responses can be forced per
//! operation, any operation can be held in flight, and every call is
//! recorded in order so tests can assert on call sequencing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{
    BillingResponse, CommercePlatform, PlatformListener, PlatformProduct, PlatformProductKind,
    PlatformPurchase, PlatformResult, PurchaseFlowParams, ResponseCode,
};

/// Static test product id that the real platform settles without payment
pub const TEST_PURCHASED_PRODUCT_ID: &str = "android.test.purchased";

/// Stand-in for the UI surface a purchase sheet attaches to
#[derive(Debug, Clone, Default)]
pub struct SandboxActivity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxOperation {
    Connect,
    QueryPurchases,
    QueryProducts,
    LaunchFlow,
    Acknowledge,
    Consume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxCall {
    Connect,
    EndConnection,
    QueryPurchases(PlatformProductKind),
    QueryProducts(PlatformProductKind, Vec<String>),
    LaunchFlow(PurchaseFlowParams),
    Acknowledge(String),
    Consume(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SandboxCounters {
    pub connects: usize,
    pub purchase_queries: usize,
    pub product_queries: usize,
    pub launches: usize,
    pub acknowledgements: usize,
    pub consumptions: usize,
}

pub struct SandboxPlatform {
    ready: AtomicBool,
    products: Mutex<Vec<PlatformProduct>>,
    purchases: Mutex<Vec<PlatformPurchase>>,
    consumed: Mutex<HashSet<String>>,
    forced: Mutex<HashMap<SandboxOperation, ResponseCode>>,
    calls: Mutex<Vec<SandboxCall>>,
    counters: watch::Sender<SandboxCounters>,
    paused: watch::Sender<HashSet<SandboxOperation>>,
    listener: Mutex<Option<PlatformListener>>,
    token_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for SandboxPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxPlatform {
    pub fn new() -> Self {
        let (counters, _) = watch::channel(SandboxCounters::default());
        let (paused, _) = watch::channel(HashSet::new());
        Self {
            ready: AtomicBool::new(false),
            products: Mutex::new(Vec::new()),
            purchases: Mutex::new(Vec::new()),
            consumed: Mutex::new(HashSet::new()),
            forced: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            counters,
            paused,
            listener: Mutex::new(None),
            token_seq: AtomicU64::new(1),
        }
    }

    pub fn with_product(self, product: PlatformProduct) -> Self {
        lock(&self.products).push(product);
        self
    }

    pub fn with_purchase(self, purchase: PlatformPurchase) -> Self {
        lock(&self.purchases).push(purchase);
        self
    }

    /// Seeds the platform's static test product as a one-time item
    pub fn with_test_product(self) -> Self {
        self.with_product(PlatformProduct::one_time(
            TEST_PURCHASED_PRODUCT_ID,
            "Sample Title",
            "$0.99",
            990_000,
            "USD",
        ))
    }

    pub fn force(&self, operation: SandboxOperation, code: ResponseCode) {
        lock(&self.forced).insert(operation, code);
    }

    pub fn clear_forced(&self, operation: SandboxOperation) {
        lock(&self.forced).remove(&operation);
    }

    /// Holds every call of `operation` until [`SandboxPlatform::resume`].
    /// Calls are counted and recorded before they block.
    pub fn pause(&self, operation: SandboxOperation) {
        self.paused.send_modify(|paused| {
            paused.insert(operation);
        });
    }

    pub fn resume(&self, operation: SandboxOperation) {
        self.paused.send_modify(|paused| {
            paused.remove(&operation);
        });
    }

    pub fn counters(&self) -> SandboxCounters {
        *self.counters.borrow()
    }

    pub async fn wait_for_counters<F>(&self, predicate: F)
    where
        F: Fn(&SandboxCounters) -> bool,
    {
        let mut rx = self.counters.subscribe();
        // Sender lives as long as self, so this only ends when predicate holds
        let _ = rx.wait_for(|counters| predicate(counters)).await;
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        lock(&self.calls).clone()
    }

    pub fn owned_purchases(&self) -> Vec<PlatformPurchase> {
        lock(&self.purchases).clone()
    }

    /// Simulates the platform dropping the service connection
    pub fn disconnect(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Some(listener) = lock(&self.listener).as_ref() {
            listener.on_service_disconnected();
        }
    }

    /// Records the purchase as owned and pushes a successful settlement
    pub fn settle(&self, purchase: PlatformPurchase) {
        lock(&self.purchases).push(purchase.clone());
        self.emit_purchases_updated(BillingResponse::ok(), vec![purchase]);
    }

    pub fn emit_purchases_updated(&self, response: BillingResponse, purchases: Vec<PlatformPurchase>) {
        match lock(&self.listener).as_ref() {
            Some(listener) => listener.on_purchases_updated(response, purchases),
            None => debug!("Sandbox has no listener, dropping purchases update"),
        }
    }

    /// Listener held since the last successful connect
    pub fn listener(&self) -> Option<PlatformListener> {
        lock(&self.listener).clone()
    }

    async fn gate(&self, operation: SandboxOperation) {
        let mut rx = self.paused.subscribe();
        let _ = rx.wait_for(|paused| !paused.contains(&operation)).await;
    }

    fn record(&self, call: SandboxCall) {
        lock(&self.calls).push(call);
    }

    fn forced_response(&self, operation: SandboxOperation) -> Option<BillingResponse> {
        lock(&self.forced)
            .get(&operation)
            .map(|code| BillingResponse::new(*code, format!("sandbox forced {:?}", operation)))
    }

    fn kind_of(&self, purchase: &PlatformPurchase) -> PlatformProductKind {
        let products = lock(&self.products);
        purchase
            .product_ids
            .iter()
            .find_map(|id| products.iter().find(|p| &p.product_id == id))
            .map(|p| p.kind)
            .unwrap_or(PlatformProductKind::InApp)
    }

    fn next_token(&self) -> String {
        format!("sandbox-token-{}", self.token_seq.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl CommercePlatform for SandboxPlatform {
    type UiContext = SandboxActivity;

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn start_connection(&self, listener: PlatformListener) -> BillingResponse {
        self.record(SandboxCall::Connect);
        self.counters.send_modify(|c| c.connects += 1);
        self.gate(SandboxOperation::Connect).await;

        if let Some(response) = self.forced_response(SandboxOperation::Connect) {
            return response;
        }

        *lock(&self.listener) = Some(listener);
        self.ready.store(true, Ordering::SeqCst);
        BillingResponse::ok()
    }

    async fn end_connection(&self) {
        self.record(SandboxCall::EndConnection);
        self.ready.store(false, Ordering::SeqCst);
        lock(&self.listener).take();
    }

    async fn query_purchases(
        &self,
        kind: PlatformProductKind,
    ) -> PlatformResult<Vec<PlatformPurchase>> {
        self.record(SandboxCall::QueryPurchases(kind));
        self.counters.send_modify(|c| c.purchase_queries += 1);
        self.gate(SandboxOperation::QueryPurchases).await;

        if let Some(response) = self.forced_response(SandboxOperation::QueryPurchases) {
            return Err(response);
        }

        let purchases = self.owned_purchases();
        Ok(purchases
            .into_iter()
            .filter(|purchase| self.kind_of(purchase) == kind)
            .collect())
    }

    async fn query_product_details(
        &self,
        kind: PlatformProductKind,
        product_ids: &[String],
    ) -> PlatformResult<Vec<PlatformProduct>> {
        self.record(SandboxCall::QueryProducts(kind, product_ids.to_vec()));
        self.counters.send_modify(|c| c.product_queries += 1);
        self.gate(SandboxOperation::QueryProducts).await;

        if let Some(response) = self.forced_response(SandboxOperation::QueryProducts) {
            return Err(response);
        }

        Ok(lock(&self.products)
            .iter()
            .filter(|p| p.kind == kind && product_ids.contains(&p.product_id))
            .cloned()
            .collect())
    }

    async fn launch_purchase_flow(
        &self,
        _context: &SandboxActivity,
        params: PurchaseFlowParams,
    ) -> BillingResponse {
        self.record(SandboxCall::LaunchFlow(params.clone()));
        self.counters.send_modify(|c| c.launches += 1);
        self.gate(SandboxOperation::LaunchFlow).await;

        if let Some(response) = self.forced_response(SandboxOperation::LaunchFlow) {
            return response;
        }

        if params.product_id == TEST_PURCHASED_PRODUCT_ID {
            let mut purchase = PlatformPurchase::purchased(self.next_token(), params.product_id);
            purchase.purchase_time_millis = time::OffsetDateTime::now_utc().unix_timestamp() * 1000;
            self.settle(purchase);
        }

        BillingResponse::ok()
    }

    async fn acknowledge(&self, purchase_token: &str) -> BillingResponse {
        self.record(SandboxCall::Acknowledge(purchase_token.to_string()));
        self.counters.send_modify(|c| c.acknowledgements += 1);
        self.gate(SandboxOperation::Acknowledge).await;

        if let Some(response) = self.forced_response(SandboxOperation::Acknowledge) {
            return response;
        }

        let mut purchases = lock(&self.purchases);
        match purchases
            .iter_mut()
            .find(|p| p.purchase_token == purchase_token)
        {
            Some(purchase) => {
                purchase.is_acknowledged = true;
                BillingResponse::ok()
            }
            None => BillingResponse::new(ResponseCode::ItemNotOwned, "unknown purchase token"),
        }
    }

    async fn consume(&self, purchase_token: &str) -> BillingResponse {
        self.record(SandboxCall::Consume(purchase_token.to_string()));
        self.counters.send_modify(|c| c.consumptions += 1);
        self.gate(SandboxOperation::Consume).await;

        if let Some(response) = self.forced_response(SandboxOperation::Consume) {
            return response;
        }

        let mut consumed = lock(&self.consumed);
        if consumed.contains(purchase_token) {
            return BillingResponse::new(ResponseCode::ItemNotOwned, "purchase already consumed");
        }

        let mut purchases = lock(&self.purchases);
        let before = purchases.len();
        purchases.retain(|p| p.purchase_token != purchase_token);
        if purchases.len() == before {
            return BillingResponse::new(ResponseCode::ItemNotOwned, "unknown purchase token");
        }

        consumed.insert(purchase_token.to_string());
        BillingResponse::ok()
    }
}
