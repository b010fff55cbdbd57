//! Commerce platform collaborator.
//!
//! The engine never performs network I/O itself. Everything goes through a
//! [`CommercePlatform`] implementation, and push-style callbacks from the
//! platform arrive through a [`PlatformListener`].

pub mod sandbox;
pub mod types;

pub use sandbox::{SandboxActivity, SandboxPlatform};
pub use types::{
    BillingResponse, OneTimeOffer, PlatformPricingPhase, PlatformProduct, PlatformProductKind,
    PlatformPurchase, PurchaseFlowParams, PurchaseState, RecurrenceMode, ReplacementMode,
    ResponseCode, SubscriptionOffer, SubscriptionUpdate,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result of a platform query: data on OK, the failing response otherwise
pub type PlatformResult<T> = std::result::Result<T, BillingResponse>;

/// Callbacks the platform pushes outside of any request/response pair
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    ServiceDisconnected,
    PurchasesUpdated {
        response: BillingResponse,
        purchases: Vec<PlatformPurchase>,
    },
}

/// Handle given to the platform on connect; delivers [`PlatformEvent`]s
/// to the engine in the order the platform emits them.
#[derive(Debug, Clone)]
pub struct PlatformListener {
    tx: mpsc::UnboundedSender<PlatformEvent>,
}

impl PlatformListener {
    pub(crate) fn new(tx: mpsc::UnboundedSender<PlatformEvent>) -> Self {
        Self { tx }
    }

    pub fn on_service_disconnected(&self) {
        if self.tx.send(PlatformEvent::ServiceDisconnected).is_err() {
            tracing::debug!("Dropped service-disconnected event, engine is torn down");
        }
    }

    pub fn on_purchases_updated(&self, response: BillingResponse, purchases: Vec<PlatformPurchase>) {
        let event = PlatformEvent::PurchasesUpdated {
            response,
            purchases,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!("Dropped purchases-updated event, engine is torn down");
        }
    }
}

#[async_trait]
pub trait CommercePlatform: Send + Sync + 'static {
    /// Opaque UI handle the purchase sheet is attached to
    type UiContext: Send + Sync;

    /// Whether the underlying client currently holds a live connection
    fn is_ready(&self) -> bool;

    /// Opens the connection. Resolves once with the setup result; later
    /// service loss is reported through the listener.
    async fn start_connection(&self, listener: PlatformListener) -> BillingResponse;

    async fn end_connection(&self);

    /// Owned purchases from the platform's local cache
    async fn query_purchases(
        &self,
        kind: PlatformProductKind,
    ) -> PlatformResult<Vec<PlatformPurchase>>;

    async fn query_product_details(
        &self,
        kind: PlatformProductKind,
        product_ids: &[String],
    ) -> PlatformResult<Vec<PlatformProduct>>;

    /// Shows the purchase UI. The response only says whether the UI was shown;
    /// settlement arrives later via [`PlatformListener::on_purchases_updated`].
    async fn launch_purchase_flow(
        &self,
        context: &Self::UiContext,
        params: PurchaseFlowParams,
    ) -> BillingResponse;

    async fn acknowledge(&self, purchase_token: &str) -> BillingResponse;

    async fn consume(&self, purchase_token: &str) -> BillingResponse;
}
