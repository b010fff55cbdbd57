use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::{OfferSelection, PurchaseConfig},
    error::{BillingError, NotFoundError, Result, ValidationError},
    models::{
        BillingStatus, ProductType, PurchaseOutcome, QueryResult, ReconciliationReport,
        SettlementReport,
    },
    platform::{
        BillingResponse, CommercePlatform, PlatformProduct, PlatformProductKind, PlatformPurchase,
        PurchaseFlowParams, SubscriptionUpdate,
    },
    services::{
        CatalogService, ConnectionService, HistoryService, ReconciliationService, StateBus,
    },
};

pub struct PurchaseService<P: CommercePlatform> {
    platform: Arc<P>,
    connection: Arc<ConnectionService<P>>,
    catalog: Arc<CatalogService<P>>,
    history: Arc<HistoryService<P>>,
    reconciliation: Arc<ReconciliationService<P>>,
    bus: Arc<StateBus>,
    config: PurchaseConfig,
    settlements_tx: broadcast::Sender<SettlementReport>,
}

impl<P: CommercePlatform> PurchaseService<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<P>,
        connection: Arc<ConnectionService<P>>,
        catalog: Arc<CatalogService<P>>,
        history: Arc<HistoryService<P>>,
        reconciliation: Arc<ReconciliationService<P>>,
        bus: Arc<StateBus>,
        config: &PurchaseConfig,
        capacity: usize,
    ) -> Self {
        let (settlements_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            platform,
            connection,
            catalog,
            history,
            reconciliation,
            bus,
            config: config.clone(),
            settlements_tx,
        }
    }

    /// Launches the purchase UI for one product (and plan, for subscriptions).
    ///
    /// Success only means the UI was shown. Settlement is delivered later
    /// through [`PurchaseService::on_purchases_updated`].
    #[instrument(skip(self, context), fields(flow_id = %Uuid::new_v4()))]
    pub async fn purchase(
        &self,
        context: Option<&P::UiContext>,
        product_id: &str,
        plan_id: Option<&str>,
    ) -> QueryResult<()> {
        match self.prepare(context, product_id, plan_id).await {
            Ok((context, params)) => self.launch(context, params).await,
            Err(e) => {
                debug!("Purchase rejected: {}", e);
                QueryResult::Error(e)
            }
        }
    }

    /// Switches an owned subscription to another product/plan, replacing the
    /// old purchase with the configured replacement mode.
    #[instrument(skip(self, context), fields(flow_id = %Uuid::new_v4()))]
    pub async fn update_subscription(
        &self,
        context: Option<&P::UiContext>,
        old_product_id: &str,
        old_plan_id: &str,
        product_id: &str,
        plan_id: &str,
    ) -> QueryResult<()> {
        let (context, mut params) = match self.prepare(context, product_id, Some(plan_id)).await {
            Ok(prepared) => prepared,
            Err(e) => return QueryResult::Error(e),
        };

        let Some(old) = self.history.cached_purchase(old_product_id, old_plan_id).await else {
            return QueryResult::Error(
                NotFoundError::PlanNotFound {
                    product_id: old_product_id.to_string(),
                    plan_id: old_plan_id.to_string(),
                }
                .into(),
            );
        };

        info!(
            "Replacing subscription: {}/{} -> {}/{}",
            old_product_id, old_plan_id, product_id, plan_id
        );
        params.subscription_update = Some(SubscriptionUpdate {
            old_purchase_token: old.purchase_token,
            replacement_mode: self.config.replacement_mode,
        });

        self.launch(context, params).await
    }

    /// Handles the platform's settlement callback for a launched flow.
    ///
    /// Success and AlreadyOwned run reconciliation and report success;
    /// every other outcome is reported as a failure and never retried.
    #[instrument(skip(self, response, purchases), fields(code = ?response.code, count = purchases.len()))]
    pub async fn on_purchases_updated(
        &self,
        response: BillingResponse,
        purchases: Vec<PlatformPurchase>,
    ) -> SettlementReport {
        let outcome = PurchaseOutcome::from_response(&response);

        let report = match outcome {
            PurchaseOutcome::Success if purchases.is_empty() => {
                warn!("Purchase reported success without any purchases");
                SettlementReport::failed(outcome, "No purchases found")
            }
            PurchaseOutcome::Success | PurchaseOutcome::AlreadyOwned => {
                let purchases = if purchases.is_empty() {
                    self.owned_from_platform().await
                } else {
                    purchases
                };
                let reconciliation = self.settle(&purchases).await;
                SettlementReport {
                    success: true,
                    outcome,
                    message: outcome.message().to_string(),
                    purchases,
                    reconciliation,
                }
            }
            PurchaseOutcome::UserCancelled => {
                info!("Purchase cancelled by user");
                SettlementReport::failed(outcome, outcome.message())
            }
            _ => {
                warn!("Purchase failed: {}", response);
                SettlementReport::failed(outcome, outcome.message())
            }
        };

        self.bus.status(if report.success {
            BillingStatus::PurchaseSucceeded
        } else {
            BillingStatus::PurchaseFailed
        });
        let _ = self.settlements_tx.send(report.clone());
        report
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettlementReport> {
        self.settlements_tx.subscribe()
    }

    async fn prepare<'c>(
        &self,
        context: Option<&'c P::UiContext>,
        product_id: &str,
        plan_id: Option<&str>,
    ) -> Result<(&'c P::UiContext, PurchaseFlowParams)> {
        let context = context.ok_or(ValidationError::MissingContext)?;

        if product_id.trim().is_empty() {
            return Err(ValidationError::EmptyProductId.into());
        }

        self.connection.ensure_ready()?;

        // Tag-based selection treats the plan id as an offer tag, not a base plan
        let lookup_plan = match self.config.offer_selection {
            OfferSelection::BasePlan => plan_id,
            OfferSelection::LowestPricedTag => None,
        };
        let cached = self
            .catalog
            .lookup(product_id, lookup_plan)
            .await
            .ok_or_else(|| NotFoundError::ProductNotFound {
                product_id: product_id.to_string(),
                plan_id: plan_id.map(str::to_string),
            })?;

        let offer_token = match cached.entry.product_type {
            ProductType::Subscription => {
                let plan_not_found = || NotFoundError::PlanNotFound {
                    product_id: product_id.to_string(),
                    plan_id: plan_id.unwrap_or_default().to_string(),
                };
                let plan = plan_id.filter(|p| !p.is_empty()).ok_or_else(plan_not_found)?;
                let token = select_offer_token(&cached.product, plan, self.config.offer_selection)
                    .ok_or_else(plan_not_found)?;
                Some(token)
            }
            _ => cached
                .product
                .one_time_offer
                .as_ref()
                .and_then(|offer| offer.offer_token.clone()),
        };

        Ok((
            context,
            PurchaseFlowParams {
                product_id: product_id.to_string(),
                kind: cached.product.kind,
                offer_token,
                subscription_update: None,
            },
        ))
    }

    async fn launch(&self, context: &P::UiContext, params: PurchaseFlowParams) -> QueryResult<()> {
        info!(
            "Launching billing flow: product_id={}, offer_token={:?}",
            params.product_id, params.offer_token
        );
        self.bus.status(BillingStatus::LaunchingBillingFlow);

        let response = self.platform.launch_purchase_flow(context, params).await;
        if response.is_ok() {
            self.bus.status(BillingStatus::BillingFlowLaunched);
            return QueryResult::Success(());
        }

        let outcome = PurchaseOutcome::from_response(&response);
        warn!("Billing flow launch failed: {}", response);
        self.bus.status(BillingStatus::BillingFlowFailed);
        QueryResult::Error(BillingError::Purchase {
            outcome,
            message: response.to_string(),
        })
    }

    async fn settle(&self, purchases: &[PlatformPurchase]) -> ReconciliationReport {
        let consumable_ids = self.catalog.consumable_ids();
        let report = self
            .reconciliation
            .reconcile(purchases, &consumable_ids)
            .await;
        if report.has_errors() {
            // Left for the next owned-purchases fetch to retry
            warn!(
                "Settlement reconciliation incomplete: {} errors",
                report.errors().count()
            );
        }
        self.history.apply_report(&report).await;
        report
    }

    /// AlreadyOwned callbacks may carry no purchases; ask the platform directly
    async fn owned_from_platform(&self) -> Vec<PlatformPurchase> {
        let (in_app, subs) = tokio::join!(
            self.platform.query_purchases(PlatformProductKind::InApp),
            self.platform.query_purchases(PlatformProductKind::Subs),
        );

        [in_app, subs]
            .into_iter()
            .filter_map(|result| match result {
                Ok(purchases) => Some(purchases),
                Err(response) => {
                    warn!("Owned purchases lookup failed: {}", response);
                    None
                }
            })
            .flatten()
            .collect()
    }
}

/// Picks the offer token to buy for a subscription plan.
pub fn select_offer_token(
    product: &PlatformProduct,
    plan_id: &str,
    strategy: OfferSelection,
) -> Option<String> {
    let offers = &product.subscription_offers;
    let selected = match strategy {
        OfferSelection::BasePlan => offers.iter().find(|offer| offer.base_plan_id == plan_id),
        OfferSelection::LowestPricedTag => offers
            .iter()
            .filter(|offer| offer.offer_tags.iter().any(|tag| tag == plan_id))
            .min_by_key(|offer| offer.lowest_price_micros())
            .or_else(|| {
                offers
                    .iter()
                    .filter(|offer| offer.base_plan_id == plan_id)
                    .min_by_key(|offer| offer.lowest_price_micros())
            }),
    };
    selected.map(|offer| offer.offer_token.clone())
}
