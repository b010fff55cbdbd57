use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::ReconciliationError,
    models::{BillingStatus, ReconciliationReport, SkipReason, TokenOutcome},
    platform::{CommercePlatform, PlatformPurchase, PurchaseState, ResponseCode},
    services::StateBus,
};

/// Acknowledges and consumes settled purchases.
///
/// Per purchase the steps are strictly sequential: acknowledge, then consume.
/// Distinct purchases are settled concurrently. A token is worked on by at
/// most one caller at a time.
pub struct ReconciliationService<P: CommercePlatform> {
    platform: Arc<P>,
    bus: Arc<StateBus>,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a claimed token when dropped
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    token: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
    }
}

impl<P: CommercePlatform> ReconciliationService<P> {
    pub fn new(platform: Arc<P>, bus: Arc<StateBus>) -> Self {
        Self {
            platform,
            bus,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Settles every purchased item in `purchases`.
    ///
    /// Failures are logged and reported per token; they never abort the batch.
    #[instrument(skip(self, purchases, consumable_ids), fields(count = purchases.len()))]
    pub async fn reconcile(
        &self,
        purchases: &[PlatformPurchase],
        consumable_ids: &HashSet<String>,
    ) -> ReconciliationReport {
        let mut seen = HashSet::new();
        let mut outcomes = Vec::new();
        let mut claimed = Vec::new();

        for purchase in purchases {
            if !seen.insert(purchase.purchase_token.as_str()) {
                continue;
            }

            if purchase.purchase_state != PurchaseState::Purchased {
                debug!(
                    "Skipping purchase not yet paid: token={}",
                    purchase.purchase_token
                );
                outcomes.push(TokenOutcome::skipped(
                    &purchase.purchase_token,
                    SkipReason::Pending,
                ));
                continue;
            }

            match self.claim(&purchase.purchase_token) {
                Some(guard) => claimed.push((purchase, guard)),
                None => {
                    debug!(
                        "Purchase already being reconciled: token={}",
                        purchase.purchase_token
                    );
                    outcomes.push(TokenOutcome::skipped(
                        &purchase.purchase_token,
                        SkipReason::InFlight,
                    ));
                }
            }
        }

        let settled = join_all(claimed.into_iter().map(|(purchase, guard)| async move {
            let outcome = self.settle(purchase, consumable_ids).await;
            drop(guard);
            outcome
        }))
        .await;

        outcomes.extend(settled);
        ReconciliationReport { outcomes }
    }

    async fn settle(
        &self,
        purchase: &PlatformPurchase,
        consumable_ids: &HashSet<String>,
    ) -> TokenOutcome {
        let token = purchase.purchase_token.as_str();
        let mut outcome = TokenOutcome::new(token);

        if !purchase.is_acknowledged {
            self.bus.status(BillingStatus::Acknowledging);
            let response = self.platform.acknowledge(token).await;
            if !response.is_ok() {
                warn!("Acknowledge failed: token={}, response={}", token, response);
                self.bus.status(BillingStatus::AcknowledgeFailed);
                outcome.error = Some(ReconciliationError::AcknowledgeFailed {
                    purchase_token: token.to_string(),
                    response,
                });
                return outcome;
            }
            info!("Purchase acknowledged: token={}", token);
            self.bus.status(BillingStatus::AcknowledgeSucceeded);
        }
        outcome.acknowledged = true;

        let consumable = purchase
            .product_ids
            .iter()
            .any(|id| consumable_ids.contains(id));
        if !consumable {
            return outcome;
        }

        self.bus.status(BillingStatus::Consuming);
        let response = self.platform.consume(token).await;
        if response.is_ok() {
            info!("Purchase consumed: token={}", token);
            self.bus.status(BillingStatus::ConsumeSucceeded);
            outcome.consumed = true;
        } else if response.code == ResponseCode::ItemNotOwned {
            debug!("Purchase already consumed: token={}", token);
            outcome.consumed = true;
        } else {
            warn!("Consume failed: token={}, response={}", token, response);
            self.bus.status(BillingStatus::ConsumeFailed);
            outcome.error = Some(ReconciliationError::ConsumeFailed {
                purchase_token: token.to_string(),
                response,
            });
        }

        outcome
    }

    fn claim(&self, token: &str) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(token.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            token: token.to_string(),
        })
    }
}
