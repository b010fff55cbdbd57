use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::catalog::ProductType;
use crate::{
    error::ReconciliationError,
    platform::{BillingResponse, PlatformPurchase, PurchaseState},
};

/// An entitlement the user currently holds, labelled against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedPurchase {
    pub product_id: String,
    pub plan_id: String,
    pub product_title: String,
    pub plan_title: String,
    pub purchase_token: String,
    pub product_type: ProductType,
    pub purchase_state: PurchaseState,
    pub purchase_time_millis: i64,
    pub auto_renewing: bool,
    pub acknowledged: bool,
    pub consumed: bool,
}

impl OwnedPurchase {
    /// Purchase time as a timestamp; `None` if the platform sent an out-of-range value
    pub fn purchased_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(self.purchase_time_millis as i128 * 1_000_000)
            .ok()
    }
}

/// Classification of a purchase-flow settlement response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Success,
    AlreadyOwned,
    UserCancelled,
    RecoverableError,
    NonrecoverableError,
    TerribleFailure,
}

impl PurchaseOutcome {
    pub fn from_response(response: &BillingResponse) -> Self {
        if response.is_ok() {
            Self::Success
        } else if response.is_already_owned() {
            Self::AlreadyOwned
        } else if response.is_user_cancelled() {
            Self::UserCancelled
        } else if response.is_recoverable_error() {
            Self::RecoverableError
        } else if response.is_nonrecoverable_error() {
            Self::NonrecoverableError
        } else {
            Self::TerribleFailure
        }
    }

    /// Success and AlreadyOwned both leave the user holding the item
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::AlreadyOwned)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Success => "Purchase successful",
            Self::AlreadyOwned => "Item already owned",
            Self::UserCancelled => "Purchase cancelled by user",
            Self::RecoverableError => "Temporary billing error, please try again",
            Self::NonrecoverableError => "Billing is unavailable on this device",
            Self::TerribleFailure => "Purchase failed, the item cannot be bought right now",
        }
    }
}

/// Why reconciliation left a purchase untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Payment not completed yet; settled on a later history fetch
    Pending,
    /// Another reconciliation is already working on this token
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOutcome {
    pub purchase_token: String,
    pub acknowledged: bool,
    pub consumed: bool,
    pub skipped: Option<SkipReason>,
    pub error: Option<ReconciliationError>,
}

impl TokenOutcome {
    pub(crate) fn new(purchase_token: impl Into<String>) -> Self {
        Self {
            purchase_token: purchase_token.into(),
            acknowledged: false,
            consumed: false,
            skipped: None,
            error: None,
        }
    }

    pub(crate) fn skipped(purchase_token: impl Into<String>, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::new(purchase_token)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub outcomes: Vec<TokenOutcome>,
}

impl ReconciliationReport {
    pub fn outcome(&self, purchase_token: &str) -> Option<&TokenOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.purchase_token == purchase_token)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ReconciliationError> {
        self.outcomes.iter().filter_map(|o| o.error.as_ref())
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }
}

/// Result of one purchase-flow settlement, published to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub success: bool,
    pub outcome: PurchaseOutcome,
    pub message: String,
    pub purchases: Vec<PlatformPurchase>,
    pub reconciliation: ReconciliationReport,
}

impl SettlementReport {
    pub fn failed(outcome: PurchaseOutcome, message: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome,
            message: message.into(),
            purchases: Vec::new(),
            reconciliation: ReconciliationReport::default(),
        }
    }
}
