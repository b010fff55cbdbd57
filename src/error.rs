use crate::{models::purchase::PurchaseOutcome, platform::BillingResponse};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Billing service is not ready, connect first")]
    NotReady,

    #[error("A connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("Billing service disconnected")]
    Disconnected,

    #[error("Billing setup failed: {0}")]
    SetupFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("UI context is missing, cannot launch purchase flow")]
    MissingContext,

    #[error("Product id must not be empty")]
    EmptyProductId,

    #[error("At least one product id list must be non-empty")]
    EmptyQueryList,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFoundError {
    #[error("Product not found: {product_id} (plan: {plan_id:?})")]
    ProductNotFound {
        product_id: String,
        plan_id: Option<String>,
    },

    #[error("Plan not found: {product_id}/{plan_id}")]
    PlanNotFound { product_id: String, plan_id: String },

    #[error("Product catalog has not been fetched yet, query the catalog first")]
    CatalogNotYetFetched,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("Failed to acknowledge purchase {purchase_token}: {response}")]
    AcknowledgeFailed {
        purchase_token: String,
        response: BillingResponse,
    },

    #[error("Failed to consume purchase {purchase_token}: {response}")]
    ConsumeFailed {
        purchase_token: String,
        response: BillingResponse,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BillingError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Reconciliation error: {0}")]
    Reconciliation(#[from] ReconciliationError),

    #[error("Platform {operation} failed: {response}")]
    Platform {
        operation: &'static str,
        response: BillingResponse,
    },

    #[error("Purchase failed ({outcome:?}): {message}")]
    Purchase {
        outcome: PurchaseOutcome,
        message: String,
    },
}

impl BillingError {
    pub fn platform(operation: &'static str, response: BillingResponse) -> Self {
        BillingError::Platform {
            operation,
            response,
        }
    }

    /// Stable machine-readable code for callers that surface errors to users
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Connection(e) => match e {
                ConnectionError::NotReady => "CONNECTION_INVALID",
                ConnectionError::AlreadyConnecting => "CONNECTING_IN_PROGRESS",
                ConnectionError::Disconnected => "CONNECTION_DISCONNECTED",
                ConnectionError::SetupFailed(_) => "CONNECT_FAILED",
            },
            BillingError::Validation(e) => match e {
                ValidationError::MissingContext => "MISSING_CONTEXT",
                ValidationError::EmptyProductId => "EMPTY_PRODUCT_ID",
                ValidationError::EmptyQueryList => "EMPTY_QUERY_LIST",
            },
            BillingError::NotFound(e) => match e {
                NotFoundError::ProductNotFound { .. } => "PRODUCT_NOT_FOUND",
                NotFoundError::PlanNotFound { .. } => "PLAN_NOT_FOUND",
                NotFoundError::CatalogNotYetFetched => "CATALOG_NOT_YET_FETCHED",
            },
            BillingError::Reconciliation(e) => match e {
                ReconciliationError::AcknowledgeFailed { .. } => "ACKNOWLEDGE_FAILED",
                ReconciliationError::ConsumeFailed { .. } => "CONSUME_FAILED",
            },
            BillingError::Platform { .. } => "PLATFORM_ERROR",
            BillingError::Purchase { .. } => "PURCHASE_FAILED",
        }
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, BillingError>;
