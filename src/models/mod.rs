// Data model
pub mod catalog;
pub mod common;
pub mod purchase;
pub mod state;

pub use catalog::{PricingPhase, ProductCatalogEntry, ProductType, RecurringMode};
pub use common::QueryResult;
pub use purchase::{
    OwnedPurchase, PurchaseOutcome, ReconciliationReport, SettlementReport, SkipReason,
    TokenOutcome,
};
pub use state::{BillingEvent, BillingStatus, ConnectionState};
