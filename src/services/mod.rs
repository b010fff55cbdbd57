// Service modules
pub mod catalog_service;
pub mod connection_service;
pub mod history_service;
pub mod purchase_service;
pub mod reconciliation_service;
pub mod state_bus;

pub use catalog_service::{CachedProduct, CatalogService};
pub use connection_service::ConnectionService;
pub use history_service::HistoryService;
pub use purchase_service::PurchaseService;
pub use reconciliation_service::ReconciliationService;
pub use state_bus::StateBus;
