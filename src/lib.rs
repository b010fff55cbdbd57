// Library exports for embedding and testing
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod platform;
pub mod services;

// Re-export commonly used types
pub use config::Config;
pub use error::{BillingError, Result};
pub use manager::BillingManager;
pub use models::QueryResult;
pub use platform::CommercePlatform;
