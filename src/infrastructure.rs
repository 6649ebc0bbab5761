//! Infrastructure layer: the browser, the database, and everything else
//! that talks to the outside world.
//!
//! The domain layer stays pure; every effectful concern lives here behind
//! a small surface the application layer composes.

pub mod analytics;
pub mod browser;
pub mod config;
pub mod database_connection;
pub mod extractor;
pub mod logging;
pub mod repository;
pub mod site_status;

// Re-export commonly used items
pub use analytics::{AnalyticsReader, ProductFilter};
pub use browser::BrowserSession;
pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use extractor::{CategoryExtractor, PageFetcher};
pub use logging::init_logging;
pub use repository::ProductRepository;
pub use site_status::{SiteChecker, SiteStatus};
