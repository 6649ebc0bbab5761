//! Domain module - core business types and pure logic.
//!
//! Entities, the progress-event model, normalization policies, and the error
//! taxonomy. Nothing in here touches a browser, the network, or the database.

pub mod entities;
pub mod errors;
pub mod events;
pub mod normalizer;

// Re-export commonly used items
pub use entities::{
    CategoryScope, ColorRecord, Gender, ImageRecord, NameRecord, PriceRecord, Product,
    ProductRecord, ScrapeSession, Site,
};
pub use errors::{ExtractError, PipelineError};
pub use events::{EventStatus, PipelineStage, ProgressEvent, ProgressFrame};
pub use normalizer::{BaseColor, PriceCleaner, PricePolicy, PrimaryColorRule};
