//! StyleTrack - fashion retail price and color trend tracker.
//!
//! Scrapes product listings from two Sri Lankan fashion retailers with a real
//! browser, normalizes prices and color labels, and appends every observation
//! to a local SQLite store so price and color history accumulate run by run.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{PipelineOrchestrator, RunOutcome, RunSummary, RunningPipeline};
pub use domain::{PipelineError, ProgressEvent, ProgressFrame};
pub use infrastructure::{AnalyticsReader, AppConfig, DatabaseConnection, ProductRepository};
