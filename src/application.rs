//! Application layer: the pipeline run built from domain rules and
//! infrastructure services.

pub mod orchestrator;

pub use orchestrator::{PipelineOrchestrator, RunOutcome, RunSummary, RunningPipeline};
