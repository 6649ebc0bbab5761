//! Progress events emitted by a pipeline run.
//!
//! Internally events are a tagged enum; the legacy `{step, message, status}`
//! wire frame (one JSON object per line) is produced only at the boundary via
//! [`ProgressEvent::to_frame`]. Consumers parse per-stage status out of the
//! message text, so the `▶ STARTING:` / `✓ COMPLETED:` / `✗ FAILED:` markers
//! and the `Step N: <name>` labels must stay byte-exact.

use serde::{Deserialize, Serialize};

/// Marker prefixes for stage-boundary messages. Load-bearing for consumers;
/// do not reword.
pub const MARK_STARTING: &str = "▶ STARTING:";
pub const MARK_COMPLETED: &str = "✓ COMPLETED:";
pub const MARK_FAILED: &str = "✗ FAILED:";

/// The four sequential stages of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Scraping,
    Cleaning,
    ColorExtraction,
    Importing,
}

impl PipelineStage {
    pub const ALL: [Self; 4] = [
        Self::Scraping,
        Self::Cleaning,
        Self::ColorExtraction,
        Self::Importing,
    ];

    /// 1-based step number used in wire messages.
    pub fn number(&self) -> u8 {
        match self {
            Self::Scraping => 1,
            Self::Cleaning => 2,
            Self::ColorExtraction => 3,
            Self::Importing => 4,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::Scraping => "Web Scraping",
            Self::Cleaning => "Price Cleaning",
            Self::ColorExtraction => "Color Extraction",
            Self::Importing => "Database Import",
        }
    }

    /// The `Step N: <name>` label consumers match on.
    pub fn step_label(&self) -> String {
        format!("Step {}: {}", self.number(), self.title())
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.title())
    }
}

/// Status discriminant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Info,
    Success,
    Error,
    Progress,
}

/// One event from a pipeline run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ProgressEvent {
    /// A stage is about to run.
    StageStarted { stage: PipelineStage },
    /// A stage finished normally.
    StageCompleted { stage: PipelineStage },
    /// A stage failed; the run transitions to Failed after this.
    StageFailed { stage: PipelineStage, message: String },
    /// Intermediate progress inside a stage (per category, per page, counts).
    StageProgress { stage: PipelineStage, message: String },
    /// One category failed during scraping; siblings continue.
    CategoryFailed { category: String, message: String },
    /// Run-level notice outside any stage.
    Note { message: String },
    /// Terminal success.
    RunCompleted { total_products: i64 },
    /// Terminal failure, naming the stage that sank the run.
    RunFailed { stage: PipelineStage },
}

/// Legacy wire shape, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub step: String,
    pub message: String,
    pub status: EventStatus,
}

impl ProgressEvent {
    /// Serialize to the boundary frame. Marker strings are byte-exact here
    /// and nowhere else.
    pub fn to_frame(&self) -> ProgressFrame {
        match self {
            Self::StageStarted { stage } => ProgressFrame {
                step: stage.step_label(),
                message: format!("{MARK_STARTING} {}", stage.step_label()),
                status: EventStatus::Info,
            },
            Self::StageCompleted { stage } => ProgressFrame {
                step: stage.step_label(),
                message: format!("{MARK_COMPLETED} {}", stage.step_label()),
                status: EventStatus::Success,
            },
            Self::StageFailed { stage, message } => ProgressFrame {
                step: stage.step_label(),
                message: format!("{MARK_FAILED} {} - {message}", stage.step_label()),
                status: EventStatus::Error,
            },
            Self::StageProgress { stage, message } => ProgressFrame {
                step: stage.step_label(),
                message: message.clone(),
                status: EventStatus::Progress,
            },
            Self::CategoryFailed { category, message } => ProgressFrame {
                step: PipelineStage::Scraping.step_label(),
                message: format!("Category failed: {category}: {message}"),
                status: EventStatus::Error,
            },
            Self::Note { message } => ProgressFrame {
                step: "Pipeline".to_string(),
                message: message.clone(),
                status: EventStatus::Info,
            },
            Self::RunCompleted { .. } => ProgressFrame {
                step: "complete".to_string(),
                message: "✓ Pipeline completed successfully!".to_string(),
                status: EventStatus::Success,
            },
            Self::RunFailed { stage } => ProgressFrame {
                step: "error".to_string(),
                message: format!("Pipeline failed at: {}", stage.step_label()),
                status: EventStatus::Error,
            },
        }
    }
}
