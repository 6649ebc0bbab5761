//! Error types for extraction and pipeline orchestration.
//!
//! Extraction errors carry enough context to name the failing category in
//! progress events; the classification helpers decide how far a failure
//! propagates (page, category, or whole run).

use thiserror::Error;

/// Errors raised while driving a browser session against a category listing.
#[derive(Error, Debug, Clone)]
pub enum ExtractError {
    #[error("Browser launch failed: {message}")]
    BrowserLaunch { message: String },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {waited_ms}ms waiting for {url}")]
    Timeout { url: String, waited_ms: u64 },

    #[error("Site {site} unreachable: {reason}")]
    SiteUnreachable { site: String, reason: String },

    #[error("Invalid CSS selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid category URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ExtractError {
    pub fn browser_launch(message: impl Into<String>) -> Self {
        Self::BrowserLaunch {
            message: message.into(),
        }
    }

    pub fn navigation(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(url: impl Into<String>, waited_ms: u64) -> Self {
        Self::Timeout {
            url: url.into(),
            waited_ms,
        }
    }

    pub fn site_unreachable(site: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SiteUnreachable {
            site: site.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_selector(selector: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// True when the failure poisons the whole run rather than one category.
    /// Only a browser that never came up qualifies; everything else is
    /// contained at the category boundary.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::BrowserLaunch { .. })
    }
}

/// Errors surfaced by the pipeline orchestrator to its caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A second run was requested while one is still active. The request is
    /// rejected, never queued.
    #[error("A pipeline run is already active")]
    AlreadyRunning,

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PipelineError {
    pub fn stage_failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_browser_launch_is_run_fatal() {
        assert!(ExtractError::browser_launch("no chrome").is_run_fatal());
        assert!(!ExtractError::navigation("https://x", "dns").is_run_fatal());
        assert!(!ExtractError::timeout("https://x", 30_000).is_run_fatal());
        assert!(!ExtractError::site_unreachable("Fashion Bug", "503").is_run_fatal());
    }

    #[test]
    fn display_names_the_failing_url() {
        let err = ExtractError::navigation("https://fashionbug.lk/collections/skirt", "net::ERR");
        assert!(err.to_string().contains("fashionbug.lk/collections/skirt"));
    }
}
