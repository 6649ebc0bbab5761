//! Reachability preflight for the tracked sites.
//!
//! A cheap HTTP GET against the site root before the browser ever launches.
//! Sites that fail the probe have their categories skipped for the run
//! instead of burning browser time on dead navigation attempts.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use crate::domain::entities::Site;
use crate::infrastructure::browser::CHROME_USER_AGENT;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteStatus {
    Reachable,
    Unreachable { reason: String },
}

#[derive(Clone)]
pub struct SiteChecker {
    client: Client,
}

impl SiteChecker {
    pub fn new(timeout_secs: u64) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(CHROME_USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub async fn check(&self, site: Site, base_url: &str) -> SiteStatus {
        match self.client.get(base_url).send().await {
            Ok(response) if response.status().is_success() || response.status().is_redirection() => {
                debug!(site = %site, status = %response.status(), "site preflight ok");
                SiteStatus::Reachable
            }
            Ok(response) => {
                warn!(site = %site, status = %response.status(), "site preflight rejected");
                SiteStatus::Unreachable {
                    reason: format!("HTTP {}", response.status()),
                }
            }
            Err(e) => {
                warn!(site = %site, error = %e, "site preflight failed");
                SiteStatus::Unreachable {
                    reason: e.to_string(),
                }
            }
        }
    }
}
