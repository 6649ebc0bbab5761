//! Headless browser lifecycle and listing-page fetches.
//!
//! One Chrome instance serves a whole pipeline run. Each category page is
//! opened in a fresh tab, settled, scrolled to trigger lazy-loaded images,
//! serialized to HTML and closed again. The CDP event handler runs in a
//! tracked task that must be aborted when the session ends.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use futures::StreamExt;
use tokio::task::{self, JoinHandle};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::domain::errors::ExtractError;
use crate::infrastructure::config::{BrowserConfig, PaginationPolicy};
use crate::infrastructure::extractor::PageFetcher;

/// Desktop user agent presented to the storefronts.
pub(crate) const CHROME_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Find a Chrome/Chromium executable.
///
/// Search order: explicit configuration, the CHROMIUM_PATH environment
/// variable, well-known install locations, then `which` on Unix.
pub fn find_browser_executable(configured: Option<&Path>) -> Result<PathBuf, ExtractError> {
    if let Some(path) = configured {
        if path.exists() {
            info!(path = %path.display(), "using configured browser executable");
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "configured browser executable does not exist");
    }

    if let Ok(env_path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            info!(path = %path.display(), "using browser from CHROMIUM_PATH");
            return Ok(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points to a non-existent file");
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(path = %path.display(), "found browser executable");
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for name in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(name).output() {
                if output.status.success() {
                    let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !found.is_empty() {
                        info!(path = %found, "found browser executable via which");
                        return Ok(PathBuf::from(found));
                    }
                }
            }
        }
    }

    Err(ExtractError::browser_launch(
        "no Chrome/Chromium executable found; set CHROMIUM_PATH or browser.chrome_executable",
    ))
}

/// A running Chrome instance plus its CDP event handler task.
pub struct BrowserSession {
    browser: Browser,
    handler_task: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    navigation_timeout: Duration,
    settle_ms: u64,
    scroll_passes: u32,
    scroll_pause_ms: u64,
}

impl BrowserSession {
    pub async fn launch(
        config: &BrowserConfig,
        pagination: &PaginationPolicy,
    ) -> Result<Self, ExtractError> {
        let chrome_path = find_browser_executable(config.chrome_executable.as_deref())?;

        let user_data_dir =
            std::env::temp_dir().join(format!("styletrack_chrome_{}", std::process::id()));
        std::fs::create_dir_all(&user_data_dir).map_err(|e| {
            ExtractError::browser_launch(format!("failed to create user data directory: {e}"))
        })?;

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(config.request_timeout_secs))
            .window_size(config.window_width, config.window_height)
            .user_data_dir(user_data_dir.clone())
            .chrome_executable(chrome_path);
        if config.headless {
            builder = builder.headless_mode(HeadlessMode::default());
        } else {
            builder = builder.with_head();
        }
        let browser_config = builder
            .arg(format!("--user-agent={CHROME_USER_AGENT}"))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-notifications")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .build()
            .map_err(|e| {
                ExtractError::browser_launch(format!("failed to build browser config: {e}"))
            })?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ExtractError::browser_launch(e.to_string()))?;

        let handler_task = task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let message = e.to_string();
                    // Chrome emits CDP events chromiumoxide cannot deserialize;
                    // those are noise, not failures.
                    if message.contains("data did not match any variant of untagged enum Message") {
                        trace!("suppressed CDP deserialization error: {message}");
                    } else {
                        warn!("browser handler error: {message}");
                    }
                }
            }
            debug!("browser event handler finished");
        });

        Ok(Self {
            browser,
            handler_task,
            user_data_dir: Some(user_data_dir),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            settle_ms: pagination.settle_ms,
            scroll_passes: pagination.scroll_passes,
            scroll_pause_ms: pagination.scroll_pause_ms,
        })
    }

    /// Fetch one listing page: navigate, wait out client-side rendering,
    /// scroll for lazy-loaded images, return the serialized DOM.
    pub async fn fetch(&self, url: &Url) -> Result<String, ExtractError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ExtractError::navigation(url.as_str(), format!("failed to open tab: {e}")))?;

        let navigated = timeout(self.navigation_timeout, async {
            page.goto(url.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        })
        .await;

        match navigated {
            Err(_) => {
                let _ = page.close().await;
                return Err(ExtractError::timeout(
                    url.as_str(),
                    self.navigation_timeout.as_millis() as u64,
                ));
            }
            Ok(Err(e)) => {
                let _ = page.close().await;
                return Err(ExtractError::navigation(url.as_str(), e.to_string()));
            }
            Ok(Ok(())) => {}
        }

        sleep(Duration::from_millis(self.settle_ms)).await;
        for _ in 0..self.scroll_passes {
            if let Err(e) = page.evaluate("window.scrollBy(0, 1000)").await {
                debug!(url = %url, error = %e, "scroll pass failed");
                break;
            }
            sleep(Duration::from_millis(self.scroll_pause_ms)).await;
        }

        let html = page.content().await.map_err(|e| {
            ExtractError::navigation(url.as_str(), format!("failed to read page content: {e}"))
        })?;

        if let Err(e) = page.close().await {
            trace!(url = %url, error = %e, "failed to close tab");
        }
        Ok(html)
    }

    /// Graceful shutdown: close Chrome, wait for it to exit, stop the
    /// handler task, then delete the temp profile.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        self.cleanup_temp_dir();
    }

    // Blocking removal; also reachable from Drop where async is unavailable.
    // Safe only after Chrome has released its profile locks.
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove browser profile dir");
            }
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler_task.abort();
        if self.user_data_dir.is_some() {
            warn!("browser session dropped without shutdown, removing profile dir");
            self.cleanup_temp_dir();
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserSession {
    async fn fetch_listing(&self, url: &Url) -> Result<String, ExtractError> {
        self.fetch(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_executable_wins_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let fake_chrome = dir.path().join("chrome");
        std::fs::write(&fake_chrome, b"").unwrap();

        let found = find_browser_executable(Some(&fake_chrome)).unwrap();
        assert_eq!(found, fake_chrome);
    }
}
