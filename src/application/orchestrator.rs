//! Pipeline orchestration: the run gate, the four stages and the event feed.
//!
//! A run walks Scraping, Price Cleaning, Color Extraction and Database Import
//! in order. Category failures during scraping are contained events; a browser
//! that never comes up, a selector table that does not compile or any import
//! error sinks the whole run. At most one run is active per process.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::entities::{CategoryScope, ProductRecord, Site};
use crate::domain::errors::PipelineError;
use crate::domain::events::{PipelineStage, ProgressEvent};
use crate::domain::normalizer::{PriceCleaner, mine_color_labels, order_primary_first};
use crate::infrastructure::browser::BrowserSession;
use crate::infrastructure::config::{AppConfig, CategoryConfig};
use crate::infrastructure::extractor::{CategoryExtractor, PageFetcher};
use crate::infrastructure::repository::ProductRepository;
use crate::infrastructure::site_status::{SiteChecker, SiteStatus};

/// Terminal state of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { stage: PipelineStage },
}

/// What a run produced, returned when the worker task is joined.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Session row id, present once the import stage opened one.
    pub session_id: Option<i64>,
    /// Product observations written during import.
    pub total_products: i64,
    /// Categories that failed or were skipped during scraping.
    pub failed_categories: Vec<String>,
}

impl RunSummary {
    fn failed(stage: PipelineStage, failed_categories: Vec<String>) -> Self {
        Self {
            outcome: RunOutcome::Failed { stage },
            session_id: None,
            total_products: 0,
            failed_categories,
        }
    }
}

/// Handle on an active run.
///
/// Dropping the handle detaches the run rather than aborting it; the worker
/// keeps emitting into a closed channel and finishes on its own.
pub struct RunningPipeline {
    events: mpsc::UnboundedReceiver<ProgressEvent>,
    cancel: CancellationToken,
    handle: JoinHandle<RunSummary>,
}

impl RunningPipeline {
    /// Next progress event, `None` once the run finished and the feed drained.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.events.recv().await
    }

    /// Ask the run to stop at the next category or stage boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker and collect its summary.
    pub async fn join(self) -> Result<RunSummary, PipelineError> {
        self.handle
            .await
            .map_err(|e| PipelineError::stage_failed("pipeline worker", e.to_string()))
    }
}

/// Owns the single run slot and spawns pipeline workers.
pub struct PipelineOrchestrator {
    config: AppConfig,
    repository: ProductRepository,
    run_slot: Arc<Semaphore>,
}

impl PipelineOrchestrator {
    pub fn new(config: AppConfig, repository: ProductRepository) -> Self {
        Self {
            config,
            repository,
            run_slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Start a browser-backed run. Rejected, never queued, while another run
    /// holds the slot.
    pub fn try_start(&self, notes: Option<String>) -> Result<RunningPipeline, PipelineError> {
        self.spawn_run(None, notes)
    }

    /// Start a run over a caller-supplied page source instead of a live
    /// browser. Site preflight is skipped; the run gate applies all the same.
    pub fn try_start_with(
        &self,
        fetcher: Arc<dyn PageFetcher>,
        notes: Option<String>,
    ) -> Result<RunningPipeline, PipelineError> {
        self.spawn_run(Some(fetcher), notes)
    }

    fn spawn_run(
        &self,
        fetcher: Option<Arc<dyn PageFetcher>>,
        notes: Option<String>,
    ) -> Result<RunningPipeline, PipelineError> {
        let permit = self
            .run_slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| PipelineError::AlreadyRunning)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = RunWorker {
            config: self.config.clone(),
            repository: self.repository.clone(),
            events: events_tx,
            cancel: cancel.clone(),
            notes,
        };
        // The permit rides inside the task so the slot frees exactly when the
        // run reaches a terminal state, however the caller handles the handle.
        let handle = tokio::spawn(async move {
            let summary = worker.run(fetcher).await;
            drop(permit);
            summary
        });

        Ok(RunningPipeline {
            events: events_rx,
            cancel,
            handle,
        })
    }
}

/// Everything harvested by the scraping stage.
#[derive(Default)]
struct Harvest {
    records: Vec<ProductRecord>,
    /// Scopes of categories that extracted without error.
    clean_scopes: Vec<CategoryScope>,
    /// Scopes of categories that failed or were skipped.
    failed_scopes: Vec<CategoryScope>,
    failed_categories: Vec<String>,
}

struct ImportStats {
    imported: i64,
    new_products: i64,
    deactivated: u64,
    reactivated: u64,
}

struct RunWorker {
    config: AppConfig,
    repository: ProductRepository,
    events: mpsc::UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
    notes: Option<String>,
}

impl RunWorker {
    /// A dropped consumer must never stall the run.
    fn emit(&self, event: ProgressEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, stage: PipelineStage, message: String, failed: Vec<String>) -> RunSummary {
        warn!(stage = %stage, %message, "pipeline run failed");
        self.emit(ProgressEvent::StageFailed {
            stage,
            message,
        });
        self.emit(ProgressEvent::RunFailed { stage });
        RunSummary::failed(stage, failed)
    }

    /// Failure path for a run whose session row already exists. The session
    /// still gets its terminal timestamp, and whatever history rows were
    /// written stay.
    async fn fail_run(
        &self,
        session_id: i64,
        imported: i64,
        stage: PipelineStage,
        message: String,
        failed: Vec<String>,
    ) -> RunSummary {
        if let Err(e) = self
            .repository
            .complete_session(session_id, Utc::now(), imported)
            .await
        {
            warn!(error = %e, session_id, "could not close session after failure");
        }
        let mut summary = self.fail(stage, message, failed);
        summary.session_id = Some(session_id);
        summary.total_products = imported;
        summary
    }

    async fn run(self, fetcher: Option<Arc<dyn PageFetcher>>) -> RunSummary {
        let started_at = Utc::now();
        info!(%started_at, "pipeline run starting");
        self.emit(ProgressEvent::Note {
            message: "Starting scraping pipeline".to_string(),
        });

        // The session row exists for the whole run; failed runs keep it too,
        // closed with whatever was imported before the failure.
        let session_id = match self
            .repository
            .create_session(started_at, self.notes.as_deref())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                return self.fail(PipelineStage::Scraping, format!("{e:#}"), Vec::new());
            }
        };

        // Stage 1: Web Scraping
        self.emit(ProgressEvent::StageStarted {
            stage: PipelineStage::Scraping,
        });
        let scraped = match fetcher {
            Some(fetcher) => self.scrape(fetcher.as_ref(), &HashMap::new()).await,
            None => self.scrape_with_browser().await,
        };
        let mut harvest = match scraped {
            Ok(harvest) => harvest,
            Err(message) => {
                return self
                    .fail_run(session_id, 0, PipelineStage::Scraping, message, Vec::new())
                    .await;
            }
        };
        self.emit(ProgressEvent::StageProgress {
            stage: PipelineStage::Scraping,
            message: format!(
                "Collected {} products from {} categories",
                harvest.records.len(),
                harvest.clean_scopes.len()
            ),
        });
        self.emit(ProgressEvent::StageCompleted {
            stage: PipelineStage::Scraping,
        });

        // Stage 2: Price Cleaning
        self.emit(ProgressEvent::StageStarted {
            stage: PipelineStage::Cleaning,
        });
        let cleaner = match PriceCleaner::new(&self.config.scrape.price) {
            Ok(cleaner) => cleaner,
            Err(e) => {
                return self
                    .fail_run(
                        session_id,
                        0,
                        PipelineStage::Cleaning,
                        format!("price pattern table does not compile: {e}"),
                        harvest.failed_categories,
                    )
                    .await;
            }
        };
        let mut priced = 0usize;
        for record in &mut harvest.records {
            if let Some(text) = &record.price_text {
                record.price_numeric = cleaner.clean(text);
                if record.price_numeric.is_some() {
                    priced += 1;
                }
            }
        }
        self.emit(ProgressEvent::StageProgress {
            stage: PipelineStage::Cleaning,
            message: format!(
                "Parsed prices for {priced} of {} products",
                harvest.records.len()
            ),
        });
        self.emit(ProgressEvent::StageCompleted {
            stage: PipelineStage::Cleaning,
        });

        // Stage 3: Color Extraction
        self.emit(ProgressEvent::StageStarted {
            stage: PipelineStage::ColorExtraction,
        });
        let mut with_colors = 0usize;
        for record in &mut harvest.records {
            if record.colors.is_empty() {
                if let Some(name) = &record.name {
                    record.colors = mine_color_labels(name);
                }
            }
            if let Some(site_config) = self
                .config
                .scrape
                .sites
                .iter()
                .find(|s| s.site == record.site)
            {
                let rule = site_config.primary_color_rule(&record.category);
                record.colors = order_primary_first(std::mem::take(&mut record.colors), rule);
            }
            if !record.colors.is_empty() {
                with_colors += 1;
            }
        }
        self.emit(ProgressEvent::StageProgress {
            stage: PipelineStage::ColorExtraction,
            message: format!(
                "Found color labels for {with_colors} of {} products",
                harvest.records.len()
            ),
        });
        self.emit(ProgressEvent::StageCompleted {
            stage: PipelineStage::ColorExtraction,
        });

        // Stage 4: Database Import
        self.emit(ProgressEvent::StageStarted {
            stage: PipelineStage::Importing,
        });
        if self.cancel.is_cancelled() {
            return self
                .fail_run(
                    session_id,
                    0,
                    PipelineStage::Importing,
                    "run cancelled".to_string(),
                    harvest.failed_categories,
                )
                .await;
        }
        let mut imported = 0i64;
        let stats = match self
            .import(session_id, &harvest, started_at, &mut imported)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                return self
                    .fail_run(
                        session_id,
                        imported,
                        PipelineStage::Importing,
                        format!("{e:#}"),
                        harvest.failed_categories,
                    )
                    .await;
            }
        };
        self.emit(ProgressEvent::StageProgress {
            stage: PipelineStage::Importing,
            message: format!(
                "Imported {} product observations ({} new products)",
                stats.imported, stats.new_products
            ),
        });
        if stats.deactivated > 0 || stats.reactivated > 0 {
            self.emit(ProgressEvent::StageProgress {
                stage: PipelineStage::Importing,
                message: format!(
                    "Reconciled listings: {} marked inactive, {} back in stock",
                    stats.deactivated, stats.reactivated
                ),
            });
        }
        self.emit(ProgressEvent::StageCompleted {
            stage: PipelineStage::Importing,
        });
        self.emit(ProgressEvent::RunCompleted {
            total_products: stats.imported,
        });
        info!(
            session_id,
            products = stats.imported,
            failed_categories = harvest.failed_categories.len(),
            "pipeline run completed"
        );

        RunSummary {
            outcome: RunOutcome::Completed,
            session_id: Some(session_id),
            total_products: stats.imported,
            failed_categories: harvest.failed_categories,
        }
    }

    async fn scrape_with_browser(&self) -> Result<Harvest, String> {
        let unreachable = self.preflight().await?;
        let browser = BrowserSession::launch(&self.config.browser, &self.config.scrape.pagination)
            .await
            .map_err(|e| e.to_string())?;
        let result = self.scrape(&browser, &unreachable).await;
        browser.shutdown().await;
        result
    }

    /// Probe each site once before paying for a browser launch.
    async fn preflight(&self) -> Result<HashMap<Site, String>, String> {
        let checker = SiteChecker::new(self.config.browser.request_timeout_secs)
            .map_err(|e| format!("HTTP client init failed: {e}"))?;
        let mut unreachable = HashMap::new();
        for site_config in &self.config.scrape.sites {
            if let SiteStatus::Unreachable { reason } =
                checker.check(site_config.site, &site_config.base_url).await
            {
                unreachable.insert(site_config.site, reason);
            }
        }
        Ok(unreachable)
    }

    async fn scrape(
        &self,
        fetcher: &dyn PageFetcher,
        unreachable: &HashMap<Site, String>,
    ) -> Result<Harvest, String> {
        let scrape = &self.config.scrape;
        let mut harvest = Harvest::default();

        for site_config in &scrape.sites {
            if let Some(reason) = unreachable.get(&site_config.site) {
                warn!(site = %site_config.site, %reason, "site unreachable, skipping its categories");
                for category in &site_config.categories {
                    let label = category_label(site_config.site, category);
                    self.emit(ProgressEvent::CategoryFailed {
                        category: label.clone(),
                        message: format!("site unreachable: {reason}"),
                    });
                    harvest.failed_scopes.push(category.scope(site_config.site));
                    harvest.failed_categories.push(label);
                }
                continue;
            }

            let extractor = CategoryExtractor::new(
                fetcher,
                &scrape.selectors,
                scrape.pagination.clone(),
                &site_config.query_extras,
            )
            .map_err(|e| e.to_string())?;

            for category in &site_config.categories {
                if self.cancel.is_cancelled() {
                    return Err("run cancelled".to_string());
                }
                let label = category_label(site_config.site, category);
                self.emit(ProgressEvent::StageProgress {
                    stage: PipelineStage::Scraping,
                    message: format!("Scraping {label}..."),
                });
                match extractor.extract(category, site_config.site).await {
                    Ok(yielded) => {
                        info!(
                            category = %label,
                            products = yielded.records.len(),
                            pages = yielded.pages_fetched,
                            "category extracted"
                        );
                        self.emit(ProgressEvent::StageProgress {
                            stage: PipelineStage::Scraping,
                            message: format!(
                                "{label}: {} products from {} pages",
                                yielded.records.len(),
                                yielded.pages_fetched
                            ),
                        });
                        harvest.clean_scopes.push(category.scope(site_config.site));
                        harvest.records.extend(yielded.records);
                    }
                    Err(e) if e.is_run_fatal() => return Err(e.to_string()),
                    Err(e) => {
                        warn!(category = %label, error = %e, "category failed, continuing");
                        self.emit(ProgressEvent::CategoryFailed {
                            category: label.clone(),
                            message: e.to_string(),
                        });
                        harvest.failed_scopes.push(category.scope(site_config.site));
                        harvest.failed_categories.push(label);
                    }
                }
            }
        }
        Ok(harvest)
    }

    /// `imported` counts fully stored records as the loop goes, so a failed
    /// import can still close the session with the partial count.
    async fn import(
        &self,
        session_id: i64,
        harvest: &Harvest,
        started_at: DateTime<Utc>,
        imported: &mut i64,
    ) -> anyhow::Result<ImportStats> {
        let repo = &self.repository;
        let known_before = repo.count_products().await?;

        let mut skipped = 0i64;
        for record in &harvest.records {
            let Some(url) = record.product_url.as_deref() else {
                skipped += 1;
                continue;
            };
            let product_id = repo
                .upsert_product(url, record.site, record.gender, &record.category, started_at)
                .await?;
            if let Some(name) = record.name.as_deref() {
                repo.append_name(product_id, session_id, name, started_at).await?;
            }
            if let Some(price_text) = record.price_text.as_deref() {
                let currency = self
                    .config
                    .scrape
                    .sites
                    .iter()
                    .find(|s| s.site == record.site)
                    .map(|s| s.currency.as_str())
                    .unwrap_or("Rs");
                repo.append_price(
                    product_id,
                    session_id,
                    price_text,
                    record.price_numeric,
                    currency,
                    started_at,
                )
                .await?;
            }
            if !record.colors.is_empty() {
                repo.append_colors(product_id, session_id, &record.colors, started_at)
                    .await?;
            }
            if let Some(image_url) = record.image_url.as_deref() {
                repo.append_image(product_id, session_id, image_url, started_at)
                    .await?;
            }
            *imported += 1;
        }
        if skipped > 0 {
            debug!(skipped, "records without product links were not stored");
        }

        let known_after = repo.count_products().await?;

        // A scope flips active flags only when every category feeding it
        // scraped cleanly; Jeans and Pants both land in Trousers, and one
        // failing must not mark the other's products gone.
        let mut deactivated = 0u64;
        let mut reactivated = 0u64;
        let mut reconciled: Vec<&CategoryScope> = Vec::new();
        for scope in &harvest.clean_scopes {
            if reconciled.contains(&scope) || harvest.failed_scopes.contains(scope) {
                continue;
            }
            let counts = repo.reconcile_active(scope, started_at).await?;
            deactivated += counts.deactivated;
            reactivated += counts.reactivated;
            reconciled.push(scope);
        }

        repo.complete_session(session_id, Utc::now(), *imported)
            .await?;

        Ok(ImportStats {
            imported: *imported,
            new_products: known_after - known_before,
            deactivated,
            reactivated,
        })
    }
}

fn category_label(site: Site, category: &CategoryConfig) -> String {
    format!("{} {}", site, category.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ExtractError;
    use crate::infrastructure::DatabaseConnection;
    use async_trait::async_trait;
    use url::Url;

    /// Blocks every fetch until the test hands out permits, and reports each
    /// entry so the test can order its assertions.
    struct GatedFetcher {
        entered: mpsc::UnboundedSender<()>,
        release: Arc<Semaphore>,
    }

    #[async_trait]
    impl PageFetcher for GatedFetcher {
        async fn fetch_listing(&self, _url: &Url) -> Result<String, ExtractError> {
            let _ = self.entered.send(());
            let _permit = self
                .release
                .acquire()
                .await
                .map_err(|_| ExtractError::navigation("gated", "semaphore closed"))?;
            Ok("<html><body><div class=\"empty\"></div></body></html>".to_string())
        }
    }

    async fn test_orchestrator() -> (PipelineOrchestrator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let connection = DatabaseConnection::new(&dir.path().join("runs.db"))
            .await
            .unwrap();
        connection.migrate().await.unwrap();
        let repository = ProductRepository::new(Arc::new(connection.pool().clone()));
        (
            PipelineOrchestrator::new(AppConfig::default(), repository),
            dir,
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_start_is_rejected_while_a_run_is_active() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let fetcher = Arc::new(GatedFetcher {
            entered: entered_tx,
            release: release.clone(),
        });

        let mut first = orchestrator
            .try_start_with(fetcher.clone(), None)
            .expect("first run should start");
        entered_rx.recv().await.expect("first run reaches a fetch");

        let second = orchestrator.try_start_with(fetcher.clone(), None);
        assert!(matches!(second, Err(PipelineError::AlreadyRunning)));

        release.add_permits(10_000);
        while first.next_event().await.is_some() {}
        let summary = first.join().await.unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);

        // Slot frees once the run reaches a terminal state.
        let third = orchestrator.try_start_with(fetcher, None);
        assert!(third.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_stops_the_run_at_a_category_boundary() {
        let (orchestrator, _dir) = test_orchestrator().await;
        let (entered_tx, mut entered_rx) = mpsc::unbounded_channel();
        let release = Arc::new(Semaphore::new(0));
        let fetcher = Arc::new(GatedFetcher {
            entered: entered_tx,
            release: release.clone(),
        });

        let mut run = orchestrator
            .try_start_with(fetcher, None)
            .expect("run should start");
        entered_rx.recv().await.expect("run reaches a fetch");
        run.cancel();
        release.add_permits(10_000);

        let mut saw_run_failed = false;
        while let Some(event) = run.next_event().await {
            if let ProgressEvent::RunFailed { stage } = event {
                saw_run_failed = true;
                assert_eq!(stage, PipelineStage::Scraping);
            }
        }
        assert!(saw_run_failed);

        let summary = run.join().await.unwrap();
        assert_eq!(
            summary.outcome,
            RunOutcome::Failed {
                stage: PipelineStage::Scraping
            }
        );
    }
}
