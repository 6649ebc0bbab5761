//! Application configuration: scrape targets, selector and policy tables,
//! browser and database settings.
//!
//! Everything a deployment would tune lives here as data. Site category URLs
//! and CSS selectors are configuration, not code; the built-in defaults are
//! the two production sites.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::domain::entities::{CategoryScope, Gender, Site};
use crate::domain::normalizer::{PricePolicy, PrimaryColorRule};

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub scrape: ScrapeConfig,
}

/// Database location. Defaults under the platform-local data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join("styletrack.db"),
        }
    }
}

/// Headless browser settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Explicit Chrome/Chromium binary; `None` means discover one
    /// (CHROMIUM_PATH env var, then well-known install locations).
    pub chrome_executable: Option<PathBuf>,
    /// Per-CDP-request timeout.
    pub request_timeout_secs: u64,
    /// Upper bound on one page navigation.
    pub navigation_timeout_secs: u64,
    pub window_width: u32,
    pub window_height: u32,
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            request_timeout_secs: 30,
            navigation_timeout_secs: 60,
            window_width: 1920,
            window_height: 1080,
            headless: true,
        }
    }
}

/// Log filtering, overridable with RUST_LOG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_filter: "styletrack=info".to_string(),
        }
    }
}

/// Everything the scrape stages consume: targets plus policy tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub sites: Vec<SiteConfig>,
    #[serde(default)]
    pub selectors: SelectorPolicy,
    #[serde(default)]
    pub pagination: PaginationPolicy,
    #[serde(default)]
    pub price: PricePolicy,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            sites: vec![SiteConfig::fashion_bug(), SiteConfig::cool_planet()],
            selectors: SelectorPolicy::default(),
            pagination: PaginationPolicy::default(),
            price: PricePolicy::default(),
        }
    }
}

/// One tracked site and its category listing URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site: Site,
    pub base_url: String,
    /// Currency code stored on every price row from this site.
    pub currency: String,
    /// Extra query parameters appended to every category URL
    /// (view-size and sort hints the sites respond to).
    #[serde(default)]
    pub query_extras: BTreeMap<String, String>,
    /// Clothing types whose listing photos pair the garment with another one;
    /// for these the second listed color is the garment's own.
    #[serde(default)]
    pub paired_photo_categories: Vec<String>,
    pub categories: Vec<CategoryConfig>,
}

impl SiteConfig {
    pub fn fashion_bug() -> Self {
        let mk = |name: &str, url: &str, gender: Gender, clothing_type: &str| CategoryConfig {
            name: name.to_string(),
            url: url.to_string(),
            gender,
            clothing_type: clothing_type.to_string(),
        };
        Self {
            site: Site::FashionBug,
            base_url: "https://fashionbug.lk".to_string(),
            currency: "Rs".to_string(),
            query_extras: BTreeMap::from([(
                "grid_list".to_string(),
                "grid-view-50".to_string(),
            )]),
            paired_photo_categories: vec![
                "Shirt".to_string(),
                "Blouse".to_string(),
                "Top".to_string(),
            ],
            categories: vec![
                mk("Jeans", "https://fashionbug.lk/collections/jeans-women", Gender::Women, "Trousers"),
                mk("Pants", "https://fashionbug.lk/collections/pants_ladies", Gender::Women, "Trousers"),
                mk("Skirts", "https://fashionbug.lk/collections/skirt", Gender::Women, "Skirt"),
                mk("Dresses", "https://fashionbug.lk/collections/dresses", Gender::Women, "Dress"),
                mk("Blouses & Shirts", "https://fashionbug.lk/collections/blouses-shirts", Gender::Women, "Blouse"),
                mk("Crop Tops & T-Shirts", "https://fashionbug.lk/collections/crop-tops-t-shirts", Gender::Women, "T-Shirt"),
                mk("Casual Pants", "https://fashionbug.lk/collections/casual-pants", Gender::Men, "Trousers"),
                mk("Jeans & Joggers", "https://fashionbug.lk/collections/jeans-joggers-men", Gender::Men, "Trousers"),
                mk("T-Shirts & Polos", "https://fashionbug.lk/collections/t-shirts-polos-men", Gender::Men, "T-Shirt"),
                mk("Casual Shirts", "https://fashionbug.lk/collections/casual-shirts-men", Gender::Men, "Shirt"),
            ],
        }
    }

    pub fn cool_planet() -> Self {
        let mk = |name: &str, url: &str, gender: Gender, clothing_type: &str| CategoryConfig {
            name: name.to_string(),
            url: url.to_string(),
            gender,
            clothing_type: clothing_type.to_string(),
        };
        Self {
            site: Site::CoolPlanet,
            base_url: "https://coolplanet.lk".to_string(),
            currency: "Rs".to_string(),
            query_extras: BTreeMap::from([(
                "sort_by".to_string(),
                "best-selling".to_string(),
            )]),
            paired_photo_categories: Vec::new(),
            categories: vec![
                mk("T-Shirts & Tops", "https://coolplanet.lk/collections/t-shirts-tops", Gender::Women, "T-Shirt"),
                mk("Tops", "https://coolplanet.lk/collections/tops", Gender::Women, "Top"),
                mk("Blouses", "https://coolplanet.lk/collections/blouse", Gender::Women, "Blouse"),
                mk("Dresses", "https://coolplanet.lk/collections/dresses", Gender::Women, "Dress"),
                mk("Pants", "https://coolplanet.lk/collections/pants-1", Gender::Women, "Trousers"),
                mk("Skirts", "https://coolplanet.lk/collections/skirts", Gender::Women, "Skirt"),
                mk("T-Shirts", "https://coolplanet.lk/collections/shirts-t-shirts", Gender::Men, "T-Shirt"),
                mk("Shirts", "https://coolplanet.lk/collections/shirts", Gender::Men, "Shirt"),
                mk("Pants", "https://coolplanet.lk/collections/pants", Gender::Men, "Trousers"),
            ],
        }
    }

    /// Which color in a listing is the garment's own for this site/type.
    pub fn primary_color_rule(&self, clothing_type: &str) -> PrimaryColorRule {
        let paired = self
            .paired_photo_categories
            .iter()
            .any(|t| t.eq_ignore_ascii_case(clothing_type));
        if paired {
            PrimaryColorRule::SecondWhenPaired
        } else {
            PrimaryColorRule::FirstListed
        }
    }
}

/// One category listing target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Display name used in progress messages ("Blouses & Shirts").
    pub name: String,
    pub url: String,
    pub gender: Gender,
    /// Free-form clothing-type label stored as the product's category.
    pub clothing_type: String,
}

impl CategoryConfig {
    pub fn scope(&self, site: Site) -> CategoryScope {
        CategoryScope::new(site, self.gender, self.clothing_type.clone())
    }
}

/// CSS selector tables. The item chain is ordered: the first selector that
/// matches at least one element wins for that page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorPolicy {
    pub item_chain: Vec<String>,
    pub name_chain: Vec<String>,
    pub price: String,
    pub image: String,
    pub swatch: String,
    pub next_page: String,
    /// Substrings marking payment badges and other junk images.
    pub skip_image_patterns: Vec<String>,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            item_chain: vec![
                ".product-item".to_string(),
                ".product-card".to_string(),
                ".product".to_string(),
                "article.product".to_string(),
            ],
            name_chain: vec![
                ".product-item__title".to_string(),
                "a.product-item__title".to_string(),
                "h2".to_string(),
                "h3".to_string(),
                ".product-title".to_string(),
                ".product-name".to_string(),
                ".product__title".to_string(),
                "a.product-link".to_string(),
                "a[href*=\"/products/\"]".to_string(),
                ".card__heading".to_string(),
                ".card-title".to_string(),
                "a".to_string(),
            ],
            price: ".price, .amount".to_string(),
            image: "img".to_string(),
            swatch: ".color-swatch, .swatch__label".to_string(),
            next_page: "a[rel=\"next\"], .pagination__next, .next".to_string(),
            skip_image_patterns: vec![
                "mintpay".to_string(),
                "koko".to_string(),
                "payment".to_string(),
                "payhere".to_string(),
                "logo".to_string(),
                "info_icon".to_string(),
                "info.png".to_string(),
                "aliyuncs".to_string(),
                "d2zh3hh1z5w0qw".to_string(),
            ],
        }
    }
}

/// Page-advance policy for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationPolicy {
    /// Hard upper bound on pages per category.
    pub max_pages: u32,
    /// Settle delay after navigation, letting client-side rendering finish.
    pub settle_ms: u64,
    /// Scroll passes to trigger lazy-loaded images.
    pub scroll_passes: u32,
    pub scroll_pause_ms: u64,
    /// Query parameter carrying the 1-based page number.
    pub page_param: String,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            max_pages: 10,
            settle_ms: 4000,
            scroll_passes: 3,
            scroll_pause_ms: 800,
            page_param: "page".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            browser: BrowserConfig::default(),
            logging: LoggingConfig::default(),
            scrape: ScrapeConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, writing the defaults there on first run.
    /// `None` means run on defaults without touching the filesystem.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        if !path.exists() {
            info!(path = %path.display(), "config file not found, writing defaults");
            let config = Self::default();
            config.save(path).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let content = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// All (site, gender, clothing-type) scopes this configuration targets.
    pub fn all_scopes(&self) -> Vec<CategoryScope> {
        self.scrape
            .sites
            .iter()
            .flat_map(|s| s.categories.iter().map(|c| c.scope(s.site)))
            .collect()
    }
}

/// Platform-local data directory for this application.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("styletrack")
}
