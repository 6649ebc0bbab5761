//! Core domain types: sites, scrape targets, products and their
//! session-scoped history records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two tracked retail sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Site {
    #[serde(rename = "Fashion Bug")]
    FashionBug,
    #[serde(rename = "Cool Planet")]
    CoolPlanet,
}

impl Site {
    /// Canonical display name, also the value stored in the `site` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FashionBug => "Fashion Bug",
            Self::CoolPlanet => "Cool Planet",
        }
    }

    /// Lenient parse accepting the spellings seen in stored data and query
    /// parameters ("Fashion Bug", "fashionbug", "cool planet", ...).
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.to_lowercase();
        if v.contains("fashion") || v.contains("bug") {
            Some(Self::FashionBug)
        } else if v.contains("cool") || v.contains("planet") {
            Some(Self::CoolPlanet)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gender segment of a category listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Men,
    Women,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Men => "Men",
            Self::Women => "Women",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "men" | "male" => Some(Self::Men),
            "women" | "female" => Some(Self::Women),
            _ => None,
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (site, gender, clothing-type) identity of one scrape target.
/// Reconciliation after a run is scoped to exactly these keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CategoryScope {
    pub site: Site,
    pub gender: Gender,
    pub category: String,
}

impl CategoryScope {
    pub fn new(site: Site, gender: Gender, category: impl Into<String>) -> Self {
        Self {
            site,
            gender,
            category: category.into(),
        }
    }
}

impl std::fmt::Display for CategoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {} / {}", self.site, self.gender, self.category)
    }
}

/// One observed listing item flowing through the pipeline.
///
/// The extractor fills the raw fields (price as scraped, swatch labels if the
/// markup exposed any); the cleaning stage sets `price_numeric`; the color
/// stage replaces `colors` with the final primary-first label list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub site: Site,
    pub gender: Gender,
    pub category: String,
    pub name: Option<String>,
    pub price_text: Option<String>,
    pub price_numeric: Option<f64>,
    pub image_url: Option<String>,
    pub product_url: Option<String>,
    pub colors: Vec<String>,
}

impl ProductRecord {
    pub fn new(site: Site, gender: Gender, category: impl Into<String>) -> Self {
        Self {
            site,
            gender,
            category: category.into(),
            name: None,
            price_text: None,
            price_numeric: None,
            image_url: None,
            product_url: None,
            colors: Vec::new(),
        }
    }

    pub fn scope(&self) -> CategoryScope {
        CategoryScope::new(self.site, self.gender, self.category.clone())
    }
}

/// Product identity row. Created on first observation, never deleted;
/// disappearance flips `is_active` via reconciliation only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub url: String,
    pub site: String,
    pub gender: Option<String>,
    pub category: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_active: bool,
}

/// One pipeline run. Immutable once `completed_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSession {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_products: i64,
    pub notes: Option<String>,
}

/// Append-only price observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: i64,
    pub product_id: i64,
    pub session_id: i64,
    pub price_text: String,
    pub price_numeric: Option<f64>,
    pub currency: String,
    pub observed_at: DateTime<Utc>,
}

/// Append-only color observation; `colors` is ordered primary-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColorRecord {
    pub id: i64,
    pub product_id: i64,
    pub session_id: i64,
    pub colors: Vec<String>,
    pub observed_at: DateTime<Utc>,
}

/// Append-only image observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: i64,
    pub product_id: i64,
    pub session_id: i64,
    pub image_url: String,
    pub observed_at: DateTime<Utc>,
}

/// Append-only product-name observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRecord {
    pub id: i64,
    pub product_id: i64,
    pub session_id: i64,
    pub name: String,
    pub observed_at: DateTime<Utc>,
}
