//! Listing-page extraction: selector fallback chains over rendered HTML and
//! the page-by-page walk through one category.
//!
//! The storefronts run different themes, so no single selector set fits
//! every page. Each concern carries an ordered chain and the first selector
//! that produces a usable match wins. HTML parsing stays inside synchronous
//! helpers; `scraper::Html` is not `Send` and must never live across an
//! await point.

use std::collections::BTreeMap;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::domain::entities::{CategoryScope, ProductRecord, Site};
use crate::domain::errors::ExtractError;
use crate::infrastructure::config::{CategoryConfig, PaginationPolicy, SelectorPolicy};

/// Product names shorter than this are selector noise ("XL", "-").
const MIN_NAME_CHARS: usize = 3;

/// Source of rendered listing HTML. Production uses the browser session;
/// tests substitute canned pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_listing(&self, url: &Url) -> Result<String, ExtractError>;
}

/// Selector tables compiled once per run.
pub struct CompiledSelectors {
    item_chain: Vec<Selector>,
    name_chain: Vec<Selector>,
    price: Selector,
    image: Selector,
    swatch: Selector,
    next_page: Selector,
    anchor: Selector,
    skip_image_patterns: Vec<String>,
}

impl CompiledSelectors {
    pub fn compile(policy: &SelectorPolicy) -> Result<Self, ExtractError> {
        fn parse(source: &str) -> Result<Selector, ExtractError> {
            Selector::parse(source)
                .map_err(|e| ExtractError::invalid_selector(source, e.to_string()))
        }

        Ok(Self {
            item_chain: policy
                .item_chain
                .iter()
                .map(|s| parse(s))
                .collect::<Result<_, _>>()?,
            name_chain: policy
                .name_chain
                .iter()
                .map(|s| parse(s))
                .collect::<Result<_, _>>()?,
            price: parse(&policy.price)?,
            image: parse(&policy.image)?,
            swatch: parse(&policy.swatch)?,
            next_page: parse(&policy.next_page)?,
            anchor: parse("a[href]")?,
            skip_image_patterns: policy
                .skip_image_patterns
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        })
    }
}

/// Everything read off one rendered listing page.
#[derive(Debug)]
pub struct PageScan {
    pub records: Vec<ProductRecord>,
    pub has_next: bool,
}

/// Scan one page of listing HTML.
///
/// The first item selector that matches at least one element selects the
/// card set for the whole page. Relative URLs resolve against `page_url`.
pub fn scan_listing(
    html: &str,
    selectors: &CompiledSelectors,
    page_url: &Url,
    scope: &CategoryScope,
) -> PageScan {
    let document = Html::parse_document(html);

    let mut items: Vec<ElementRef<'_>> = Vec::new();
    for selector in &selectors.item_chain {
        let found: Vec<ElementRef<'_>> = document.select(selector).collect();
        if !found.is_empty() {
            items = found;
            break;
        }
    }

    let records = items
        .iter()
        .map(|item| {
            let mut record = ProductRecord::new(scope.site, scope.gender, scope.category.clone());
            record.name = extract_name(item, &selectors.name_chain);
            record.price_text = extract_text(item, &selectors.price);
            record.image_url = extract_image(item, selectors, page_url);
            record.product_url = extract_link(item, &selectors.anchor, page_url);
            record.colors = extract_swatches(item, &selectors.swatch);
            record
        })
        .collect();

    let has_next = document.select(&selectors.next_page).next().is_some();
    PageScan { records, has_next }
}

/// Element text with whitespace collapsed to single spaces.
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Walk the name chain; each selector contributes only its first match, and
/// a match too short to be a real name sends us to the next selector.
fn extract_name(item: &ElementRef<'_>, chain: &[Selector]) -> Option<String> {
    for selector in chain {
        if let Some(element) = item.select(selector).next() {
            let text = element_text(&element);
            if text.chars().count() >= MIN_NAME_CHARS {
                return Some(text);
            }
        }
    }
    None
}

fn extract_text(item: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    item.select(selector)
        .next()
        .map(|element| element_text(&element))
        .filter(|text| !text.is_empty())
}

/// First image that is not a payment badge or other junk.
///
/// Per image the attribute priority is `src`, then the lazy-load attributes
/// `srcset` and `data-srcset` (first URL of the set).
fn extract_image(
    item: &ElementRef<'_>,
    selectors: &CompiledSelectors,
    page_url: &Url,
) -> Option<String> {
    for img in item.select(&selectors.image) {
        let candidate = img
            .value()
            .attr("src")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| img.value().attr("srcset").and_then(first_srcset_url))
            .or_else(|| img.value().attr("data-srcset").and_then(first_srcset_url));

        let Some(raw) = candidate else { continue };
        let lowered = raw.to_lowercase();
        if selectors
            .skip_image_patterns
            .iter()
            .any(|pattern| lowered.contains(pattern))
        {
            continue;
        }
        if let Some(resolved) = absolutize(&raw, page_url) {
            return Some(resolved);
        }
    }
    None
}

/// First URL of a srcset: everything before the first comma, stripped of its
/// density descriptor.
fn first_srcset_url(srcset: &str) -> Option<String> {
    let first = srcset.split(',').next()?.trim();
    let url = first.split_whitespace().next()?;
    (!url.is_empty()).then(|| url.to_string())
}

fn extract_link(item: &ElementRef<'_>, anchor: &Selector, page_url: &Url) -> Option<String> {
    let own_href = (item.value().name() == "a")
        .then(|| item.value().attr("href"))
        .flatten();
    let href = own_href.or_else(|| {
        item.select(anchor)
            .next()
            .and_then(|a| a.value().attr("href"))
    })?;
    absolutize(href, page_url)
}

fn extract_swatches(item: &ElementRef<'_>, swatch: &Selector) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for element in item.select(swatch) {
        let text = element_text(&element);
        if !text.is_empty() && !labels.contains(&text) {
            labels.push(text);
        }
    }
    labels
}

/// Resolve a scraped URL to an absolute one. Protocol-relative URLs get an
/// https scheme; path-relative ones join against the page URL.
fn absolutize(raw: &str, base: &Url) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    match Url::parse(raw) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            base.join(raw).ok().map(|url| url.to_string())
        }
        Err(_) => None,
    }
}

/// Records and page count from one whole category.
#[derive(Debug)]
pub struct CategoryYield {
    pub records: Vec<ProductRecord>,
    pub pages_fetched: u32,
}

/// Walks one category page by page until it runs dry.
pub struct CategoryExtractor<'a, F: PageFetcher + ?Sized> {
    fetcher: &'a F,
    selectors: CompiledSelectors,
    pagination: PaginationPolicy,
    query_extras: Vec<(String, String)>,
}

impl<'a, F: PageFetcher + ?Sized> CategoryExtractor<'a, F> {
    pub fn new(
        fetcher: &'a F,
        selectors: &SelectorPolicy,
        pagination: PaginationPolicy,
        query_extras: &BTreeMap<String, String>,
    ) -> Result<Self, ExtractError> {
        Ok(Self {
            fetcher,
            selectors: CompiledSelectors::compile(selectors)?,
            pagination,
            query_extras: query_extras
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Extract every product of one category.
    ///
    /// Stops at the first page with zero products, at a page with no next
    /// affordance, or at the page cap, whichever comes first. Fetch errors
    /// abort the category; the caller decides whether the run survives.
    pub async fn extract(
        &self,
        category: &CategoryConfig,
        site: Site,
    ) -> Result<CategoryYield, ExtractError> {
        let base = Url::parse(&category.url)
            .map_err(|e| ExtractError::invalid_url(&category.url, e.to_string()))?;
        let scope = category.scope(site);

        let mut records = Vec::new();
        let mut pages_fetched = 0;

        for page in 1..=self.pagination.max_pages {
            let page_url = self.page_url(&base, page);
            debug!(category = %scope, page, url = %page_url, "fetching listing page");

            let html = self.fetcher.fetch_listing(&page_url).await?;
            pages_fetched += 1;

            let scan = scan_listing(&html, &self.selectors, &page_url, &scope);
            if scan.records.is_empty() {
                debug!(category = %scope, page, "page yielded no products, stopping");
                break;
            }
            debug!(category = %scope, page, products = scan.records.len(), "page scanned");
            records.extend(scan.records);

            if !scan.has_next {
                debug!(category = %scope, page, "no next affordance, stopping");
                break;
            }
        }

        Ok(CategoryYield {
            records,
            pages_fetched,
        })
    }

    fn page_url(&self, base: &Url, page: u32) -> Url {
        let mut url = base.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_extras {
                pairs.append_pair(key, value);
            }
            pairs.append_pair(&self.pagination.page_param, &page.to_string());
        }
        url
    }
}
