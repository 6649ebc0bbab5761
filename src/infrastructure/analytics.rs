//! Read-side aggregates over the history tables.
//!
//! These queries never touch raw scrape output; everything derives from the
//! stored observations. Color labels are kept verbatim in the database and
//! folded into base-color buckets here, at query time.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::domain::entities::{Gender, Site};
use crate::domain::normalizer::{BaseColor, categorize_color};
use crate::infrastructure::repository::split_color_labels;

/// Filters shared by the listing and trend queries. `None` means no filter.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub site: Option<Site>,
    pub gender: Option<Gender>,
    /// Matched as a case-insensitive substring of the category label.
    pub category: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Row of `v_latest_products`: a product with its newest observations.
#[derive(Debug, Clone, Serialize)]
pub struct LatestProduct {
    pub id: i64,
    pub url: String,
    pub site: String,
    pub gender: Option<String>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub price_text: Option<String>,
    pub price_numeric: Option<f64>,
    pub colors: Vec<String>,
    pub image_url: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Row of `v_price_changes`: the two newest numeric prices differ.
#[derive(Debug, Clone, Serialize)]
pub struct PriceChange {
    pub product_id: i64,
    pub url: String,
    pub site: String,
    pub latest_price: f64,
    pub previous_price: f64,
    pub difference: f64,
    pub percent_change: f64,
}

/// One (day, site, gender) price bucket.
#[derive(Debug, Clone, Serialize)]
pub struct PriceTrendPoint {
    pub date: String,
    pub site: String,
    pub gender: Option<String>,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// Price observations in the bucket, unpriced rows included.
    pub product_count: i64,
}

/// Count of one base color within a (site, category) slice.
#[derive(Debug, Clone, Serialize)]
pub struct ColorCount {
    pub color: BaseColor,
    pub count: u64,
    pub site: String,
    pub category: String,
}

/// Average price of one base color on one day.
#[derive(Debug, Clone, Serialize)]
pub struct ColorPricePoint {
    pub date: String,
    pub color: BaseColor,
    pub avg_price: f64,
    pub count: u64,
}

/// Whole-database counters for the stats report.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_products: i64,
    pub active_products: i64,
    pub sessions: i64,
    pub price_observations: i64,
    pub color_observations: i64,
    pub last_session_at: Option<DateTime<Utc>>,
    pub active_by_site: Vec<(String, i64)>,
}

#[derive(Clone)]
pub struct AnalyticsReader {
    pool: SqlitePool,
}

impl AnalyticsReader {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Active products with their latest name, price, colors and image.
    pub async fn latest_products(&self, filter: &ProductFilter) -> Result<Vec<LatestProduct>> {
        let mut sql = String::from(
            r"
            SELECT id, product_url, site, gender, category, first_seen, last_seen,
                   name, price_text, price_numeric, colors, image_url
            FROM v_latest_products
            WHERE 1 = 1
            ",
        );
        if filter.site.is_some() {
            sql.push_str(" AND site = ?");
        }
        if filter.gender.is_some() {
            sql.push_str(" AND LOWER(gender) = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND LOWER(category) LIKE ?");
        }
        sql.push_str(" ORDER BY last_seen DESC, id ASC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(site) = filter.site {
            query = query.bind(site.as_str());
        }
        if let Some(gender) = filter.gender {
            query = query.bind(gender.as_str().to_lowercase());
        }
        if let Some(category) = &filter.category {
            query = query.bind(format!("%{}%", category.to_lowercase()));
        }
        query = query
            .bind(filter.limit.unwrap_or(50))
            .bind(filter.offset.unwrap_or(0));

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| LatestProduct {
                id: row.get("id"),
                url: row.get("product_url"),
                site: row.get("site"),
                gender: row.get("gender"),
                category: row.get("category"),
                name: row.get("name"),
                price_text: row.get("price_text"),
                price_numeric: row.get("price_numeric"),
                colors: row
                    .get::<Option<String>, _>("colors")
                    .map(split_color_labels)
                    .unwrap_or_default(),
                image_url: row.get("image_url"),
                first_seen: row.get("first_seen"),
                last_seen: row.get("last_seen"),
            })
            .collect())
    }

    /// Largest recent price movements, biggest swing first.
    pub async fn price_changes(&self, limit: i64) -> Result<Vec<PriceChange>> {
        let rows = sqlx::query(
            r"
            SELECT product_id, product_url, site, latest_price, previous_price,
                   difference, percent_change
            FROM v_price_changes
            ORDER BY ABS(percent_change) DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PriceChange {
                product_id: row.get("product_id"),
                url: row.get("product_url"),
                site: row.get("site"),
                latest_price: row.get("latest_price"),
                previous_price: row.get("previous_price"),
                difference: row.get("difference"),
                percent_change: row.get("percent_change"),
            })
            .collect())
    }

    /// Daily average/min/max price per (site, gender), active products only.
    pub async fn price_trends(
        &self,
        filter: &ProductFilter,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<PriceTrendPoint>> {
        let mut sql = String::from(
            r"
            SELECT
                DATE(ph.observed_at) AS date,
                p.site,
                p.gender,
                AVG(ph.price_numeric) AS avg_price,
                MIN(ph.price_numeric) AS min_price,
                MAX(ph.price_numeric) AS max_price,
                COUNT(*) AS product_count
            FROM price_history ph
            JOIN products p ON ph.product_id = p.id
            WHERE p.is_active = 1
            ",
        );
        if filter.site.is_some() {
            sql.push_str(" AND p.site = ?");
        }
        if filter.gender.is_some() {
            sql.push_str(" AND LOWER(p.gender) = ?");
        }
        if filter.category.is_some() {
            sql.push_str(" AND LOWER(p.category) LIKE ?");
        }
        if start_date.is_some() {
            sql.push_str(" AND DATE(ph.observed_at) >= ?");
        }
        if end_date.is_some() {
            sql.push_str(" AND DATE(ph.observed_at) <= ?");
        }
        sql.push_str(
            r"
            GROUP BY DATE(ph.observed_at), p.site, p.gender
            ORDER BY DATE(ph.observed_at), p.site, p.gender
            ",
        );

        let mut query = sqlx::query(&sql);
        if let Some(site) = filter.site {
            query = query.bind(site.as_str());
        }
        if let Some(gender) = filter.gender {
            query = query.bind(gender.as_str().to_lowercase());
        }
        if let Some(category) = &filter.category {
            query = query.bind(format!("%{}%", category.to_lowercase()));
        }
        if let Some(start) = start_date {
            query = query.bind(start.to_string());
        }
        if let Some(end) = end_date {
            query = query.bind(end.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| PriceTrendPoint {
                date: row.get("date"),
                site: row.get("site"),
                gender: row.get("gender"),
                avg_price: row.get("avg_price"),
                min_price: row.get("min_price"),
                max_price: row.get("max_price"),
                product_count: row.get("product_count"),
            })
            .collect())
    }

    /// Base-color distribution over each active product's newest color row.
    /// Every stored label counts, not just the primary one.
    pub async fn color_distribution(&self, site: Option<Site>) -> Result<Vec<ColorCount>> {
        let mut sql = String::from(
            r"
            SELECT p.site, p.category, ch.colors
            FROM products p
            JOIN color_history ch ON p.id = ch.product_id
            WHERE p.is_active = 1
              AND ch.id IN (SELECT MAX(id) FROM color_history GROUP BY product_id)
            ",
        );
        if site.is_some() {
            sql.push_str(" AND p.site = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(site) = site {
            query = query.bind(site.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut counts: HashMap<(BaseColor, String, String), u64> = HashMap::new();
        for row in rows {
            let site: String = row.get("site");
            let category: Option<String> = row.get("category");
            let category = category.unwrap_or_else(|| "unknown".to_string());
            let colors: String = row.get("colors");
            for label in split_color_labels(colors) {
                let bucket = categorize_color(&label);
                *counts
                    .entry((bucket, site.clone(), category.clone()))
                    .or_insert(0) += 1;
            }
        }

        let mut result: Vec<ColorCount> = counts
            .into_iter()
            .map(|((color, site, category), count)| ColorCount {
                color,
                count,
                site,
                category,
            })
            .collect();
        result.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(result)
    }

    /// Average price per base color per day. The primary (first stored)
    /// color represents the product; price and color rows are joined on
    /// observation day.
    pub async fn color_price_trends(
        &self,
        filter: &ProductFilter,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> Result<Vec<ColorPricePoint>> {
        let mut sql = String::from(
            r"
            SELECT
                DATE(ph.observed_at) AS date,
                ch.colors,
                ph.price_numeric
            FROM products p
            JOIN price_history ph ON p.id = ph.product_id
            JOIN color_history ch ON p.id = ch.product_id
            WHERE p.is_active = 1
              AND DATE(ph.observed_at) = DATE(ch.observed_at)
              AND ph.price_numeric IS NOT NULL
            ",
        );
        if filter.site.is_some() {
            sql.push_str(" AND p.site = ?");
        }
        if filter.gender.is_some() {
            sql.push_str(" AND LOWER(p.gender) = ?");
        }
        if start_date.is_some() {
            sql.push_str(" AND DATE(ph.observed_at) >= ?");
        }
        if end_date.is_some() {
            sql.push_str(" AND DATE(ph.observed_at) <= ?");
        }
        sql.push_str(" ORDER BY DATE(ph.observed_at)");

        let mut query = sqlx::query(&sql);
        if let Some(site) = filter.site {
            query = query.bind(site.as_str());
        }
        if let Some(gender) = filter.gender {
            query = query.bind(gender.as_str().to_lowercase());
        }
        if let Some(start) = start_date {
            query = query.bind(start.to_string());
        }
        if let Some(end) = end_date {
            query = query.bind(end.to_string());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut sums: HashMap<(String, BaseColor), (f64, u64)> = HashMap::new();
        for row in rows {
            let date: String = row.get("date");
            let price: f64 = row.get("price_numeric");
            let colors: String = row.get("colors");
            let Some(primary) = split_color_labels(colors).into_iter().next() else {
                continue;
            };
            let bucket = categorize_color(&primary);
            let entry = sums.entry((date, bucket)).or_insert((0.0, 0));
            entry.0 += price;
            entry.1 += 1;
        }

        let mut result: Vec<ColorPricePoint> = sums
            .into_iter()
            .map(|((date, color), (total, count))| ColorPricePoint {
                date,
                color,
                avg_price: (total / count as f64 * 100.0).round() / 100.0,
                count,
            })
            .collect();
        result.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| b.count.cmp(&a.count)));
        Ok(result)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let scalar = |sql: &'static str| {
            let pool = self.pool.clone();
            async move {
                let row = sqlx::query(sql).fetch_one(&pool).await?;
                Ok::<i64, anyhow::Error>(row.get("n"))
            }
        };

        let total_products = scalar("SELECT COUNT(*) AS n FROM products").await?;
        let active_products =
            scalar("SELECT COUNT(*) AS n FROM products WHERE is_active = 1").await?;
        let sessions = scalar("SELECT COUNT(*) AS n FROM scraping_sessions").await?;
        let price_observations = scalar("SELECT COUNT(*) AS n FROM price_history").await?;
        let color_observations = scalar("SELECT COUNT(*) AS n FROM color_history").await?;

        let last_session_at = sqlx::query(
            "SELECT started_at FROM scraping_sessions ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .map(|row| row.get("started_at"));

        let by_site_rows = sqlx::query(
            r"
            SELECT site, COUNT(*) AS n
            FROM products
            WHERE is_active = 1
            GROUP BY site
            ORDER BY site
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        let active_by_site = by_site_rows
            .into_iter()
            .map(|row| (row.get("site"), row.get("n")))
            .collect();

        Ok(StoreStats {
            total_products,
            active_products,
            sessions,
            price_observations,
            color_observations,
            last_session_at,
            active_by_site,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use crate::infrastructure::repository::ProductRepository;
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn seeded(dir: &tempfile::TempDir) -> Result<(ProductRepository, AnalyticsReader)> {
        let db = DatabaseConnection::new(&dir.path().join("analytics.db")).await?;
        db.migrate().await?;
        let pool = db.pool().clone();
        Ok((
            ProductRepository::new(Arc::new(pool.clone())),
            AnalyticsReader::new(pool),
        ))
    }

    #[tokio::test]
    async fn latest_products_reflect_newest_observations() -> Result<()> {
        let dir = tempdir()?;
        let (repo, reader) = seeded(&dir).await?;

        let t0 = Utc::now();
        let t1 = t0 + Duration::days(1);
        let session0 = repo.create_session(t0, None).await?;
        let session1 = repo.create_session(t1, None).await?;

        let id = repo
            .upsert_product("https://fashionbug.lk/products/p", Site::FashionBug, Gender::Women, "Dress", t0)
            .await?;
        repo.append_name(id, session0, "Floral Dress", t0).await?;
        repo.append_price(id, session0, "Rs 2,500.00", Some(2500.0), "Rs", t0).await?;
        repo.upsert_product("https://fashionbug.lk/products/p", Site::FashionBug, Gender::Women, "Dress", t1)
            .await?;
        repo.append_price(id, session1, "Rs 1,990.00", Some(1990.0), "Rs", t1).await?;
        repo.append_colors(id, session1, &["Red".to_string()], t1).await?;

        let products = reader.latest_products(&ProductFilter::default()).await?;
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name.as_deref(), Some("Floral Dress"));
        assert_eq!(products[0].price_numeric, Some(1990.0));
        assert_eq!(products[0].colors, vec!["Red".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn price_changes_catch_two_run_differences() -> Result<()> {
        let dir = tempdir()?;
        let (repo, reader) = seeded(&dir).await?;

        let t0 = Utc::now();
        let t1 = t0 + Duration::days(1);
        let session0 = repo.create_session(t0, None).await?;
        let session1 = repo.create_session(t1, None).await?;

        let moved = repo
            .upsert_product("https://coolplanet.lk/products/m", Site::CoolPlanet, Gender::Men, "Shirt", t0)
            .await?;
        repo.append_price(moved, session0, "Rs 2,000.00", Some(2000.0), "Rs", t0).await?;
        repo.append_price(moved, session1, "Rs 1,500.00", Some(1500.0), "Rs", t1).await?;

        let flat = repo
            .upsert_product("https://coolplanet.lk/products/f", Site::CoolPlanet, Gender::Men, "Shirt", t0)
            .await?;
        repo.append_price(flat, session0, "Rs 900.00", Some(900.0), "Rs", t0).await?;
        repo.append_price(flat, session1, "Rs 900.00", Some(900.0), "Rs", t1).await?;

        let changes = reader.price_changes(10).await?;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].product_id, moved);
        assert_eq!(changes[0].latest_price, 1500.0);
        assert_eq!(changes[0].previous_price, 2000.0);
        assert_eq!(changes[0].difference, -500.0);
        assert_eq!(changes[0].percent_change, -25.0);
        Ok(())
    }

    #[tokio::test]
    async fn color_distribution_buckets_stored_labels() -> Result<()> {
        let dir = tempdir()?;
        let (repo, reader) = seeded(&dir).await?;

        let t0 = Utc::now();
        let session = repo.create_session(t0, None).await?;

        let a = repo
            .upsert_product("https://fashionbug.lk/products/a", Site::FashionBug, Gender::Women, "Dress", t0)
            .await?;
        repo.append_colors(a, session, &["Navy Blue".to_string(), "Jet Black".to_string()], t0)
            .await?;
        let b = repo
            .upsert_product("https://fashionbug.lk/products/b", Site::FashionBug, Gender::Women, "Dress", t0)
            .await?;
        repo.append_colors(b, session, &["Crimson".to_string()], t0).await?;

        let counts = reader.color_distribution(None).await?;
        let find = |color: BaseColor| counts.iter().find(|c| c.color == color).map(|c| c.count);
        assert_eq!(find(BaseColor::Blue), Some(1));
        assert_eq!(find(BaseColor::Black), Some(1));
        assert_eq!(find(BaseColor::Red), Some(1));
        Ok(())
    }

    #[tokio::test]
    async fn price_trends_bucket_by_day_site_gender() -> Result<()> {
        let dir = tempdir()?;
        let (repo, reader) = seeded(&dir).await?;

        let t0 = Utc::now();
        let session = repo.create_session(t0, None).await?;
        for (url, price) in [("https://fashionbug.lk/products/t1", 1000.0), ("https://fashionbug.lk/products/t2", 3000.0)] {
            let id = repo
                .upsert_product(url, Site::FashionBug, Gender::Women, "Dress", t0)
                .await?;
            repo.append_price(id, session, "x", Some(price), "Rs", t0).await?;
        }

        let trends = reader
            .price_trends(&ProductFilter::default(), None, None)
            .await?;
        assert_eq!(trends.len(), 1);
        assert_eq!(trends[0].avg_price, Some(2000.0));
        assert_eq!(trends[0].min_price, Some(1000.0));
        assert_eq!(trends[0].max_price, Some(3000.0));
        assert_eq!(trends[0].product_count, 2);
        assert_eq!(trends[0].site, "Fashion Bug");
        Ok(())
    }
}
