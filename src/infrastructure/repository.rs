//! Product repository: session bookkeeping, the upsert-plus-history write
//! model, and scoped active-flag reconciliation.
//!
//! Writes follow one rule: `products` rows are identities keyed by URL and
//! are only ever upserted, while every observation lands as a new row in an
//! append-only history table. Nothing here deletes.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::entities::{
    CategoryScope, Gender, PriceRecord, Product, ScrapeSession, Site,
};

/// Outcome of one scoped reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub deactivated: u64,
    pub reactivated: u64,
}

#[derive(Clone)]
pub struct ProductRepository {
    pool: Arc<SqlitePool>,
}

impl ProductRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ---- sessions ----

    pub async fn create_session(
        &self,
        started_at: DateTime<Utc>,
        notes: Option<&str>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO scraping_sessions (started_at, notes) VALUES (?, ?)",
        )
        .bind(started_at)
        .bind(notes)
        .execute(&*self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn complete_session(
        &self,
        session_id: i64,
        completed_at: DateTime<Utc>,
        total_products: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scraping_sessions SET completed_at = ?, total_products = ? WHERE id = ?",
        )
        .bind(completed_at)
        .bind(total_products)
        .bind(session_id)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_sessions(&self, limit: i64) -> Result<Vec<ScrapeSession>> {
        let rows = sqlx::query(
            r"
            SELECT id, started_at, completed_at, total_products, notes
            FROM scraping_sessions
            ORDER BY started_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ScrapeSession {
                id: row.get("id"),
                started_at: row.get("started_at"),
                completed_at: row.get("completed_at"),
                total_products: row.get("total_products"),
                notes: row.get("notes"),
            })
            .collect())
    }

    // ---- products ----

    /// Insert the product on first sight, else refresh `last_seen` and the
    /// category labels. Never touches `first_seen` or `is_active` on update;
    /// the active flag belongs to reconciliation alone.
    pub async fn upsert_product(
        &self,
        url: &str,
        site: Site,
        gender: Gender,
        category: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<i64> {
        let row = sqlx::query(
            r"
            INSERT INTO products (product_url, site, gender, category, first_seen, last_seen)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (product_url) DO UPDATE SET
                last_seen = excluded.last_seen,
                gender = excluded.gender,
                category = excluded.category
            RETURNING id
            ",
        )
        .bind(url)
        .bind(site.as_str())
        .bind(gender.as_str())
        .bind(category)
        .bind(observed_at)
        .bind(observed_at)
        .fetch_one(&*self.pool)
        .await?;
        Ok(row.get("id"))
    }

    pub async fn find_by_url(&self, url: &str) -> Result<Option<Product>> {
        let row = sqlx::query(
            r"
            SELECT id, product_url, site, gender, category, first_seen, last_seen, is_active
            FROM products
            WHERE product_url = ?
            ",
        )
        .bind(url)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| Product {
            id: row.get("id"),
            url: row.get("product_url"),
            site: row.get("site"),
            gender: row.get("gender"),
            category: row.get("category"),
            first_seen: row.get("first_seen"),
            last_seen: row.get("last_seen"),
            is_active: row.get("is_active"),
        }))
    }

    pub async fn count_products(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM products")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("n"))
    }

    pub async fn count_active(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM products WHERE is_active = 1")
            .fetch_one(&*self.pool)
            .await?;
        Ok(row.get("n"))
    }

    // ---- history appends ----

    pub async fn append_name(
        &self,
        product_id: i64,
        session_id: i64,
        name: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO name_history (product_id, session_id, name, observed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(session_id)
        .bind(name)
        .bind(observed_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_price(
        &self,
        product_id: i64,
        session_id: i64,
        price_text: &str,
        price_numeric: Option<f64>,
        currency: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO price_history (product_id, session_id, price_text, price_numeric, currency, observed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(product_id)
        .bind(session_id)
        .bind(price_text)
        .bind(price_numeric)
        .bind(currency)
        .bind(observed_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    /// Stores the labels comma-joined, primary color first.
    pub async fn append_colors(
        &self,
        product_id: i64,
        session_id: i64,
        colors: &[String],
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO color_history (product_id, session_id, colors, observed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(session_id)
        .bind(colors.join(", "))
        .bind(observed_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_image(
        &self,
        product_id: i64,
        session_id: i64,
        image_url: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO image_history (product_id, session_id, image_url, observed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(session_id)
        .bind(image_url)
        .bind(observed_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    // ---- history reads ----

    pub async fn price_history(&self, product_id: i64) -> Result<Vec<PriceRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, product_id, session_id, price_text, price_numeric, currency, observed_at
            FROM price_history
            WHERE product_id = ?
            ORDER BY observed_at DESC, id DESC
            ",
        )
        .bind(product_id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| PriceRecord {
                id: row.get("id"),
                product_id: row.get("product_id"),
                session_id: row.get("session_id"),
                price_text: row.get("price_text"),
                price_numeric: row.get("price_numeric"),
                currency: row.get("currency"),
                observed_at: row.get("observed_at"),
            })
            .collect())
    }

    pub async fn latest_colors(&self, product_id: i64) -> Result<Option<Vec<String>>> {
        let row = sqlx::query(
            r"
            SELECT colors FROM color_history
            WHERE product_id = ?
            ORDER BY observed_at DESC, id DESC
            LIMIT 1
            ",
        )
        .bind(product_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(row.map(|row| split_color_labels(row.get("colors"))))
    }

    // ---- reconciliation ----

    /// Scoped active-flag reconciliation for one category.
    ///
    /// Products inside the (site, gender, category) scope whose `last_seen`
    /// predates `seen_since` are deactivated; previously inactive products
    /// seen again this run are reactivated. Products outside the scope are
    /// never touched, so a category whose scrape failed keeps its flags.
    pub async fn reconcile_active(
        &self,
        scope: &CategoryScope,
        seen_since: DateTime<Utc>,
    ) -> Result<ReconcileCounts> {
        let deactivated = sqlx::query(
            r"
            UPDATE products SET is_active = 0
            WHERE site = ? AND gender = ? AND category = ?
              AND is_active = 1 AND last_seen < ?
            ",
        )
        .bind(scope.site.as_str())
        .bind(scope.gender.as_str())
        .bind(scope.category.as_str())
        .bind(seen_since)
        .execute(&*self.pool)
        .await?
        .rows_affected();

        let reactivated = sqlx::query(
            r"
            UPDATE products SET is_active = 1
            WHERE site = ? AND gender = ? AND category = ?
              AND is_active = 0 AND last_seen >= ?
            ",
        )
        .bind(scope.site.as_str())
        .bind(scope.gender.as_str())
        .bind(scope.category.as_str())
        .bind(seen_since)
        .execute(&*self.pool)
        .await?
        .rows_affected();

        Ok(ReconcileCounts {
            deactivated,
            reactivated,
        })
    }
}

/// Inverse of the comma-join used by `append_colors`.
pub fn split_color_labels(stored: String) -> Vec<String> {
    stored
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::database_connection::DatabaseConnection;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn test_repo(dir: &tempfile::TempDir) -> Result<ProductRepository> {
        let db = DatabaseConnection::new(&dir.path().join("repo.db")).await?;
        db.migrate().await?;
        Ok(ProductRepository::new(Arc::new(db.pool().clone())))
    }

    fn scope() -> CategoryScope {
        CategoryScope::new(Site::FashionBug, Gender::Women, "Dress")
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_url() -> Result<()> {
        let dir = tempdir()?;
        let repo = test_repo(&dir).await?;

        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);

        let id_a = repo
            .upsert_product("https://fashionbug.lk/products/a", Site::FashionBug, Gender::Women, "Dress", t0)
            .await?;
        let id_b = repo
            .upsert_product("https://fashionbug.lk/products/a", Site::FashionBug, Gender::Women, "Dress", t1)
            .await?;

        assert_eq!(id_a, id_b);
        assert_eq!(repo.count_products().await?, 1);

        let product = repo
            .find_by_url("https://fashionbug.lk/products/a")
            .await?
            .unwrap();
        assert_eq!(product.first_seen, t0);
        assert_eq!(product.last_seen, t1);
        assert!(product.is_active);
        Ok(())
    }

    #[tokio::test]
    async fn price_history_is_append_only() -> Result<()> {
        let dir = tempdir()?;
        let repo = test_repo(&dir).await?;

        let t0 = Utc::now();
        let session = repo.create_session(t0, None).await?;
        let id = repo
            .upsert_product("https://coolplanet.lk/products/x", Site::CoolPlanet, Gender::Men, "Shirt", t0)
            .await?;

        repo.append_price(id, session, "Rs 1,990.00", Some(1990.0), "Rs", t0).await?;
        repo.append_price(id, session, "Rs 1,490.00", Some(1490.0), "Rs", t0 + Duration::days(1))
            .await?;

        let history = repo.price_history(id).await?;
        assert_eq!(history.len(), 2);
        // Newest first.
        assert_eq!(history[0].price_numeric, Some(1490.0));
        assert_eq!(history[1].price_numeric, Some(1990.0));
        Ok(())
    }

    #[tokio::test]
    async fn colors_roundtrip_through_comma_join() -> Result<()> {
        let dir = tempdir()?;
        let repo = test_repo(&dir).await?;

        let t0 = Utc::now();
        let session = repo.create_session(t0, None).await?;
        let id = repo
            .upsert_product("https://fashionbug.lk/products/c", Site::FashionBug, Gender::Women, "Blouse", t0)
            .await?;

        repo.append_colors(id, session, &["Blue".to_string(), "Black".to_string()], t0)
            .await?;

        assert_eq!(
            repo.latest_colors(id).await?,
            Some(vec!["Blue".to_string(), "Black".to_string()])
        );
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_only_touches_the_scope() -> Result<()> {
        let dir = tempdir()?;
        let repo = test_repo(&dir).await?;

        let run1 = Utc::now();
        let run2 = run1 + Duration::days(1);

        // Two dresses and one skirt observed in run 1.
        repo.upsert_product("https://fashionbug.lk/products/d1", Site::FashionBug, Gender::Women, "Dress", run1)
            .await?;
        repo.upsert_product("https://fashionbug.lk/products/d2", Site::FashionBug, Gender::Women, "Dress", run1)
            .await?;
        repo.upsert_product("https://fashionbug.lk/products/s1", Site::FashionBug, Gender::Women, "Skirt", run1)
            .await?;

        // Run 2 sees only d1; the skirt category was not reconciled (its
        // scrape failed), so s1 must stay active.
        repo.upsert_product("https://fashionbug.lk/products/d1", Site::FashionBug, Gender::Women, "Dress", run2)
            .await?;
        let counts = repo.reconcile_active(&scope(), run2).await?;
        assert_eq!(counts.deactivated, 1);
        assert_eq!(counts.reactivated, 0);

        assert!(repo.find_by_url("https://fashionbug.lk/products/d1").await?.unwrap().is_active);
        assert!(!repo.find_by_url("https://fashionbug.lk/products/d2").await?.unwrap().is_active);
        assert!(repo.find_by_url("https://fashionbug.lk/products/s1").await?.unwrap().is_active);
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_reactivates_reseen_products() -> Result<()> {
        let dir = tempdir()?;
        let repo = test_repo(&dir).await?;

        let run1 = Utc::now();
        let run2 = run1 + Duration::days(1);
        let run3 = run2 + Duration::days(1);

        repo.upsert_product("https://fashionbug.lk/products/d9", Site::FashionBug, Gender::Women, "Dress", run1)
            .await?;

        // Absent in run 2, back in run 3.
        let counts = repo.reconcile_active(&scope(), run2).await?;
        assert_eq!(counts.deactivated, 1);

        repo.upsert_product("https://fashionbug.lk/products/d9", Site::FashionBug, Gender::Women, "Dress", run3)
            .await?;
        let counts = repo.reconcile_active(&scope(), run3).await?;
        assert_eq!(counts.reactivated, 1);

        assert!(repo.find_by_url("https://fashionbug.lk/products/d9").await?.unwrap().is_active);
        Ok(())
    }

    #[tokio::test]
    async fn session_lifecycle_roundtrips() -> Result<()> {
        let dir = tempdir()?;
        let repo = test_repo(&dir).await?;

        let started = Utc::now();
        let id = repo.create_session(started, Some("nightly")).await?;
        repo.complete_session(id, started + Duration::minutes(5), 42).await?;

        let sessions = repo.recent_sessions(10).await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, id);
        assert_eq!(sessions[0].total_products, 42);
        assert_eq!(sessions[0].notes.as_deref(), Some("nightly"));
        assert!(sessions[0].completed_at.is_some());
        Ok(())
    }
}
