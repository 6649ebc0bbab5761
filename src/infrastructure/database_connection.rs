// Database connection and pool management.
// Owns the SQLite schema: core tables, history tables, indexes and the
// two reporting views.

use std::path::Path;

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};

pub struct DatabaseConnection {
    pool: SqlitePool,
}

impl DatabaseConnection {
    /// Open (creating if needed) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if !path.exists() {
            std::fs::File::create(path)?;
        }

        let database_url = format!("sqlite:{}", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the schema. Idempotent; every statement is IF NOT EXISTS.
    pub async fn migrate(&self) -> Result<()> {
        let tables = [
            r#"
            CREATE TABLE IF NOT EXISTS scraping_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_products INTEGER NOT NULL DEFAULT 0,
                notes TEXT
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_url TEXT NOT NULL UNIQUE,
                site TEXT NOT NULL,
                gender TEXT,
                category TEXT,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS name_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products (id),
                session_id INTEGER NOT NULL REFERENCES scraping_sessions (id),
                name TEXT NOT NULL,
                observed_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS price_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products (id),
                session_id INTEGER NOT NULL REFERENCES scraping_sessions (id),
                price_text TEXT NOT NULL,
                price_numeric REAL,
                currency TEXT NOT NULL DEFAULT 'Rs',
                observed_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS color_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products (id),
                session_id INTEGER NOT NULL REFERENCES scraping_sessions (id),
                colors TEXT NOT NULL,
                observed_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS image_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_id INTEGER NOT NULL REFERENCES products (id),
                session_id INTEGER NOT NULL REFERENCES scraping_sessions (id),
                image_url TEXT NOT NULL,
                observed_at TEXT NOT NULL
            )
            "#,
        ];

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_products_site ON products (site)",
            "CREATE INDEX IF NOT EXISTS idx_products_last_seen ON products (last_seen)",
            "CREATE INDEX IF NOT EXISTS idx_name_history_product ON name_history (product_id, observed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_price_history_product ON price_history (product_id, observed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_color_history_product ON color_history (product_id, observed_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_image_history_product ON image_history (product_id, observed_at DESC)",
        ];

        // Latest observation per product, active listings only.
        let latest_products_view = r#"
            CREATE VIEW IF NOT EXISTS v_latest_products AS
            SELECT
                p.id,
                p.product_url,
                p.site,
                p.gender,
                p.category,
                p.first_seen,
                p.last_seen,
                (SELECT n.name FROM name_history n
                 WHERE n.product_id = p.id
                 ORDER BY n.observed_at DESC, n.id DESC LIMIT 1) AS name,
                (SELECT ph.price_text FROM price_history ph
                 WHERE ph.product_id = p.id
                 ORDER BY ph.observed_at DESC, ph.id DESC LIMIT 1) AS price_text,
                (SELECT ph.price_numeric FROM price_history ph
                 WHERE ph.product_id = p.id
                 ORDER BY ph.observed_at DESC, ph.id DESC LIMIT 1) AS price_numeric,
                (SELECT ch.colors FROM color_history ch
                 WHERE ch.product_id = p.id
                 ORDER BY ch.observed_at DESC, ch.id DESC LIMIT 1) AS colors,
                (SELECT ih.image_url FROM image_history ih
                 WHERE ih.product_id = p.id
                 ORDER BY ih.observed_at DESC, ih.id DESC LIMIT 1) AS image_url
            FROM products p
            WHERE p.is_active = 1
        "#;

        // Products whose two most recent numeric prices differ.
        let price_changes_view = r#"
            CREATE VIEW IF NOT EXISTS v_price_changes AS
            SELECT
                product_id,
                product_url,
                site,
                gender,
                category,
                latest_price,
                previous_price,
                latest_price - previous_price AS difference,
                ROUND((latest_price - previous_price) * 100.0 / previous_price, 2) AS percent_change
            FROM (
                SELECT
                    p.id AS product_id,
                    p.product_url,
                    p.site,
                    p.gender,
                    p.category,
                    (SELECT ph1.price_numeric FROM price_history ph1
                     WHERE ph1.product_id = p.id AND ph1.price_numeric IS NOT NULL
                     ORDER BY ph1.observed_at DESC, ph1.id DESC LIMIT 1) AS latest_price,
                    (SELECT ph2.price_numeric FROM price_history ph2
                     WHERE ph2.product_id = p.id AND ph2.price_numeric IS NOT NULL
                     ORDER BY ph2.observed_at DESC, ph2.id DESC LIMIT 1 OFFSET 1) AS previous_price
                FROM products p
            )
            WHERE latest_price IS NOT NULL
              AND previous_price IS NOT NULL
              AND latest_price != previous_price
        "#;

        for sql in tables {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        for sql in indexes {
            sqlx::query(sql).execute(&self.pool).await?;
        }
        sqlx::query(latest_products_view).execute(&self.pool).await?;
        sqlx::query(price_changes_view).execute(&self.pool).await?;

        Ok(())
    }
}
