//! Pooled SQLite connection + embedded schema (§6).
//!
//! The schema below is written to be portable across any upsert-capable
//! SQL engine (spec.md treats the store as "any engine supporting
//! upserts"); SQLite is used here for a self-contained, test-friendly
//! default, following the teacher's own `signals::db_storage` pattern
//! of an embedded `SCHEMA_SQL` constant executed at startup.

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS products (
    internal_code TEXT PRIMARY KEY,
    external_sku TEXT,
    link TEXT NOT NULL,
    name TEXT NOT NULL,
    brand TEXT,
    category TEXT,
    retailer TEXT NOT NULL,
    storage TEXT,
    ram TEXT,
    color TEXT,
    screen TEXT,
    camera TEXT,
    rating REAL,
    reviews_count INTEGER,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_products_retailer ON products(retailer);
CREATE UNIQUE INDEX IF NOT EXISTS idx_products_identity
    ON products(retailer, external_sku, link);

CREATE TABLE IF NOT EXISTS prices (
    internal_code TEXT NOT NULL REFERENCES products(internal_code),
    date TEXT NOT NULL,
    retailer TEXT NOT NULL,
    price_list REAL,
    price_offer REAL,
    price_card REAL,
    price_min REAL NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(internal_code, date),
    CHECK (price_offer IS NULL OR price_list IS NULL OR price_offer <= price_list)
);

CREATE INDEX IF NOT EXISTS idx_prices_code_date ON prices(internal_code, date DESC);

CREATE TABLE IF NOT EXISTS product_matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code_a TEXT NOT NULL,
    code_b TEXT NOT NULL,
    similarity_score REAL NOT NULL,
    match_type TEXT NOT NULL,
    confidence TEXT NOT NULL,
    features TEXT NOT NULL,
    ml_version TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(code_a, code_b)
);

CREATE INDEX IF NOT EXISTS idx_matches_active ON product_matches(active, similarity_score DESC);

CREATE TABLE IF NOT EXISTS arbitrage_opportunities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cheap_code TEXT NOT NULL,
    expensive_code TEXT NOT NULL,
    match_id INTEGER,
    buy_retailer TEXT NOT NULL,
    sell_retailer TEXT NOT NULL,
    buy_price REAL NOT NULL,
    sell_price REAL NOT NULL,
    margin_abs REAL NOT NULL,
    margin_pct REAL NOT NULL,
    roi REAL NOT NULL,
    opportunity_score REAL NOT NULL,
    confidence_score REAL NOT NULL,
    risk_level TEXT NOT NULL,
    tier TEXT NOT NULL,
    detected_at TEXT NOT NULL,
    detected_date TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    alerted INTEGER NOT NULL DEFAULT 0,
    metadata TEXT,
    UNIQUE(cheap_code, expensive_code, detected_date)
);

CREATE INDEX IF NOT EXISTS idx_opps_tier ON arbitrage_opportunities(tier, detected_at DESC);

CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    type TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS metrics (
    date TEXT NOT NULL,
    hour INTEGER NOT NULL,
    opportunities_detected INTEGER NOT NULL DEFAULT 0,
    opportunities_valid INTEGER NOT NULL DEFAULT 0,
    total_margin REAL NOT NULL DEFAULT 0,
    avg_roi REAL NOT NULL DEFAULT 0,
    avg_processing_ms REAL NOT NULL DEFAULT 0,
    retailer_performance TEXT,
    UNIQUE(date, hour)
);
"#;

/// Build a pooled connection manager bounded per spec.md §5 (2-20
/// connections) and run the embedded schema against it.
pub fn open_pool(database_path: &str, max_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(database_path);
    let pool = Pool::builder()
        .min_idle(Some(2))
        .max_size(max_size.clamp(2, 20))
        .build(manager)
        .context("failed to build sqlite connection pool")?;

    let conn = pool.get().context("failed to acquire init connection")?;
    conn.execute_batch(SCHEMA_SQL)
        .context("failed to apply schema")?;
    Ok(pool)
}

/// An in-memory pool for tests: a single connection, schema applied.
#[cfg(test)]
pub fn open_test_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .context("failed to build in-memory sqlite pool")?;
    let conn = pool.get()?;
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 6);
    }

    #[test]
    fn price_offer_gt_list_is_rejected_by_check_constraint() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO products(internal_code, link, name, retailer, first_seen, last_seen, active)
             VALUES ('FAL0000001', 'x', 'n', 'falabella', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 1)",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO prices(internal_code, date, retailer, price_list, price_offer, price_min, created_at, updated_at)
             VALUES ('FAL0000001', '2026-01-01', 'falabella', 100.0, 200.0, 100.0, '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            [],
        );
        assert!(result.is_err());
    }
}
