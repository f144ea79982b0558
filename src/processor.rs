//! Product Processor (§4.3).
//!
//! Validates, assigns a SKU, batches, and flushes raw retailer records
//! into the `products`/`prices` tables. Batch accumulation and flush
//! follow the transactional batch-insert shape of the teacher's
//! `signals::db_storage` writer, generalized from a single `signals`
//! table to the products+prices pair.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::alerts::{AlertSender, DispatchEvent};
use crate::db::DbPool;
use crate::ledger::PriceLedger;
use crate::models::{Retailer, RawProductRecord};
use crate::sku::SkuGenerator;

const JUNK_TOKENS: [&str; 4] = ["n/a", "na", "null", "none"];
const JUNK_NAME_SUBSTRINGS: [&str; 8] = [
    "error",
    "undefined",
    "null",
    "empty",
    "producto sin nombre",
    "sin título",
    "loading",
    "cargando",
];
const MIN_NAME_LEN: usize = 3;
const MAX_ERROR_LOG: usize = 200;

#[derive(Debug, Clone)]
struct QueuedRecord {
    internal_code: String,
    record: RawProductRecord,
    current_price: Option<f64>,
    original_price: Option<f64>,
    price_card: Option<f64>,
}

#[derive(Debug, Default, Clone)]
pub struct ProcessorStats {
    pub accepted: u64,
    pub rejected: u64,
    pub flushed_batches: u64,
    pub flush_errors: u64,
}

pub struct ProductProcessor {
    pool: DbPool,
    sku_gen: Arc<SkuGenerator>,
    ledger: PriceLedger,
    batch_size: usize,
    alert_tx: Option<AlertSender>,

    batch: Mutex<Vec<QueuedRecord>>,
    known_codes: Mutex<HashSet<String>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
    flushed_batches: AtomicU64,
    flush_errors: AtomicU64,
    errors: Mutex<VecDeque<String>>,
}

impl ProductProcessor {
    pub fn new(
        pool: DbPool,
        sku_gen: Arc<SkuGenerator>,
        ledger: PriceLedger,
        batch_size: usize,
        alert_tx: Option<AlertSender>,
    ) -> Self {
        Self {
            pool,
            sku_gen,
            ledger,
            batch_size,
            alert_tx,
            batch: Mutex::new(Vec::new()),
            known_codes: Mutex::new(HashSet::new()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            flushed_batches: AtomicU64::new(0),
            flush_errors: AtomicU64::new(0),
            errors: Mutex::new(VecDeque::new()),
        }
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            flushed_batches: self.flushed_batches.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
        }
    }

    /// Validate, assign a SKU, and enqueue a raw record. Flushes the
    /// batch (blocking the caller) when it reaches `batch_size`, per
    /// the backpressure rule in §5: there is no unbounded queue.
    pub fn process(&self, record: RawProductRecord) -> anyhow::Result<()> {
        if let Err(reason) = validate(&record) {
            debug!(reason, name = %record.name, "rejected record by anti-junk validation");
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let original_price = parse_price(record.original_price_raw.as_deref());
        let current_price = parse_price(record.current_price_raw.as_deref());
        let price_card = parse_price(record.price_card_raw.as_deref());

        if let Some(p) = current_price {
            if p < 0.0 {
                debug!(name = %record.name, "rejected record: negative current price");
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        let internal_code = self.sku_gen.generate(
            record.retailer,
            record.external_sku.as_deref(),
            &record.link,
            &record.name,
            record.brand.as_deref(),
        )?;

        self.accepted.fetch_add(1, Ordering::Relaxed);

        let should_flush = {
            let mut batch = self.batch.lock();
            batch.push(QueuedRecord {
                internal_code,
                record,
                current_price,
                original_price,
                price_card,
            });
            batch.len() >= self.batch_size
        };

        if should_flush {
            self.flush()?;
        }

        Ok(())
    }

    /// Flush the accumulated batch in one transaction: classify SKU
    /// existence, insert new products (`ON CONFLICT DO NOTHING`),
    /// update mutable fields on existing ones, then upsert price
    /// records. Any DB error rolls back the whole batch; the batch is
    /// then dropped (best-effort, not durably re-queued) per §4.3.
    pub fn flush(&self) -> anyhow::Result<()> {
        let queued = {
            let mut batch = self.batch.lock();
            std::mem::take(&mut *batch)
        };
        if queued.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let now = Utc::now();
        let local_now = now.with_timezone(&chrono::Local);

        let result: anyhow::Result<Vec<crate::models::PriceChangeEvent>> = (|| {
            let mut events = Vec::new();
            for item in &queued {
                self.upsert_product(&tx, item, now)?;
                let changes = self.ledger.write(
                    &tx,
                    &item.internal_code,
                    item.record.retailer,
                    local_now.date_naive(),
                    local_now,
                    item.original_price,
                    item.current_price,
                    item.price_card,
                )?;
                events.extend(changes);
            }
            Ok(events)
        })();

        match result {
            Ok(events) => {
                tx.commit()?;
                self.flushed_batches.fetch_add(1, Ordering::Relaxed);
                info!(count = queued.len(), "flushed product batch");
                if let Some(tx_chan) = &self.alert_tx {
                    for e in events {
                        let _ = tx_chan.send(DispatchEvent::PriceChange(e));
                    }
                }
                let mut known = self.known_codes.lock();
                for item in &queued {
                    known.insert(item.internal_code.clone());
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "batch flush failed, rolling back and dropping batch");
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
                let mut errors = self.errors.lock();
                if errors.len() >= MAX_ERROR_LOG {
                    errors.pop_front();
                }
                errors.push_back(e.to_string());
                Ok(())
            }
        }
    }

    fn upsert_product(
        &self,
        conn: &Connection,
        item: &QueuedRecord,
        now: chrono::DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let r = &item.record;
        conn.execute(
            "INSERT INTO products
                (internal_code, external_sku, link, name, brand, category, retailer,
                 storage, ram, color, screen, camera, rating, reviews_count,
                 first_seen, last_seen, active)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?15,1)
             ON CONFLICT(internal_code) DO UPDATE SET
                last_seen = excluded.last_seen,
                rating = excluded.rating,
                reviews_count = excluded.reviews_count,
                active = 1",
            params![
                item.internal_code,
                r.external_sku,
                r.link,
                r.name,
                r.brand,
                r.category,
                r.retailer.as_str(),
                r.storage,
                r.ram,
                r.color,
                r.screen,
                r.camera,
                r.rating,
                r.reviews_count,
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn known_code_count(&self) -> usize {
        self.known_codes.lock().len()
    }

    pub fn recent_errors(&self) -> Vec<String> {
        self.errors.lock().iter().cloned().collect()
    }
}

impl Drop for ProductProcessor {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush batch on processor close");
        }
    }
}

fn is_junk_token(value: &str) -> bool {
    JUNK_TOKENS.contains(&value.trim().to_lowercase().as_str())
}

fn parse_price(raw: Option<&str>) -> Option<f64> {
    let raw = raw?;
    if is_junk_token(raw) {
        return None;
    }
    raw.trim()
        .replace(['$', '.', ' '], "")
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| *v > 0.0)
}

fn validate(record: &RawProductRecord) -> Result<(), &'static str> {
    let name = record.name.trim();
    if name.is_empty() || is_junk_token(name) {
        return Err("junk name token");
    }
    if name.chars().count() < MIN_NAME_LEN {
        return Err("name too short");
    }
    let lower_name = name.to_lowercase();
    if JUNK_NAME_SUBSTRINGS.iter().any(|s| lower_name.contains(s)) {
        return Err("name contains junk substring");
    }
    for raw in [
        &record.current_price_raw,
        &record.original_price_raw,
        &record.price_card_raw,
    ] {
        if let Some(v) = raw {
            if is_junk_token(v) {
                return Err("junk price token");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_pool;

    fn record(name: &str) -> RawProductRecord {
        RawProductRecord {
            retailer: Retailer::Falabella,
            external_sku: Some("SKU1".into()),
            link: "https://falabella.com/p/1".into(),
            name: name.into(),
            brand: Some("Apple".into()),
            category: Some("Celulares".into()),
            storage: None,
            ram: None,
            color: None,
            screen: None,
            camera: None,
            rating: None,
            reviews_count: None,
            original_price_raw: Some("100000".into()),
            current_price_raw: Some("90000".into()),
            price_card_raw: None,
        }
    }

    #[test]
    fn rejects_na_and_short_names() {
        assert!(validate(&record("N/A")).is_err());
        assert!(validate(&record("AB")).is_err());
        assert!(validate(&record("Loading...")).is_err());
        assert!(validate(&record("iPhone")).is_ok());
    }

    #[test]
    fn rejects_junk_price_tokens() {
        let mut r = record("iPhone 15");
        r.current_price_raw = Some("N/A".into());
        assert!(validate(&r).is_err());
    }

    #[test]
    fn process_accepts_and_flushes_on_batch_size() {
        let pool = open_test_pool().unwrap();
        let sku_gen = Arc::new(SkuGenerator::new());
        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let processor = ProductProcessor::new(pool.clone(), sku_gen, ledger, 2, None);

        processor.process(record("iPhone 15")).unwrap();
        assert_eq!(processor.stats().accepted, 1);
        assert_eq!(processor.stats().flushed_batches, 0);

        let mut second = record("iPhone 15 Pro");
        second.link = "https://falabella.com/p/2".into();
        second.external_sku = Some("SKU2".into());
        processor.process(second).unwrap();

        assert_eq!(processor.stats().flushed_batches, 1);

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM products", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn duplicate_raw_record_is_idempotent() {
        let pool = open_test_pool().unwrap();
        let sku_gen = Arc::new(SkuGenerator::new());
        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let processor = ProductProcessor::new(pool.clone(), sku_gen, ledger, 1, None);

        processor.process(record("iPhone 15")).unwrap();
        processor.process(record("iPhone 15")).unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM products", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let price_count: i64 = conn
            .query_row("SELECT count(*) FROM prices", [], |r| r.get(0))
            .unwrap();
        assert_eq!(price_count, 1);
    }
}
