//! Price Ledger (§4.2).
//!
//! Maintains one row per `(internal_code, date)`. Writes to the
//! current ledger day are suppressed during a freeze window at 23:59
//! local; past-date rows are immutable. Canonicalization normalizes
//! `original_price`/`current_price` into `price_list`/`price_offer` so
//! `price_offer <= price_list` always holds when both are present.

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Timelike, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::PriceCanonicalizeError;
use crate::models::{PriceChangeEvent, PriceField, Retailer};

/// Canonicalized price fields ready to persist, per §4.2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanonicalPrices {
    pub price_list: Option<f64>,
    pub price_offer: Option<f64>,
    pub price_card: Option<f64>,
    pub price_min: f64,
}

/// Normalize raw `original_price`/`current_price`/`price_card` inputs.
/// Zero-valued prices become `None`; at least one non-null price is
/// required or the record is rejected.
pub fn canonicalize(
    original_price: Option<f64>,
    current_price: Option<f64>,
    price_card: Option<f64>,
) -> Result<CanonicalPrices, PriceCanonicalizeError> {
    let original = zero_to_none(original_price);
    let current = zero_to_none(current_price);
    let card = zero_to_none(price_card);

    let (price_list, price_offer) = match (original, current) {
        (Some(o), Some(c)) => {
            if c <= o {
                (Some(o), Some(c))
            } else {
                (Some(c), Some(o))
            }
        }
        (Some(o), None) => (Some(o), None),
        (None, Some(c)) => (None, Some(c)),
        (None, None) => (None, None),
    };

    let candidates = [price_list, price_offer, card];
    let price_min = candidates
        .iter()
        .filter_map(|p| *p)
        .fold(None, |acc: Option<f64>, v| match acc {
            Some(a) if a <= v => Some(a),
            _ => Some(v),
        });

    match price_min {
        Some(price_min) => Ok(CanonicalPrices {
            price_list,
            price_offer,
            price_card: card,
            price_min,
        }),
        None => Err(PriceCanonicalizeError::AllPricesMissing),
    }
}

fn zero_to_none(price: Option<f64>) -> Option<f64> {
    price.filter(|p| *p > 0.0)
}

/// True when `at` falls inside the freeze window: 23:59 local through
/// `23:59 + freeze_window`.
pub fn in_freeze_window(at: DateTime<Local>, freeze_window: std::time::Duration) -> bool {
    let freeze_start = NaiveTime::from_hms_opt(23, 59, 0).unwrap();
    let time = at.time();
    if time < freeze_start {
        return false;
    }
    let elapsed = time - freeze_start;
    elapsed.to_std().map(|e| e < freeze_window).unwrap_or(false)
}

pub struct PriceLedger {
    pub alert_threshold: f64,
    pub freeze_window: std::time::Duration,
}

impl PriceLedger {
    pub fn new(alert_threshold: f64, freeze_window: std::time::Duration) -> Self {
        Self {
            alert_threshold,
            freeze_window,
        }
    }

    /// Write (insert or update) today's ledger row for `internal_code`.
    /// Returns any significant price-change events detected against
    /// the previous row, or `None` entries are simply absent from the
    /// returned vector. Returns `Ok(vec![])` with no write performed
    /// when called during the freeze window or against a past date
    /// that already has an immutable row.
    pub fn write(
        &self,
        conn: &Connection,
        internal_code: &str,
        retailer: Retailer,
        date: NaiveDate,
        local_now: DateTime<Local>,
        original_price: Option<f64>,
        current_price: Option<f64>,
        price_card: Option<f64>,
    ) -> anyhow::Result<Vec<PriceChangeEvent>> {
        let today = local_now.date_naive();
        let is_today = date == today;

        if is_today && in_freeze_window(local_now, self.freeze_window) {
            debug!(internal_code, "freeze window active, skipping ledger write");
            return Ok(vec![]);
        }

        let canonical = canonicalize(original_price, current_price, price_card)?;

        let existing = self.fetch_existing(conn, internal_code, date)?;

        if date < today && existing.is_some() {
            anyhow::bail!(
                "refusing to overwrite immutable past-date ledger row for {} on {}",
                internal_code,
                date
            );
        }

        let now = Utc::now();
        let mut events = Vec::new();

        if let Some(prev) = &existing {
            events.extend(self.detect_changes(internal_code, retailer, prev, &canonical, now));
        }

        conn.execute(
            "INSERT INTO prices (internal_code, date, retailer, price_list, price_offer, price_card, price_min, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(internal_code, date) DO UPDATE SET
                price_list = excluded.price_list,
                price_offer = excluded.price_offer,
                price_card = excluded.price_card,
                price_min = excluded.price_min,
                updated_at = excluded.updated_at",
            params![
                internal_code,
                date.to_string(),
                retailer.as_str(),
                canonical.price_list,
                canonical.price_offer,
                canonical.price_card,
                canonical.price_min,
                now.to_rfc3339(),
            ],
        )?;

        Ok(events)
    }

    fn fetch_existing(
        &self,
        conn: &Connection,
        internal_code: &str,
        date: NaiveDate,
    ) -> anyhow::Result<Option<CanonicalPrices>> {
        let row = conn
            .query_row(
                "SELECT price_list, price_offer, price_card, price_min FROM prices
                 WHERE internal_code = ?1 AND date = ?2",
                params![internal_code, date.to_string()],
                |r| {
                    Ok(CanonicalPrices {
                        price_list: r.get(0)?,
                        price_offer: r.get(1)?,
                        price_card: r.get(2)?,
                        price_min: r.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn detect_changes(
        &self,
        internal_code: &str,
        retailer: Retailer,
        old: &CanonicalPrices,
        new: &CanonicalPrices,
        now: DateTime<Utc>,
    ) -> Vec<PriceChangeEvent> {
        let mut events = Vec::new();
        for (field, old_v, new_v) in [
            (PriceField::List, old.price_list, new.price_list),
            (PriceField::Offer, old.price_offer, new.price_offer),
            (PriceField::Card, old.price_card, new.price_card),
        ] {
            if let (Some(o), Some(n)) = (old_v, new_v) {
                if o <= 0.0 {
                    continue;
                }
                let pct = (n - o) / o * 100.0;
                if pct.abs() / 100.0 >= self.alert_threshold {
                    events.push(PriceChangeEvent {
                        internal_code: internal_code.to_string(),
                        retailer,
                        field,
                        old_price: o,
                        new_price: n,
                        pct_change: pct,
                        detected_at: now,
                    });
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_pool;
    use chrono::TimeZone;

    fn seed_product(conn: &Connection, code: &str) {
        conn.execute(
            "INSERT INTO products(internal_code, link, name, retailer, first_seen, last_seen, active)
             VALUES (?1, 'x', 'n', 'falabella', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z', 1)",
            params![code],
        )
        .unwrap();
    }

    #[test]
    fn canonicalize_current_cheaper_than_original() {
        let c = canonicalize(Some(1_000_000.0), Some(900_000.0), None).unwrap();
        assert_eq!(c.price_list, Some(1_000_000.0));
        assert_eq!(c.price_offer, Some(900_000.0));
        assert_eq!(c.price_min, 900_000.0);
    }

    #[test]
    fn canonicalize_swaps_when_current_is_higher() {
        let c = canonicalize(Some(900_000.0), Some(1_000_000.0), None).unwrap();
        assert_eq!(c.price_list, Some(1_000_000.0));
        assert_eq!(c.price_offer, Some(900_000.0));
    }

    #[test]
    fn canonicalize_rejects_all_missing() {
        let err = canonicalize(None, None, None);
        assert!(err.is_err());
    }

    #[test]
    fn canonicalize_zero_becomes_null() {
        let c = canonicalize(Some(0.0), Some(500.0), None).unwrap();
        assert_eq!(c.price_list, None);
        assert_eq!(c.price_offer, Some(500.0));
    }

    #[test]
    fn significant_change_detected_at_5_pct() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        seed_product(&conn, "FAL0000001");

        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let noon = Local.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap();

        ledger
            .write(&conn, "FAL0000001", Retailer::Falabella, date, noon, Some(1_000_000.0), Some(900_000.0), None)
            .unwrap();

        let events = ledger
            .write(&conn, "FAL0000001", Retailer::Falabella, date, noon, Some(1_000_000.0), Some(850_000.0), None)
            .unwrap();

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.field, PriceField::Offer);
        assert!((e.pct_change + 5.56).abs() < 0.1);
    }

    #[test]
    fn freeze_window_suppresses_current_day_write() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        seed_product(&conn, "FAL0000001");

        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let date = NaiveDate::from_ymd_opt(2026, 7, 30).unwrap();
        let at_2359 = Local.with_ymd_and_hms(2026, 7, 30, 23, 59, 30).unwrap();

        let events = ledger
            .write(&conn, "FAL0000001", Retailer::Falabella, date, at_2359, Some(1_000.0), Some(900.0), None)
            .unwrap();
        assert!(events.is_empty());

        let row: Option<f64> = conn
            .query_row(
                "SELECT price_min FROM prices WHERE internal_code = ?1 AND date = ?2",
                params!["FAL0000001", date.to_string()],
                |r| r.get(0),
            )
            .optional()
            .unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn write_after_midnight_creates_new_day_row() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        seed_product(&conn, "FAL0000001");

        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        let midnight = Local.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap();

        ledger
            .write(&conn, "FAL0000001", Retailer::Falabella, date, midnight, Some(1_000.0), Some(900.0), None)
            .unwrap();

        let row: f64 = conn
            .query_row(
                "SELECT price_min FROM prices WHERE internal_code = ?1 AND date = ?2",
                params!["FAL0000001", date.to_string()],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(row, 900.0);
    }

    #[test]
    fn past_date_row_is_immutable() {
        let pool = open_test_pool().unwrap();
        let conn = pool.get().unwrap();
        seed_product(&conn, "FAL0000001");

        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let past_date = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        let noon_past = Local.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        let noon_now = Local.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();

        ledger
            .write(&conn, "FAL0000001", Retailer::Falabella, past_date, noon_past, Some(1_000.0), Some(900.0), None)
            .unwrap();

        let result = ledger.write(
            &conn,
            "FAL0000001",
            Retailer::Falabella,
            past_date,
            noon_now,
            Some(1_000.0),
            Some(800.0),
            None,
        );
        assert!(result.is_err());
    }
}
