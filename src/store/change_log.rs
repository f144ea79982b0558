//! Change Log (SPEC_FULL §4.12): a capped per-product history of
//! price field changes, used by the Price Ledger to emit events and
//! by the Volatility Profile Store to compute rolling statistics.
//! Grounded on `core/price_manager.py`'s change-history list.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::models::ChangeLogEntry;

/// Per-product cap, per spec.md §6.
const MAX_ENTRIES_PER_PRODUCT: usize = 1_000;

pub trait ChangeLog: Send + Sync {
    fn append(&self, entry: ChangeLogEntry);

    /// Most recent entries first, newest-to-oldest, capped at `limit`.
    fn recent(&self, internal_code: &str, limit: usize) -> Vec<ChangeLogEntry>;
}

pub struct InMemoryChangeLog {
    entries: RwLock<HashMap<String, Vec<ChangeLogEntry>>>,
}

impl InMemoryChangeLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog for InMemoryChangeLog {
    fn append(&self, entry: ChangeLogEntry) {
        let mut entries = self.entries.write();
        let list = entries.entry(entry.internal_code.clone()).or_default();
        list.push(entry);
        if list.len() > MAX_ENTRIES_PER_PRODUCT {
            list.remove(0);
        }
    }

    fn recent(&self, internal_code: &str, limit: usize) -> Vec<ChangeLogEntry> {
        let entries = self.entries.read();
        match entries.get(internal_code) {
            Some(list) => list.iter().rev().take(limit).cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceField;

    fn entry(code: &str, new_price: f64) -> ChangeLogEntry {
        ChangeLogEntry {
            internal_code: code.to_string(),
            date: chrono::Utc::now().date_naive(),
            field: PriceField::Offer,
            old_price: 1000.0,
            new_price,
            pct_change: (new_price - 1000.0) / 1000.0 * 100.0,
        }
    }

    #[test]
    fn recent_returns_newest_first() {
        let log = InMemoryChangeLog::new();
        log.append(entry("FAL0000001", 900.0));
        log.append(entry("FAL0000001", 800.0));

        let recent = log.recent("FAL0000001", 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].new_price, 800.0);
    }

    #[test]
    fn list_is_capped_per_product() {
        let log = InMemoryChangeLog::new();
        for i in 0..(MAX_ENTRIES_PER_PRODUCT + 10) {
            log.append(entry("FAL0000001", 1000.0 + i as f64));
        }
        let recent = log.recent("FAL0000001", MAX_ENTRIES_PER_PRODUCT + 10);
        assert_eq!(recent.len(), MAX_ENTRIES_PER_PRODUCT);
    }

    #[test]
    fn unknown_product_returns_empty() {
        let log = InMemoryChangeLog::new();
        assert!(log.recent("NOPE", 10).is_empty());
    }
}
