//! Volatility Profile Store (SPEC_FULL §4.11): rolling per-product
//! change statistics used to tune Scheduler cadence and Opportunity
//! Detector risk. Grounded on
//! `portable_orchestrator_v5/core/scraping_frequency_optimizer.py`.

use std::collections::HashMap;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;

use crate::models::VolatilityProfile;

/// Clamp band for `recommended_check_frequency_minutes`, matching the
/// Scheduler's own frequency clamp (§4.10).
const MIN_FREQUENCY_MINUTES: u32 = 15;
const MAX_FREQUENCY_MINUTES: u32 = 1_440;

pub trait VolatilityStore: Send + Sync {
    /// Record an observed price change for `internal_code` at `at`
    /// with relative magnitude `pct_change_abs` (e.g. `0.08` for 8%).
    fn record_change(&self, internal_code: &str, at: DateTime<Utc>, pct_change_abs: f64);

    fn profile(&self, internal_code: &str) -> Option<VolatilityProfile>;

    /// A `[0,1]` risk proxy derived from the profile: higher recent
    /// change frequency and magnitude means higher risk. Products with
    /// no profile are treated as neutral risk (`0.5`), per DESIGN.md's
    /// Open Question decision for the Opportunity Detector's optional
    /// volatility input.
    fn risk(&self, internal_code: &str) -> f64 {
        match self.profile(internal_code) {
            Some(p) => (0.5 * p.next_change_probability + 0.5 * p.avg_change_magnitude.min(1.0)).clamp(0.0, 1.0),
            None => 0.5,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Observation {
    at: DateTime<Utc>,
    pct_change_abs: f64,
}

struct Entry {
    observations: Vec<Observation>,
}

/// Bounded, process-local implementation: keeps at most
/// `MAX_OBSERVATIONS_PER_PRODUCT` recent observations per product so
/// memory is bounded even for long-running, high-churn products.
const MAX_OBSERVATIONS_PER_PRODUCT: usize = 500;

pub struct InMemoryVolatilityStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryVolatilityStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVolatilityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VolatilityStore for InMemoryVolatilityStore {
    fn record_change(&self, internal_code: &str, at: DateTime<Utc>, pct_change_abs: f64) {
        let mut entries = self.entries.write();
        let entry = entries.entry(internal_code.to_string()).or_insert_with(|| Entry {
            observations: Vec::new(),
        });
        entry.observations.push(Observation { at, pct_change_abs });
        if entry.observations.len() > MAX_OBSERVATIONS_PER_PRODUCT {
            entry.observations.remove(0);
        }
    }

    fn profile(&self, internal_code: &str) -> Option<VolatilityProfile> {
        let entries = self.entries.read();
        let entry = entries.get(internal_code)?;
        if entry.observations.is_empty() {
            return None;
        }
        let observations: Vec<(DateTime<Utc>, f64)> =
            entry.observations.iter().map(|o| (o.at, o.pct_change_abs)).collect();
        Some(profile_from_observations(internal_code, &observations))
    }
}

/// Shared rolling-statistics computation, reused by the in-memory
/// store and (behind the `redis-store` feature) the Redis-backed one,
/// so both implementations derive `next_change_probability`/
/// `recommended_check_frequency_minutes` identically.
pub(crate) fn profile_from_observations(internal_code: &str, observations: &[(DateTime<Utc>, f64)]) -> VolatilityProfile {
    let now = Utc::now();
    let day = chrono::Duration::hours(24);
    let week = chrono::Duration::days(7);

    let changes_24h = observations.iter().filter(|(at, _)| now - *at <= day).count() as u32;
    let changes_7d = observations.iter().filter(|(at, _)| now - *at <= week).count() as u32;

    let avg_change_magnitude = if changes_7d == 0 {
        0.0
    } else {
        observations
            .iter()
            .filter(|(at, _)| now - *at <= week)
            .map(|(_, pct)| *pct)
            .sum::<f64>()
            / changes_7d as f64
    };

    let mut hour_counts = [0u32; 24];
    for (at, _) in observations {
        hour_counts[at.hour() as usize] += 1;
    }
    let max_count = *hour_counts.iter().max().unwrap_or(&0);
    let peak_hours: Vec<u8> = if max_count == 0 {
        Vec::new()
    } else {
        (0u8..24).filter(|&h| hour_counts[h as usize] == max_count).collect()
    };

    // Heuristic: a product changing frequently in the last 24h
    // relative to its own 7-day baseline is "due" for another change
    // soon.
    let weekly_daily_rate = changes_7d as f64 / 7.0;
    let next_change_probability = if weekly_daily_rate <= 0.0 {
        if changes_24h > 0 {
            0.5
        } else {
            0.0
        }
    } else {
        (changes_24h as f64 / weekly_daily_rate).clamp(0.0, 1.0)
    };

    let recommended_check_frequency_minutes = recommend_frequency(next_change_probability);

    VolatilityProfile {
        internal_code: internal_code.to_string(),
        changes_24h,
        changes_7d,
        avg_change_magnitude,
        peak_hours,
        next_change_probability,
        recommended_check_frequency_minutes,
    }
}

/// Higher probability of an imminent change -> shorter check interval,
/// linearly mapped into the Scheduler's own `[15, 1440]` minute band.
fn recommend_frequency(next_change_probability: f64) -> u32 {
    let span = (MAX_FREQUENCY_MINUTES - MIN_FREQUENCY_MINUTES) as f64;
    let minutes = MAX_FREQUENCY_MINUTES as f64 - next_change_probability.clamp(0.0, 1.0) * span;
    (minutes.round() as u32).clamp(MIN_FREQUENCY_MINUTES, MAX_FREQUENCY_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_observations_means_no_profile_and_neutral_risk() {
        let store = InMemoryVolatilityStore::new();
        assert!(store.profile("FAL0000001").is_none());
        assert_eq!(store.risk("FAL0000001"), 0.5);
    }

    #[test]
    fn frequent_recent_changes_raise_probability() {
        let store = InMemoryVolatilityStore::new();
        let now = Utc::now();
        for i in 0..5 {
            store.record_change("FAL0000001", now - chrono::Duration::hours(i), 0.05);
        }
        let profile = store.profile("FAL0000001").unwrap();
        assert_eq!(profile.changes_24h, 5);
        assert!(profile.next_change_probability > 0.0);
        assert!(profile.recommended_check_frequency_minutes < MAX_FREQUENCY_MINUTES);
    }

    #[test]
    fn recommend_frequency_is_clamped() {
        assert_eq!(recommend_frequency(1.0), MIN_FREQUENCY_MINUTES);
        assert_eq!(recommend_frequency(0.0), MAX_FREQUENCY_MINUTES);
    }

    #[test]
    fn observation_list_is_bounded() {
        let store = InMemoryVolatilityStore::new();
        let now = Utc::now();
        for i in 0..(MAX_OBSERVATIONS_PER_PRODUCT + 50) {
            store.record_change("FAL0000001", now - chrono::Duration::minutes(i as i64), 0.01);
        }
        let entries = store.entries.read();
        assert_eq!(entries.get("FAL0000001").unwrap().observations.len(), MAX_OBSERVATIONS_PER_PRODUCT);
    }
}
