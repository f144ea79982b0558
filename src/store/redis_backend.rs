//! Redis-backed implementations of `VolatilityStore`/`ChangeLog`/
//! `MatchCache`, gated behind the `redis-store` feature so the default
//! build and test suite stay fully in-memory (SPEC_FULL §4.11-§4.13).
//! Uses the synchronous `redis::Connection` API — this crate's DB
//! layer is already synchronous (`rusqlite`/`r2d2`), so a sync Redis
//! client keeps the two persistence seams consistent.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::Commands;

use crate::models::{ChangeLogEntry, ProductMatch, VolatilityProfile};
use crate::store::{ChangeLog, MatchCache, VolatilityStore};

const CHANGE_LOG_CAP: isize = 1_000;
const VOLATILITY_TTL_SECS: usize = 24 * 3_600;

fn volatility_key(code: &str) -> String {
    format!("volatility:{code}")
}

fn change_log_key(code: &str) -> String {
    format!("changelog:{code}")
}

fn match_key(code_a: &str, code_b: &str) -> String {
    if code_a < code_b {
        format!("match:{code_a}:{code_b}")
    } else {
        format!("match:{code_b}:{code_a}")
    }
}

pub struct RedisVolatilityStore {
    conn: Mutex<redis::Connection>,
}

impl RedisVolatilityStore {
    pub fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            conn: Mutex::new(client.get_connection()?),
        })
    }
}

impl VolatilityStore for RedisVolatilityStore {
    fn record_change(&self, internal_code: &str, at: DateTime<Utc>, pct_change_abs: f64) {
        let mut conn = self.conn.lock();
        let key = volatility_key(internal_code);
        if let Ok(observation) = serde_json::to_string(&(at, pct_change_abs)) {
            let _: redis::RedisResult<()> = conn.rpush(&key, observation);
            let _: redis::RedisResult<()> = conn.expire(&key, VOLATILITY_TTL_SECS as i64);
        }
    }

    fn profile(&self, internal_code: &str) -> Option<VolatilityProfile> {
        let mut conn = self.conn.lock();
        let key = volatility_key(internal_code);
        let raw: Vec<String> = conn.lrange(&key, 0, -1).ok()?;
        if raw.is_empty() {
            return None;
        }
        let observations: Vec<(DateTime<Utc>, f64)> = raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect();
        Some(crate::store::volatility::profile_from_observations(internal_code, &observations))
    }
}

pub struct RedisChangeLog {
    conn: Mutex<redis::Connection>,
}

impl RedisChangeLog {
    pub fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            conn: Mutex::new(client.get_connection()?),
        })
    }
}

impl ChangeLog for RedisChangeLog {
    fn append(&self, entry: ChangeLogEntry) {
        let mut conn = self.conn.lock();
        let key = change_log_key(&entry.internal_code);
        if let Ok(serialized) = serde_json::to_string(&entry) {
            let _: redis::RedisResult<()> = conn.rpush(&key, serialized);
            let _: redis::RedisResult<()> = conn.ltrim(&key, -CHANGE_LOG_CAP, -1);
        }
    }

    fn recent(&self, internal_code: &str, limit: usize) -> Vec<ChangeLogEntry> {
        let mut conn = self.conn.lock();
        let key = change_log_key(internal_code);
        let raw: Vec<String> = conn.lrange(&key, 0, -1).unwrap_or_default();
        let mut entries: Vec<ChangeLogEntry> = raw.iter().filter_map(|s| serde_json::from_str(s).ok()).collect();
        entries.reverse();
        entries.truncate(limit);
        entries
    }
}

pub struct RedisMatchCache {
    conn: Mutex<redis::Connection>,
    ttl: Duration,
}

impl RedisMatchCache {
    pub fn connect(url: &str, ttl: Duration) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            conn: Mutex::new(client.get_connection()?),
            ttl,
        })
    }
}

impl MatchCache for RedisMatchCache {
    fn get(&self, code_a: &str, code_b: &str) -> Option<ProductMatch> {
        let mut conn = self.conn.lock();
        let raw: Option<String> = conn.get(match_key(code_a, code_b)).ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    fn put(&self, m: ProductMatch) {
        let mut conn = self.conn.lock();
        if let Ok(serialized) = serde_json::to_string(&m) {
            let key = match_key(&m.code_a, &m.code_b);
            let _: redis::RedisResult<()> = conn.set_ex(key, serialized, self.ttl.as_secs());
        }
    }

    fn invalidate(&self, code_a: &str, code_b: &str) {
        let mut conn = self.conn.lock();
        let _: redis::RedisResult<()> = conn.del(match_key(code_a, code_b));
    }
}
