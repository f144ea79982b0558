//! Typed configuration (§6, §9.3).
//!
//! Loaded once at startup from the environment (`dotenv`, matching the
//! teacher's `Config::from_env`); `reload_from_db` re-reads the
//! `config` table and applies recognized keys without a restart.

use std::time::Duration;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub metrics_port: u16,

    // Opportunity Detector (§4.8, §6)
    pub min_margin_clp: f64,
    pub min_percentage: f64,
    pub min_similarity_score: f64,
    pub max_price_ratio: f64,

    // Alert Dispatcher (§4.9, §6)
    pub alert_high_value_threshold: f64,
    pub alert_high_roi_threshold: f64,
    pub enable_auto_alerts: bool,
    pub enable_emoji_alerts: bool,

    // Scheduler (§4.10, §6)
    pub critical_tier_frequency_minutes: u32,
    pub important_tier_frequency_minutes: u32,
    pub tracking_tier_frequency_minutes: u32,

    // Orchestrator / detector scope (§4.5, §4.8, §6)
    pub retailers_enabled: Vec<String>,

    // Product Processor (§4.3, §6)
    pub batch_size: usize,

    // Traffic Router (§4.4, §6)
    pub target_proxy_ratio: f64,
    pub requests_per_channel: u32,
    pub proxy_pool_size: usize,
    pub direct_error_threshold: u32,
    pub max_retries: u32,

    // Price Ledger (§4.2, §9)
    pub price_alert_threshold: f64,
    pub freeze_window: Duration,

    // Match Store (§4.7)
    pub match_ttl: Duration,
}

impl Config {
    /// Mirrors the teacher's `models::Config::from_env`: `dotenv().ok()`
    /// then `env::var(...).unwrap_or_else(...)` per key with a parsed
    /// default.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./precio_intel.db".to_string());

        let metrics_port = env_parse("METRICS_PORT", 9898);

        let min_margin_clp = env_parse("MIN_MARGIN_CLP", 5_000.0);
        let min_percentage = env_parse("MIN_PERCENTAGE", 15.0);
        let min_similarity_score = env_parse("MIN_SIMILARITY_SCORE", 0.85);
        let max_price_ratio = env_parse("MAX_PRICE_RATIO", 5.0);

        let alert_high_value_threshold = env_parse("ALERT_HIGH_VALUE_THRESHOLD", 50_000.0);
        let alert_high_roi_threshold = env_parse("ALERT_HIGH_ROI_THRESHOLD", 10.0);
        let enable_auto_alerts = env_parse_bool("ENABLE_AUTO_ALERTS", true);
        let enable_emoji_alerts = env_parse_bool("ENABLE_EMOJI_ALERTS", true);

        let critical_tier_frequency_minutes = env_parse("CRITICAL_TIER_FREQUENCY", 30);
        let important_tier_frequency_minutes = env_parse("IMPORTANT_TIER_FREQUENCY", 120);
        let tracking_tier_frequency_minutes = env_parse("TRACKING_TIER_FREQUENCY", 360);

        let retailers_enabled = std::env::var("RETAILERS_ENABLED")
            .unwrap_or_else(|_| "falabella,ripley,paris,hites,abcdin,pcfactory".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let batch_size = env_parse("BATCH_SIZE", 100usize);

        let target_proxy_ratio = env_parse("TARGET_PROXY_RATIO", 0.30);
        let requests_per_channel = env_parse("REQUESTS_PER_CHANNEL", 50);
        let proxy_pool_size = env_parse("PROXY_POOL_SIZE", 10usize);
        let direct_error_threshold = env_parse("DIRECT_ERROR_THRESHOLD", 3);
        let max_retries = env_parse("MAX_RETRIES", 3);

        let price_alert_threshold = env_parse("PRICE_ALERT_THRESHOLD", 0.05);
        let freeze_window = Duration::from_secs(env_parse("FREEZE_WINDOW_SECS", 60u64));
        let match_ttl = Duration::from_secs(env_parse("MATCH_TTL_SECS", 86_400u64));

        Ok(Self {
            database_path,
            metrics_port,
            min_margin_clp,
            min_percentage,
            min_similarity_score,
            max_price_ratio,
            alert_high_value_threshold,
            alert_high_roi_threshold,
            enable_auto_alerts,
            enable_emoji_alerts,
            critical_tier_frequency_minutes,
            important_tier_frequency_minutes,
            tracking_tier_frequency_minutes,
            retailers_enabled,
            batch_size,
            target_proxy_ratio,
            requests_per_channel,
            proxy_pool_size,
            direct_error_threshold,
            max_retries,
            price_alert_threshold,
            freeze_window,
            match_ttl,
        })
    }

    /// Re-read the `config` table and apply recognized keys in place.
    /// Unrecognized keys are ignored (forward-compatible); malformed
    /// values are logged and skipped rather than aborting the reload.
    pub fn reload_from_db(&mut self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(
            "SELECT key, value FROM config WHERE active = 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            self.apply_key(&key, &value);
        }
        Ok(())
    }

    fn apply_key(&mut self, key: &str, value: &str) {
        macro_rules! set_f64 {
            ($field:expr) => {
                match value.parse::<f64>() {
                    Ok(v) => $field = v,
                    Err(_) => warn!(key, value, "ignoring malformed config value"),
                }
            };
        }
        macro_rules! set_u32 {
            ($field:expr) => {
                match value.parse::<u32>() {
                    Ok(v) => $field = v,
                    Err(_) => warn!(key, value, "ignoring malformed config value"),
                }
            };
        }

        match key {
            "min_margin_clp" => set_f64!(self.min_margin_clp),
            "min_percentage" => set_f64!(self.min_percentage),
            "min_similarity_score" => set_f64!(self.min_similarity_score),
            "max_price_ratio" => set_f64!(self.max_price_ratio),
            "alert_high_value_threshold" => set_f64!(self.alert_high_value_threshold),
            "alert_high_roi_threshold" => set_f64!(self.alert_high_roi_threshold),
            "enable_auto_alerts" => self.enable_auto_alerts = value == "true" || value == "1",
            "enable_emoji_alerts" => self.enable_emoji_alerts = value == "true" || value == "1",
            "critical_tier_frequency" => set_u32!(self.critical_tier_frequency_minutes),
            "important_tier_frequency" => set_u32!(self.important_tier_frequency_minutes),
            "tracking_tier_frequency" => set_u32!(self.tracking_tier_frequency_minutes),
            "batch_size" => match value.parse::<usize>() {
                Ok(v) => self.batch_size = v,
                Err(_) => warn!(key, value, "ignoring malformed config value"),
            },
            "target_proxy_ratio" => set_f64!(self.target_proxy_ratio),
            "requests_per_channel" => set_u32!(self.requests_per_channel),
            "retailers_enabled" => {
                self.retailers_enabled = value
                    .split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            other => {
                info!(key = other, "config key not recognized by this build, ignoring");
            }
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
