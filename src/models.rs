//! Shared data model: products, price records, matches, opportunities,
//! volatility profiles and scheduler tasks.
//!
//! These types are the boundary contracts between components; none of
//! them own I/O. DB-facing code lives in `db` and the per-component
//! modules, keeping row-mapping out of the model definitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One configured upstream e-commerce source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retailer {
    #[default]
    Falabella,
    Ripley,
    Paris,
    Hites,
    AbcDin,
    Pcfactory,
    Other,
}

impl Retailer {
    /// Explicit retailer -> 3-letter SKU prefix map, per SKU Generator §4.1.
    pub fn code(&self) -> &'static str {
        match self {
            Retailer::Falabella => "FAL",
            Retailer::Ripley => "RIP",
            Retailer::Paris => "PAR",
            Retailer::Hites => "HIT",
            Retailer::AbcDin => "ABC",
            Retailer::Pcfactory => "PCF",
            Retailer::Other => "OTR",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Retailer::Falabella => "falabella",
            Retailer::Ripley => "ripley",
            Retailer::Paris => "paris",
            Retailer::Hites => "hites",
            Retailer::AbcDin => "abcdin",
            Retailer::Pcfactory => "pcfactory",
            Retailer::Other => "other",
        }
    }

    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "falabella" => Retailer::Falabella,
            "ripley" => Retailer::Ripley,
            "paris" => Retailer::Paris,
            "hites" => Retailer::Hites,
            "abcdin" | "abc_din" | "abc-din" => Retailer::AbcDin,
            "pcfactory" => Retailer::Pcfactory,
            _ => Retailer::Other,
        }
    }
}

/// Raw record handed to the Product Processor by a retailer worker,
/// before validation, SKU assignment, or canonicalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawProductRecord {
    pub retailer: Retailer,
    pub external_sku: Option<String>,
    pub link: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub storage: Option<String>,
    pub ram: Option<String>,
    pub color: Option<String>,
    pub screen: Option<String>,
    pub camera: Option<String>,
    pub rating: Option<f32>,
    pub reviews_count: Option<u32>,
    /// Raw scraped strings, not yet parsed: anti-junk validation (§4.3)
    /// checks these against sentinel tokens before the Processor
    /// attempts to parse them into numbers.
    pub original_price_raw: Option<String>,
    pub current_price_raw: Option<String>,
    pub price_card_raw: Option<String>,
}

/// Product master record. `internal_code` is the stable 10-char SKU
/// produced by the SKU Generator (§4.1) and never changes once assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub internal_code: String,
    pub retailer: Retailer,
    pub category: Option<String>,
    pub name: String,
    pub brand: Option<String>,
    pub external_sku: Option<String>,
    pub link: String,
    pub storage: Option<String>,
    pub ram: Option<String>,
    pub color: Option<String>,
    pub screen: Option<String>,
    pub camera: Option<String>,
    pub rating: Option<f32>,
    pub reviews_count: Option<u32>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
}

/// Daily price ledger row for `(internal_code, date)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub internal_code: String,
    pub date: NaiveDate,
    pub retailer: Retailer,
    pub price_list: Option<f64>,
    pub price_offer: Option<f64>,
    pub price_card: Option<f64>,
    pub price_min: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The three price fields a ledger write can change, used by the
/// change-detection logic in the Price Ledger (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    List,
    Offer,
    Card,
}

impl PriceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceField::List => "list",
            PriceField::Offer => "offer",
            PriceField::Card => "card",
        }
    }
}

/// Emitted by the Price Ledger when a write changes a price field by
/// at least `alert_threshold` (§4.2, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChangeEvent {
    pub internal_code: String,
    pub retailer: Retailer,
    pub field: PriceField,
    pub old_price: f64,
    pub new_price: f64,
    pub pct_change: f64,
    pub detected_at: DateTime<Utc>,
}

/// Confidence band for a product match (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchConfidence {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Kind of pairing a Match represents (§3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Similar,
    Variant,
    Category,
}

/// A persisted cross-retailer product pairing. `code_a < code_b`
/// lexicographically is an invariant enforced at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductMatch {
    pub code_a: String,
    pub code_b: String,
    pub similarity_score: f64,
    pub confidence: MatchConfidence,
    pub match_type: MatchType,
    pub features: SimilarityFeatures,
    pub ml_version: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductMatch {
    /// Construct a match, ordering the pair so `code_a < code_b` holds
    /// regardless of the order the caller discovered the two codes in.
    pub fn ordered(
        code_x: String,
        code_y: String,
        similarity_score: f64,
        confidence: MatchConfidence,
        match_type: MatchType,
        features: SimilarityFeatures,
        ml_version: Option<String>,
    ) -> Self {
        let (code_a, code_b) = if code_x < code_y {
            (code_x, code_y)
        } else {
            (code_y, code_x)
        };
        let now = Utc::now();
        Self {
            code_a,
            code_b,
            similarity_score: similarity_score.clamp(0.0, 1.0),
            confidence,
            match_type,
            features,
            ml_version,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Bag of booleans/floats backing a match's `features` column (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimilarityFeatures {
    pub brand_score: f64,
    pub name_score: f64,
    pub price_score: f64,
    pub category_score: f64,
    pub specs_score: f64,
    pub embedding_score: Option<f64>,
    pub tier_agreement: Option<bool>,
    pub brand_exact: bool,
    pub category_exact: bool,
}

/// Risk bucket assigned to an opportunity (§3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Scheduling/alert-prominence tier assigned to an opportunity (§3, §4.8, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Critical,
    Important,
    Tracking,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Critical => "critical",
            Tier::Important => "important",
            Tier::Tracking => "tracking",
        }
    }
}

/// A directed buy-low/sell-high candidate derived from a match + current
/// prices (§3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub cheap_code: String,
    pub expensive_code: String,
    pub match_id: Option<i64>,
    pub buy_retailer: Retailer,
    pub sell_retailer: Retailer,
    pub buy_price: f64,
    pub sell_price: f64,
    pub margin_abs: f64,
    pub margin_pct: f64,
    pub roi: f64,
    pub opportunity_score: f64,
    pub confidence_score: f64,
    pub risk_level: RiskLevel,
    pub tier: Tier,
    pub predicted_duration_hours: f64,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub optimal_execution_time: DateTime<Utc>,
    pub alerted: bool,
}

/// Rolling per-product change statistics used to tune scheduler cadence
/// and opportunity risk (§3, SPEC_FULL §4.11).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolatilityProfile {
    pub internal_code: String,
    pub changes_24h: u32,
    pub changes_7d: u32,
    pub avg_change_magnitude: f64,
    pub peak_hours: Vec<u8>,
    pub next_change_probability: f64,
    pub recommended_check_frequency_minutes: u32,
}

/// One entry in a product's capped price-change history (SPEC_FULL §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub internal_code: String,
    pub date: NaiveDate,
    pub field: PriceField,
    pub old_price: f64,
    pub new_price: f64,
    pub pct_change: f64,
}

/// A scheduler-owned recurring task (§3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerTask {
    pub task_id: String,
    pub task_type: String,
    pub tier: Tier,
    pub frequency_minutes: u32,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub priority: u8,
    pub enabled: bool,
    pub last_outcome: Option<TaskOutcome>,
}

/// Recorded result of a single task execution, driving the adaptive
/// frequency pass (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub opportunities_detected: u32,
    pub duration_seconds: f64,
    pub recorded_at: DateTime<Utc>,
}
