//! Opportunity Detector (§4.8): turns an active match plus each
//! side's most recent ledger price into a scored, tiered
//! `ArbitrageOpportunity`, or rejects the pair.

use std::collections::HashSet;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Timelike, Utc};

use crate::models::{ArbitrageOpportunity, RiskLevel, Tier};
use crate::opportunity::costs::{compute_margin, normalize, MARGIN_NORMALIZATION_CAP, PCT_NORMALIZATION_CAP};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub min_margin_clp: f64,
    pub min_percentage: f64,
    pub max_price_ratio: f64,
    pub enabled_retailers: HashSet<String>,
}

/// One side of a candidate opportunity: a retailer plus its most
/// recent price for the matched product.
#[derive(Debug, Clone, Copy)]
pub struct PriceSide<'a> {
    pub retailer: crate::models::Retailer,
    pub price: f64,
    pub code: &'a str,
}

pub struct OpportunityDetector {
    config: DetectorConfig,
}

impl OpportunityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Evaluate a candidate pair, returning `None` when any rejection
    /// rule in §4.8 applies. `similarity` is the match's
    /// `similarity_score`; `volatility_risk` is `[0,1]`, 0 meaning
    /// perfectly stable (absent volatility data is treated as neutral
    /// 0.5 risk, per DESIGN.md's Open Question decision for V5 boosts).
    pub fn detect(
        &self,
        match_id: Option<i64>,
        a: PriceSide,
        b: PriceSide,
        similarity: f64,
        volatility_risk: Option<f64>,
        now: DateTime<Utc>,
    ) -> Option<ArbitrageOpportunity> {
        if a.price <= 0.0 || b.price <= 0.0 || (a.price - b.price).abs() < f64::EPSILON {
            return None;
        }

        let (low, high) = if a.price < b.price { (a, b) } else { (b, a) };

        if !self.config.enabled_retailers.is_empty() {
            let low_enabled = self.config.enabled_retailers.contains(low.retailer.as_str());
            let high_enabled = self.config.enabled_retailers.contains(high.retailer.as_str());
            if !low_enabled || !high_enabled {
                return None;
            }
        }

        if low.retailer == high.retailer {
            return None;
        }

        let breakdown = compute_margin(low.price, high.price);

        if breakdown.margin_abs < self.config.min_margin_clp {
            return None;
        }
        if breakdown.margin_pct < self.config.min_percentage {
            return None;
        }
        if high.price / low.price > self.config.max_price_ratio {
            return None;
        }

        let local_now = now.with_timezone(&Local);
        let timing_score = timing_score(local_now);
        let volatility_risk = volatility_risk.unwrap_or(0.5);

        let margin_norm = normalize(breakdown.margin_abs, MARGIN_NORMALIZATION_CAP);
        let pct_norm = normalize(breakdown.margin_pct, PCT_NORMALIZATION_CAP);
        let inverse_volatility = 1.0 - volatility_risk;

        let raw_score = 0.30 * margin_norm + 0.25 * pct_norm + 0.25 * similarity + 0.10 * inverse_volatility + 0.10 * timing_score;
        let opportunity_score = 0.5 + raw_score.clamp(0.0, 1.0) * 0.5;

        let confidence_score = (0.5 * similarity + 0.3 * inverse_volatility + 0.2 * timing_score).clamp(0.0, 1.0);

        let risk_level = risk_level(volatility_risk, confidence_score);
        let tier = tier_for(breakdown.margin_abs, confidence_score, opportunity_score);

        let predicted_duration_hours = predicted_duration_hours(breakdown.margin_abs, volatility_risk);
        let optimal_execution_time = optimal_execution_time(now, local_now);
        let expires_at = now + chrono::Duration::hours(predicted_duration_hours.round() as i64);

        Some(ArbitrageOpportunity {
            cheap_code: low.code.to_string(),
            expensive_code: high.code.to_string(),
            match_id,
            buy_retailer: low.retailer,
            sell_retailer: high.retailer,
            buy_price: low.price,
            sell_price: high.price,
            margin_abs: breakdown.margin_abs,
            margin_pct: breakdown.margin_pct,
            roi: breakdown.roi,
            opportunity_score,
            confidence_score,
            risk_level,
            tier,
            predicted_duration_hours,
            detected_at: now,
            expires_at,
            optimal_execution_time,
            alerted: false,
        })
    }
}

/// `1.0` in 10-18h local; `0.8` in 09-21h local; `0.3` otherwise.
fn timing_score(local_now: DateTime<Local>) -> f64 {
    let hour = local_now.hour();
    if (10..18).contains(&hour) {
        1.0
    } else if (9..21).contains(&hour) {
        0.8
    } else {
        0.3
    }
}

fn risk_level(volatility_risk: f64, confidence_score: f64) -> RiskLevel {
    let combined = (volatility_risk + (1.0 - confidence_score)) / 2.0;
    if combined < 0.25 {
        RiskLevel::Low
    } else if combined < 0.5 {
        RiskLevel::Medium
    } else if combined < 0.75 {
        RiskLevel::High
    } else {
        RiskLevel::VeryHigh
    }
}

/// `critical` if `margin_abs ≥ 100_000 AND confidence ≥ 0.8 AND score ≥ 0.8`;
/// `important` if `margin_abs ≥ 50_000 AND confidence ≥ 0.6`; else `tracking`.
fn tier_for(margin_abs: f64, confidence_score: f64, opportunity_score: f64) -> Tier {
    if margin_abs >= 100_000.0 && confidence_score >= 0.8 && opportunity_score >= 0.8 {
        Tier::Critical
    } else if margin_abs >= 50_000.0 && confidence_score >= 0.6 {
        Tier::Important
    } else {
        Tier::Tracking
    }
}

/// Shorter for larger margins / higher volatility, clamped to 6-48h.
fn predicted_duration_hours(margin_abs: f64, volatility_risk: f64) -> f64 {
    let margin_factor = normalize(margin_abs, MARGIN_NORMALIZATION_CAP);
    let base = 48.0 - margin_factor * 30.0 - volatility_risk * 12.0;
    base.clamp(6.0, 48.0)
}

/// `now+30m` inside business hours (09-21 local), else next-day 09:00.
fn optimal_execution_time(now: DateTime<Utc>, local_now: DateTime<Local>) -> DateTime<Utc> {
    let hour = local_now.hour();
    if (9..21).contains(&hour) {
        now + chrono::Duration::minutes(30)
    } else {
        let next_day = if hour >= 21 {
            local_now.date_naive() + chrono::Duration::days(1)
        } else {
            local_now.date_naive()
        };
        let nine_am = next_day.and_time(NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        Local
            .from_local_datetime(&nine_am)
            .single()
            .unwrap_or(local_now)
            .with_timezone(&Utc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Retailer;

    fn config() -> DetectorConfig {
        DetectorConfig {
            min_margin_clp: 5_000.0,
            min_percentage: 15.0,
            max_price_ratio: 5.0,
            enabled_retailers: ["falabella", "ripley"].iter().map(|s| s.to_string()).collect(),
        }
    }

    fn noon_utc() -> DateTime<Utc> {
        // 12:00 local (Chile, treated as the process's Local for tests).
        Local.with_ymd_and_hms(2026, 7, 30, 12, 0, 0).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn accepts_clear_margin_opportunity() {
        let detector = OpportunityDetector::new(config());
        let a = PriceSide {
            retailer: Retailer::Falabella,
            price: 100_000.0,
            code: "FAL0000001",
        };
        let b = PriceSide {
            retailer: Retailer::Ripley,
            price: 150_000.0,
            code: "RIP0000002",
        };
        let opp = detector.detect(None, a, b, 0.95, Some(0.2), noon_utc()).unwrap();
        assert_eq!(opp.buy_retailer, Retailer::Falabella);
        assert_eq!(opp.sell_retailer, Retailer::Ripley);
        assert_eq!(opp.margin_abs, 50_000.0);
    }

    #[test]
    fn rejects_below_min_margin() {
        let detector = OpportunityDetector::new(config());
        let a = PriceSide {
            retailer: Retailer::Falabella,
            price: 100_000.0,
            code: "FAL0000001",
        };
        let b = PriceSide {
            retailer: Retailer::Ripley,
            price: 101_000.0,
            code: "RIP0000002",
        };
        assert!(detector.detect(None, a, b, 0.9, None, noon_utc()).is_none());
    }

    #[test]
    fn rejects_same_retailer() {
        let detector = OpportunityDetector::new(config());
        let a = PriceSide {
            retailer: Retailer::Falabella,
            price: 100_000.0,
            code: "FAL0000001",
        };
        let b = PriceSide {
            retailer: Retailer::Falabella,
            price: 150_000.0,
            code: "FAL0000002",
        };
        assert!(detector.detect(None, a, b, 0.9, None, noon_utc()).is_none());
    }

    #[test]
    fn rejects_disabled_retailer() {
        let detector = OpportunityDetector::new(config());
        let a = PriceSide {
            retailer: Retailer::Falabella,
            price: 100_000.0,
            code: "FAL0000001",
        };
        let b = PriceSide {
            retailer: Retailer::Hites,
            price: 150_000.0,
            code: "HIT0000002",
        };
        assert!(detector.detect(None, a, b, 0.9, None, noon_utc()).is_none());
    }

    #[test]
    fn rejects_excessive_price_ratio() {
        let detector = OpportunityDetector::new(config());
        let a = PriceSide {
            retailer: Retailer::Falabella,
            price: 10_000.0,
            code: "FAL0000001",
        };
        let b = PriceSide {
            retailer: Retailer::Ripley,
            price: 100_000.0,
            code: "RIP0000002",
        };
        assert!(detector.detect(None, a, b, 0.9, None, noon_utc()).is_none());
    }

    #[test]
    fn high_margin_high_confidence_is_critical_tier() {
        let detector = OpportunityDetector::new(config());
        let a = PriceSide {
            retailer: Retailer::Falabella,
            price: 100_000.0,
            code: "FAL0000001",
        };
        let b = PriceSide {
            retailer: Retailer::Ripley,
            price: 250_000.0,
            code: "RIP0000002",
        };
        let opp = detector.detect(None, a, b, 0.99, Some(0.05), noon_utc()).unwrap();
        assert_eq!(opp.tier, Tier::Critical);
    }

    #[test]
    fn timing_score_bands() {
        let midday = Local.with_ymd_and_hms(2026, 7, 30, 14, 0, 0).unwrap();
        let evening = Local.with_ymd_and_hms(2026, 7, 30, 20, 0, 0).unwrap();
        let night = Local.with_ymd_and_hms(2026, 7, 30, 3, 0, 0).unwrap();
        assert_eq!(timing_score(midday), 1.0);
        assert_eq!(timing_score(evening), 0.8);
        assert_eq!(timing_score(night), 0.3);
    }
}
