//! Margin/ROI helpers for the Opportunity Detector (§4.8).
//!
//! Kept as its own module (mirroring the teacher's separate fee
//! calculator) because the detector's margin/ROI math is reused by
//! both `detect` and the alert-formatting path in `alerts`.

/// Flat estimated cost fraction applied to the buy-side price, per
/// spec.md §4.8 (`estimated_costs = p_low * 0.08`) — a placeholder for
/// shipping/payment-processing overhead not otherwise modeled.
pub const ESTIMATED_COST_FRACTION: f64 = 0.08;

pub const MARGIN_NORMALIZATION_CAP: f64 = 100_000.0;
pub const PCT_NORMALIZATION_CAP: f64 = 50.0;

#[derive(Debug, Clone, Copy)]
pub struct MarginBreakdown {
    pub margin_abs: f64,
    pub margin_pct: f64,
    pub estimated_costs: f64,
    pub roi: f64,
}

/// `margin_abs = p_high - p_low`, `margin_pct = margin_abs / p_low * 100`,
/// `estimated_costs = p_low * 0.08`, `roi = (margin_abs - estimated_costs) / p_low * 100`.
pub fn compute_margin(p_low: f64, p_high: f64) -> MarginBreakdown {
    let margin_abs = p_high - p_low;
    let margin_pct = margin_abs / p_low * 100.0;
    let estimated_costs = p_low * ESTIMATED_COST_FRACTION;
    let roi = (margin_abs - estimated_costs) / p_low * 100.0;
    MarginBreakdown {
        margin_abs,
        margin_pct,
        estimated_costs,
        roi,
    }
}

/// Normalize a value into `[0, 1]` against a cap, clamping beyond it.
pub fn normalize(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}
