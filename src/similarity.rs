//! Similarity Scorer (§4.6): weighted cross-retailer product
//! comparison producing a score in `[0, 1]`, a confidence band, and a
//! match type. The weighted-feature-sum-then-threshold-bands shape is
//! grounded on the teacher's `arbitrage::engine::calculate_confidence`,
//! generalized from a single confidence scalar to the full
//! `SimilarityFeatures` breakdown the Match Store persists.

use crate::models::{MatchConfidence, MatchType, Product, SimilarityFeatures};

pub const WEIGHT_BRAND: f64 = 0.25;
pub const WEIGHT_NAME: f64 = 0.30;
pub const WEIGHT_PRICE: f64 = 0.20;
pub const WEIGHT_CATEGORY: f64 = 0.15;
pub const WEIGHT_SPECS: f64 = 0.10;

/// Optional embedding/tier inputs that may blend with or boost the
/// name score, per §4.6 ("an optional external embedding similarity
/// may replace or blend with the name score ... final score may be
/// boosted by up to 0.1 for agreement on a coarse tier tag").
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalSignals {
    pub embedding_similarity: Option<f64>,
    pub tier_agreement: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub score: f64,
    pub confidence: MatchConfidence,
    pub match_type: MatchType,
    pub features: SimilarityFeatures,
}

fn tokens(s: &str) -> std::collections::HashSet<String> {
    s.to_lowercase()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let ta = tokens(a);
    let tb = tokens(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// 1.0 if lowercased-equal; else Jaccard of tokens; 0 if either empty.
fn brand_score(a: &Option<String>, b: &Option<String>) -> (f64, bool) {
    match (a, b) {
        (Some(ba), Some(bb)) if !ba.trim().is_empty() && !bb.trim().is_empty() => {
            let exact = ba.trim().eq_ignore_ascii_case(bb.trim());
            (if exact { 1.0 } else { jaccard(ba, bb) }, exact)
        }
        _ => (0.0, false),
    }
}

/// Jaccard of lowercased whitespace-split tokens; 0 if either empty.
fn name_score(a: &str, b: &str) -> f64 {
    jaccard(a, b)
}

/// `min/max ≥ 0.8 → 1.0; ≥ 0.6 → 0.7; ≥ 0.4 → 0.4; else 0.1`.
fn price_proximity(price_a: f64, price_b: f64) -> f64 {
    if price_a <= 0.0 || price_b <= 0.0 {
        return 0.1;
    }
    let ratio = price_a.min(price_b) / price_a.max(price_b);
    if ratio >= 0.8 {
        1.0
    } else if ratio >= 0.6 {
        0.7
    } else if ratio >= 0.4 {
        0.4
    } else {
        0.1
    }
}

/// `1.0` exact match, else `0.3`.
fn category_score(a: &Option<String>, b: &Option<String>) -> (f64, bool) {
    match (a, b) {
        (Some(ca), Some(cb)) => {
            let exact = ca.trim().eq_ignore_ascii_case(cb.trim());
            (if exact { 1.0 } else { 0.3 }, exact)
        }
        _ => (0.3, false),
    }
}

/// Whether two spec-field strings share a numeric token, used for the
/// "similar" 0.7 partial-credit case (e.g. "128GB" vs "128 GB").
fn shares_numeric_token(a: &str, b: &str) -> bool {
    let nums = |s: &str| -> std::collections::HashSet<String> {
        s.chars()
            .collect::<String>()
            .split(|c: char| !c.is_ascii_digit())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    };
    let na = nums(a);
    let nb = nums(b);
    !na.is_empty() && !nb.is_empty() && na.intersection(&nb).next().is_some()
}

/// Fraction of matching non-empty spec fields over
/// `{storage, ram, screen, camera, color}`; a "similar" pair (shared
/// numeric tokens) counts as 0.7 instead of 1.0.
fn specs_score(a: &Product, b: &Product) -> f64 {
    let pairs: [(&Option<String>, &Option<String>); 5] = [
        (&a.storage, &b.storage),
        (&a.ram, &b.ram),
        (&a.screen, &b.screen),
        (&a.camera, &b.camera),
        (&a.color, &b.color),
    ];

    let mut present = 0.0;
    let mut total = 0.0;
    for (fa, fb) in pairs {
        if let (Some(va), Some(vb)) = (fa, fb) {
            if va.trim().is_empty() || vb.trim().is_empty() {
                continue;
            }
            present += 1.0;
            if va.trim().eq_ignore_ascii_case(vb.trim()) {
                total += 1.0;
            } else if shares_numeric_token(va, vb) {
                total += 0.7;
            }
        }
    }
    if present == 0.0 {
        0.0
    } else {
        total / present
    }
}

/// Score a candidate pair. `price_a`/`price_b` should be each
/// product's current best price (offer if present, else list).
pub fn score_pair(a: &Product, b: &Product, price_a: f64, price_b: f64, signals: ExternalSignals) -> ScoredMatch {
    let (brand, brand_exact) = brand_score(&a.brand, &b.brand);
    let mut name = name_score(&a.name, &b.name);
    if let Some(embedding) = signals.embedding_similarity {
        name = (name + embedding) / 2.0;
    }
    let price = price_proximity(price_a, price_b);
    let (category, category_exact) = category_score(&a.category, &b.category);
    let specs = specs_score(a, b);

    let mut score =
        WEIGHT_BRAND * brand + WEIGHT_NAME * name + WEIGHT_PRICE * price + WEIGHT_CATEGORY * category + WEIGHT_SPECS * specs;

    if signals.tier_agreement == Some(true) {
        score += 0.1;
    }
    score = score.clamp(0.0, 1.0);

    let features = SimilarityFeatures {
        brand_score: brand,
        name_score: name,
        price_score: price,
        category_score: category,
        specs_score: specs,
        embedding_score: signals.embedding_similarity,
        tier_agreement: signals.tier_agreement,
        brand_exact,
        category_exact,
    };

    let confidence = confidence_band(score);
    let match_type = classify_match_type(score);

    ScoredMatch {
        score,
        confidence,
        match_type,
        features,
    }
}

/// `≥0.93 high, ≥0.87 medium, ≥0.85 low, else unmatched`. Spec.md
/// names only three confidence bands plus "unmatched"; `MatchConfidence`
/// additionally carries `VeryHigh`/`VeryLow` to give the Opportunity
/// Detector and alert formatting finer-grained buckets above "high"
/// and below "low" — see DESIGN.md's Open Question decision for §4.6.
fn confidence_band(score: f64) -> MatchConfidence {
    if score >= 0.97 {
        MatchConfidence::VeryHigh
    } else if score >= 0.93 {
        MatchConfidence::High
    } else if score >= 0.87 {
        MatchConfidence::Medium
    } else if score >= 0.85 {
        MatchConfidence::Low
    } else {
        MatchConfidence::VeryLow
    }
}

/// `≥0.95 exact, ≥0.90 similar, ≥0.85 variant, else category`.
fn classify_match_type(score: f64) -> MatchType {
    if score >= 0.95 {
        MatchType::Exact
    } else if score >= 0.90 {
        MatchType::Similar
    } else if score >= 0.85 {
        MatchType::Variant
    } else {
        MatchType::Category
    }
}

/// Whether a scored pair clears the minimum bar to be persisted as a
/// match at all (§4.6, §6 `min_similarity_score`).
pub fn is_acceptable(scored: &ScoredMatch, min_similarity_score: f64) -> bool {
    scored.score >= min_similarity_score
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn product(name: &str, brand: &str, category: &str) -> Product {
        let now = Utc::now();
        Product {
            internal_code: "FAL0000000".into(),
            retailer: crate::models::Retailer::Falabella,
            category: Some(category.into()),
            name: name.into(),
            brand: Some(brand.into()),
            external_sku: None,
            link: "https://x".into(),
            storage: Some("128GB".into()),
            ram: Some("6GB".into()),
            color: Some("Negro".into()),
            screen: Some("6.1".into()),
            camera: None,
            rating: None,
            reviews_count: None,
            first_seen: now,
            last_seen: now,
            active: true,
        }
    }

    #[test]
    fn identical_products_score_very_high() {
        let a = product("iphone 15 pro 128gb negro", "Apple", "Celulares");
        let b = product("iphone 15 pro 128gb negro", "Apple", "Celulares");
        let scored = score_pair(&a, &b, 900_000.0, 890_000.0, ExternalSignals::default());
        assert!(scored.score >= 0.95, "score was {}", scored.score);
        assert_eq!(scored.match_type, MatchType::Exact);
    }

    #[test]
    fn different_brand_scores_low() {
        let a = product("galaxy s23", "Samsung", "Celulares");
        let b = product("iphone 15", "Apple", "Celulares");
        let scored = score_pair(&a, &b, 900_000.0, 890_000.0, ExternalSignals::default());
        assert!(scored.score < 0.5);
        assert_eq!(scored.confidence, MatchConfidence::VeryLow);
    }

    #[test]
    fn price_proximity_bands() {
        assert_eq!(price_proximity(100.0, 85.0), 1.0);
        assert_eq!(price_proximity(100.0, 65.0), 0.7);
        assert_eq!(price_proximity(100.0, 45.0), 0.4);
        assert_eq!(price_proximity(100.0, 10.0), 0.1);
    }

    #[test]
    fn tier_agreement_boosts_score() {
        let a = product("producto x 99", "MarcaGenerica", "Hogar");
        let b = product("producto y 1", "OtraMarca", "Otro");
        let base = score_pair(&a, &b, 1000.0, 1000.0, ExternalSignals::default());
        let boosted = score_pair(
            &a,
            &b,
            1000.0,
            1000.0,
            ExternalSignals {
                embedding_similarity: None,
                tier_agreement: Some(true),
            },
        );
        assert!(boosted.score > base.score);
        assert!(boosted.score - base.score <= 0.1 + 1e-9);
    }

    #[test]
    fn min_similarity_gate() {
        let a = product("iphone 15 pro", "Apple", "Celulares");
        let b = product("iphone 15 pro", "Apple", "Celulares");
        let scored = score_pair(&a, &b, 900_000.0, 890_000.0, ExternalSignals::default());
        assert!(is_acceptable(&scored, 0.85));
        assert!(!is_acceptable(&scored, 0.999));
    }
}
