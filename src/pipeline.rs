//! Full-cycle pipeline glue: runs the Orchestrator, cross-matches
//! newly-seen products within each category, persists matches, scores
//! opportunities, and forwards alert-worthy ones — generalizing the
//! teacher's `main.rs` top-level task wiring from one flat event loop
//! into the `CycleRunner` seam the Scheduler drives.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::alerts::{AlertSender, DispatchEvent};
use crate::db::DbPool;
use crate::metrics::Metrics;
use crate::models::{ArbitrageOpportunity, Product, ProductMatch, Retailer, Tier};
use crate::opportunity::{OpportunityDetector, PriceSide};
use crate::orchestrator::Orchestrator;
use crate::scheduler::CycleRunner;
use crate::similarity::{is_acceptable, score_pair, ExternalSignals};
use crate::store::VolatilityStore;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_similarity_score: f64,
}

pub struct Pipeline {
    pool: DbPool,
    orchestrator: Orchestrator,
    config: PipelineConfig,
    detector: OpportunityDetector,
    volatility: Arc<dyn VolatilityStore>,
    alert_tx: Option<AlertSender>,
    metrics: Arc<Metrics>,
}

impl Pipeline {
    pub fn new(
        pool: DbPool,
        orchestrator: Orchestrator,
        config: PipelineConfig,
        detector: OpportunityDetector,
        volatility: Arc<dyn VolatilityStore>,
        alert_tx: Option<AlertSender>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            config,
            detector,
            volatility,
            alert_tx,
            metrics,
        }
    }

    /// Scrape, then re-score every active cross-retailer pair sharing a
    /// category, persisting matches and any opportunity that clears
    /// the Detector's rules and belongs to `tier`.
    pub async fn run_cycle(&self, tier: Tier) -> anyhow::Result<u32> {
        let cycle = self.orchestrator.run_cycle().await;
        self.metrics.inc_products_scraped(cycle.products_seen);
        self.metrics.inc_products_accepted(cycle.products_accepted);
        self.metrics.inc_products_rejected(cycle.products_rejected);

        let conn = self.pool.get()?;
        let created = self.match_and_detect(&conn, tier, Utc::now())?;
        self.metrics.inc_opportunities_detected(created as u64);
        Ok(created)
    }

    fn match_and_detect(&self, conn: &Connection, tier: Tier, now: DateTime<Utc>) -> anyhow::Result<u32> {
        let by_category = load_active_products_by_category(conn)?;
        let match_store = crate::matches::MatchStore::new(conn);
        let mut created = 0u32;

        for group in by_category.values() {
            for i in 0..group.len() {
                for j in (i + 1)..group.len() {
                    let a = &group[i];
                    let b = &group[j];
                    if a.retailer == b.retailer {
                        continue;
                    }

                    let (price_a, price_b) = match (latest_price(conn, &a.internal_code)?, latest_price(conn, &b.internal_code)?) {
                        (Some(pa), Some(pb)) => (pa, pb),
                        _ => continue,
                    };

                    let scored = score_pair(a, b, price_a, price_b, ExternalSignals::default());
                    if !is_acceptable(&scored, self.config.min_similarity_score) {
                        continue;
                    }

                    let m = ProductMatch::ordered(
                        a.internal_code.clone(),
                        b.internal_code.clone(),
                        scored.score,
                        scored.confidence,
                        scored.match_type,
                        scored.features.clone(),
                        None,
                    );
                    match_store.upsert(&m)?;

                    let volatility_risk = (self.volatility.risk(&a.internal_code) + self.volatility.risk(&b.internal_code)) / 2.0;
                    let side_a = PriceSide {
                        retailer: a.retailer,
                        price: price_a,
                        code: &a.internal_code,
                    };
                    let side_b = PriceSide {
                        retailer: b.retailer,
                        price: price_b,
                        code: &b.internal_code,
                    };

                    let Some(opp) = self.detector.detect(None, side_a, side_b, scored.score, Some(volatility_risk), now) else {
                        continue;
                    };
                    if opp.tier != tier {
                        continue;
                    }

                    persist_opportunity(conn, &opp)?;
                    created += 1;
                    if let Some(tx) = &self.alert_tx {
                        let _ = tx.send(DispatchEvent::Opportunity(opp));
                    }
                }
            }
        }

        Ok(created)
    }
}

#[async_trait::async_trait]
impl CycleRunner for Pipeline {
    async fn run_cycle(&self, tier: Tier) -> anyhow::Result<u32> {
        Pipeline::run_cycle(self, tier).await
    }
}

fn load_active_products_by_category(conn: &Connection) -> anyhow::Result<HashMap<String, Vec<Product>>> {
    let mut stmt = conn.prepare(
        "SELECT internal_code, retailer, category, name, brand, external_sku, link,
                storage, ram, color, screen, camera, rating, reviews_count,
                first_seen, last_seen, active
         FROM products WHERE active = 1 AND category IS NOT NULL",
    )?;
    let rows = stmt.query_map([], row_to_product)?;

    let mut by_category: HashMap<String, Vec<Product>> = HashMap::new();
    for row in rows {
        let product = row?;
        if let Some(category) = product.category.clone() {
            by_category.entry(category).or_default().push(product);
        }
    }
    Ok(by_category)
}

fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
    let retailer_str: String = row.get(1)?;
    let first_seen: String = row.get(14)?;
    let last_seen: String = row.get(15)?;
    Ok(Product {
        internal_code: row.get(0)?,
        retailer: Retailer::from_str_loose(&retailer_str),
        category: row.get(2)?,
        name: row.get(3)?,
        brand: row.get(4)?,
        external_sku: row.get(5)?,
        link: row.get(6)?,
        storage: row.get(7)?,
        ram: row.get(8)?,
        color: row.get(9)?,
        screen: row.get(10)?,
        camera: row.get(11)?,
        rating: row.get(12)?,
        reviews_count: row.get(13)?,
        first_seen: first_seen.parse().unwrap_or_else(|_| Utc::now()),
        last_seen: last_seen.parse().unwrap_or_else(|_| Utc::now()),
        active: row.get::<_, i64>(16)? != 0,
    })
}

/// Most recent best price (offer if present, else list) for a product.
fn latest_price(conn: &Connection, internal_code: &str) -> anyhow::Result<Option<f64>> {
    let row: Option<(Option<f64>, Option<f64>)> = conn
        .query_row(
            "SELECT price_offer, price_list FROM prices WHERE internal_code = ?1 ORDER BY date DESC LIMIT 1",
            params![internal_code],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    Ok(row.and_then(|(offer, list)| offer.or(list)))
}

fn persist_opportunity(conn: &Connection, opp: &ArbitrageOpportunity) -> anyhow::Result<()> {
    let detected_date = opp.detected_at.date_naive().to_string();
    let result = conn.execute(
        "INSERT INTO arbitrage_opportunities
            (cheap_code, expensive_code, match_id, buy_retailer, sell_retailer,
             buy_price, sell_price, margin_abs, margin_pct, roi, opportunity_score,
             confidence_score, risk_level, tier, detected_at, detected_date, expires_at, alerted)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
         ON CONFLICT(cheap_code, expensive_code, detected_date) DO UPDATE SET
            buy_price = excluded.buy_price,
            sell_price = excluded.sell_price,
            margin_abs = excluded.margin_abs,
            margin_pct = excluded.margin_pct,
            roi = excluded.roi,
            opportunity_score = excluded.opportunity_score,
            confidence_score = excluded.confidence_score,
            risk_level = excluded.risk_level,
            tier = excluded.tier,
            expires_at = excluded.expires_at",
        params![
            opp.cheap_code,
            opp.expensive_code,
            opp.match_id,
            opp.buy_retailer.as_str(),
            opp.sell_retailer.as_str(),
            opp.buy_price,
            opp.sell_price,
            opp.margin_abs,
            opp.margin_pct,
            opp.roi,
            opp.opportunity_score,
            opp.confidence_score,
            risk_level_str(opp.risk_level),
            opp.tier.as_str(),
            opp.detected_at.to_rfc3339(),
            detected_date,
            opp.expires_at.to_rfc3339(),
            opp.alerted as i64,
        ],
    );
    if let Err(e) = result {
        warn!(error = %e, cheap = %opp.cheap_code, expensive = %opp.expensive_code, "failed to persist opportunity");
        return Err(e.into());
    }
    debug!(cheap = %opp.cheap_code, expensive = %opp.expensive_code, tier = opp.tier.as_str(), "persisted opportunity");
    Ok(())
}

fn risk_level_str(r: crate::models::RiskLevel) -> &'static str {
    use crate::models::RiskLevel;
    match r {
        RiskLevel::Low => "low",
        RiskLevel::Medium => "medium",
        RiskLevel::High => "high",
        RiskLevel::VeryHigh => "very_high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_pool;
    use crate::ledger::PriceLedger;
    use crate::opportunity::DetectorConfig;
    use crate::orchestrator::OrchestratorConfig;
    use crate::processor::ProductProcessor;
    use crate::scrapers::{FakeRetailerWorker, RetailerWorker};
    use crate::sku::SkuGenerator;
    use crate::store::InMemoryVolatilityStore;
    use std::collections::HashSet;

    fn pipeline(pool: DbPool, min_similarity: f64) -> Pipeline {
        let sku_gen = Arc::new(SkuGenerator::new());
        let ledger = PriceLedger::new(0.05, std::time::Duration::from_secs(60));
        let processor = Arc::new(ProductProcessor::new(pool.clone(), sku_gen, ledger, 50, None));

        let workers: Vec<Arc<dyn RetailerWorker>> = vec![
            Arc::new(FakeRetailerWorker::new(Retailer::Falabella, 1)),
            Arc::new(FakeRetailerWorker::new(Retailer::Ripley, 1)),
        ];
        let orchestrator_config = OrchestratorConfig {
            categories: vec!["celulares".to_string()],
            max_products_per_category: 5,
            parallel: true,
        };
        let orchestrator = Orchestrator::new(orchestrator_config, processor, workers);

        let detector = OpportunityDetector::new(DetectorConfig {
            min_margin_clp: 1.0,
            min_percentage: 0.0,
            max_price_ratio: 100.0,
            enabled_retailers: HashSet::new(),
        });

        Pipeline::new(
            pool,
            orchestrator,
            PipelineConfig { min_similarity_score: min_similarity },
            detector,
            Arc::new(InMemoryVolatilityStore::new()),
            None,
            Metrics::new(),
        )
    }

    #[tokio::test]
    async fn cycle_creates_cross_retailer_match_and_opportunity() {
        let pool = open_test_pool().unwrap();
        let pl = pipeline(pool.clone(), 0.01);

        let created = pl.run_cycle(Tier::Tracking).await.unwrap();
        // FakeRetailerWorker yields identically-named products per category,
        // so the single Falabella/Ripley pair should score as an exact match
        // and clear the permissive detector config above for *some* tier.
        let conn = pool.get().unwrap();
        let match_count: i64 = conn.query_row("SELECT count(*) FROM product_matches", [], |r| r.get(0)).unwrap();
        assert_eq!(match_count, 1);
        assert!(created <= 1);
    }

    #[tokio::test]
    async fn no_match_below_similarity_threshold() {
        let pool = open_test_pool().unwrap();
        let pl = pipeline(pool.clone(), 0.999);

        pl.run_cycle(Tier::Tracking).await.unwrap();
        let conn = pool.get().unwrap();
        let match_count: i64 = conn.query_row("SELECT count(*) FROM product_matches", [], |r| r.get(0)).unwrap();
        assert_eq!(match_count, 0);
    }
}
