//! Orchestrator (§4.5): drives one `RetailerWorker` per configured
//! retailer over a fixed category list and forwards every yielded
//! record to the Product Processor, the way the teacher's `main.rs`
//! drives independent venue workers off a single shared pipeline.
//!
//! A single retailer's worker erroring must never abort the rest of
//! the cycle — each worker's future is awaited independently and its
//! failure is folded into `CycleStats` instead of propagated.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::processor::ProductProcessor;
use crate::scrapers::RetailerWorker;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub categories: Vec<String>,
    pub max_products_per_category: u32,
    pub parallel: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            categories: vec!["celulares".to_string(), "notebooks".to_string()],
            max_products_per_category: 200,
            parallel: true,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CycleStats {
    pub workers_run: u32,
    pub workers_failed: u32,
    pub products_seen: u64,
    pub products_accepted: u64,
    pub products_rejected: u64,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    processor: Arc<ProductProcessor>,
    workers: Vec<Arc<dyn RetailerWorker>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        processor: Arc<ProductProcessor>,
        workers: Vec<Arc<dyn RetailerWorker>>,
    ) -> Self {
        Self {
            config,
            processor,
            workers,
        }
    }

    /// Run one full cycle: every worker scrapes every configured
    /// category and every record it yields is pushed into the
    /// processor as soon as it arrives.
    pub async fn run_cycle(&self) -> CycleStats {
        let before = self.processor.stats();

        let tasks = self.workers.iter().map(|worker| {
            let worker = Arc::clone(worker);
            let processor = Arc::clone(&self.processor);
            let categories = self.config.categories.clone();
            let max_products = self.config.max_products_per_category;
            async move { run_worker(worker, processor, categories, max_products).await }
        });

        let mut stats = CycleStats::default();
        if self.config.parallel {
            for outcome in join_all(tasks).await {
                fold_outcome(&mut stats, outcome);
            }
        } else {
            for task in tasks {
                fold_outcome(&mut stats, task.await);
            }
        }

        if let Err(e) = self.processor.flush() {
            error!(error = %e, "failed to flush processor at end of cycle");
        }

        let after = self.processor.stats();
        stats.products_accepted = after.accepted - before.accepted;
        stats.products_rejected = after.rejected - before.rejected;
        info!(
            workers_run = stats.workers_run,
            workers_failed = stats.workers_failed,
            accepted = stats.products_accepted,
            rejected = stats.products_rejected,
            "orchestrator cycle complete"
        );
        stats
    }
}

/// Scrape every category for one retailer and push each product into
/// the processor. Returns the number of products seen, or an error
/// describing why this worker as a whole is counted as failed; either
/// way the caller continues on to the remaining workers.
async fn run_worker(
    worker: Arc<dyn RetailerWorker>,
    processor: Arc<ProductProcessor>,
    categories: Vec<String>,
    max_products: u32,
) -> Result<u64, String> {
    let retailer = worker.retailer();
    let mut seen = 0u64;
    let mut any_success = false;

    for category in &categories {
        let result = worker.scrape_category(category, max_products).await;
        if !result.errors.is_empty() {
            warn!(
                retailer = retailer.as_str(),
                category,
                errors = ?result.errors,
                "worker reported partial errors for category"
            );
        }

        seen += result.products.len() as u64;
        if !result.products.is_empty() {
            any_success = true;
        }

        for product in result.products {
            if let Err(e) = processor.process(product) {
                error!(
                    retailer = retailer.as_str(),
                    category,
                    error = %e,
                    "processor rejected a product due to an internal error"
                );
            }
        }
    }

    if !any_success && seen == 0 {
        return Err(format!("{} yielded no products across any category", retailer.as_str()));
    }
    Ok(seen)
}

fn fold_outcome(stats: &mut CycleStats, outcome: Result<u64, String>) {
    stats.workers_run += 1;
    match outcome {
        Ok(seen) => {
            stats.products_seen += seen;
        }
        Err(reason) => {
            stats.workers_failed += 1;
            error!(reason, "retailer worker failed, continuing with remaining workers");
        }
    }
}
