//! Retailer worker collaborator interface (§4.5): the Orchestrator
//! drives one `RetailerWorker` per configured retailer and forwards
//! whatever products it yields to the Product Processor. Concrete
//! scraping backends (headless browser, vendor API client) are outside
//! this crate's scope; a deterministic in-memory fake is provided for
//! tests and local runs.

use async_trait::async_trait;

use crate::models::{RawProductRecord, Retailer};
use crate::traffic::TrafficRouter;

/// Outcome of one worker pass over a single category.
#[derive(Debug, Clone, Default)]
pub struct ScrapingResult {
    pub retailer: Retailer,
    pub category: String,
    pub products: Vec<RawProductRecord>,
    pub pages_visited: u32,
    pub errors: Vec<String>,
}

impl ScrapingResult {
    pub fn is_success(&self) -> bool {
        !self.products.is_empty() || self.errors.is_empty()
    }
}

/// A source of `RawProductRecord`s for one retailer. Implementations
/// own their own HTTP/browser client; the Orchestrator only needs this
/// trait surface to stay retailer-agnostic, mirroring how the
/// teacher's execution adapters present a uniform interface over very
/// different venue clients.
#[async_trait]
pub trait RetailerWorker: Send + Sync {
    fn retailer(&self) -> Retailer;

    /// Scrape one category, yielding up to `max_products` raw records.
    /// Must never panic on a single bad product; collect failures into
    /// `ScrapingResult::errors` instead so one malformed page doesn't
    /// abort the whole category.
    async fn scrape_category(&self, category: &str, max_products: u32) -> ScrapingResult;
}

/// Deterministic in-memory worker used by tests and local dry runs.
/// Produces `count` synthetic products per category from a fixed
/// template, routed through a `TrafficRouter` purely to exercise the
/// decision path (no network I/O actually happens).
pub struct FakeRetailerWorker {
    retailer: Retailer,
    count: u32,
    router: TrafficRouter,
}

impl FakeRetailerWorker {
    pub fn new(retailer: Retailer, count: u32) -> Self {
        Self {
            retailer,
            count,
            router: TrafficRouter::new(Default::default()),
        }
    }
}

#[async_trait]
impl RetailerWorker for FakeRetailerWorker {
    fn retailer(&self) -> Retailer {
        self.retailer
    }

    async fn scrape_category(&self, category: &str, max_products: u32) -> ScrapingResult {
        let host = format!("{}.cl", self.retailer.as_str());
        let _decision = self.router.decide(&host);

        let n = self.count.min(max_products);
        let products = (0..n)
            .map(|i| RawProductRecord {
                retailer: self.retailer,
                external_sku: Some(format!("{}-{}-{}", self.retailer.as_str(), category, i)),
                link: format!("https://{}/p/{}/{}", host, category, i),
                name: format!("{} producto {}", category, i),
                brand: Some("GenericBrand".to_string()),
                category: Some(category.to_string()),
                storage: None,
                ram: None,
                color: None,
                screen: None,
                camera: None,
                rating: Some(4.2),
                reviews_count: Some(10 + i),
                original_price_raw: Some(format!("{}", 100_000 + i * 1_000)),
                current_price_raw: Some(format!("{}", 90_000 + i * 1_000)),
                price_card_raw: None,
            })
            .collect();

        ScrapingResult {
            retailer: self.retailer,
            category: category.to_string(),
            products,
            pages_visited: 1,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_worker_yields_requested_count() {
        let worker = FakeRetailerWorker::new(Retailer::Falabella, 5);
        let result = worker.scrape_category("celulares", 3).await;
        assert_eq!(result.products.len(), 3);
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn fake_worker_tags_products_with_retailer() {
        let worker = FakeRetailerWorker::new(Retailer::Ripley, 2);
        let result = worker.scrape_category("notebooks", 10).await;
        assert_eq!(result.products.len(), 2);
        assert!(result.products.iter().all(|p| p.retailer == Retailer::Ripley));
    }
}
