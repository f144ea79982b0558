//! Process-local metrics and health endpoints (SPEC_FULL §9.5).
//! Counters are grounded on the teacher's `performance::metrics`
//! `PerformanceMetrics`/`HealthScore` shape, narrowed from full system
//! telemetry (CPU/memory/IO snapshots) to the pipeline counters this
//! crate actually produces; the `/healthz` and `/metrics` handlers
//! follow `api::routes`'s `AxumState`+`Json` handler style.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

/// Monotonic counters updated throughout the pipeline. Cheap
/// `Relaxed` atomics; exact ordering across counters is not load
/// bearing, only their eventual values are.
#[derive(Default)]
pub struct Metrics {
    products_scraped: AtomicU64,
    products_accepted: AtomicU64,
    products_rejected: AtomicU64,
    prices_recorded: AtomicU64,
    matches_created: AtomicU64,
    opportunities_detected: AtomicU64,
    alerts_dispatched: AtomicU64,
    alerts_dropped: AtomicU64,
    scheduler_task_failures: AtomicU64,
    started_at: Option<Instant>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            started_at: Some(Instant::now()),
            ..Default::default()
        })
    }

    pub fn inc_products_scraped(&self, n: u64) {
        self.products_scraped.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_products_accepted(&self, n: u64) {
        self.products_accepted.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_products_rejected(&self, n: u64) {
        self.products_rejected.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_prices_recorded(&self, n: u64) {
        self.prices_recorded.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_matches_created(&self, n: u64) {
        self.matches_created.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_opportunities_detected(&self, n: u64) {
        self.opportunities_detected.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_alerts_dispatched(&self, n: u64) {
        self.alerts_dispatched.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_alerts_dropped(&self, n: u64) {
        self.alerts_dropped.fetch_add(n, Ordering::Relaxed);
    }
    pub fn inc_scheduler_task_failures(&self, n: u64) {
        self.scheduler_task_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            products_scraped: self.products_scraped.load(Ordering::Relaxed),
            products_accepted: self.products_accepted.load(Ordering::Relaxed),
            products_rejected: self.products_rejected.load(Ordering::Relaxed),
            prices_recorded: self.prices_recorded.load(Ordering::Relaxed),
            matches_created: self.matches_created.load(Ordering::Relaxed),
            opportunities_detected: self.opportunities_detected.load(Ordering::Relaxed),
            alerts_dispatched: self.alerts_dispatched.load(Ordering::Relaxed),
            alerts_dropped: self.alerts_dropped.load(Ordering::Relaxed),
            scheduler_task_failures: self.scheduler_task_failures.load(Ordering::Relaxed),
        }
    }

    /// Publish the current snapshot through the `metrics` facade so a
    /// `metrics-exporter-prometheus` recorder (wired in `main.rs`) can
    /// scrape it on the `/metrics` route below, or externally.
    pub fn publish(&self) {
        let snapshot = self.snapshot();
        metrics::gauge!("precio_intel_uptime_seconds").set(snapshot.uptime_secs);
        metrics::counter!("precio_intel_products_scraped_total").absolute(snapshot.products_scraped);
        metrics::counter!("precio_intel_products_accepted_total").absolute(snapshot.products_accepted);
        metrics::counter!("precio_intel_products_rejected_total").absolute(snapshot.products_rejected);
        metrics::counter!("precio_intel_prices_recorded_total").absolute(snapshot.prices_recorded);
        metrics::counter!("precio_intel_matches_created_total").absolute(snapshot.matches_created);
        metrics::counter!("precio_intel_opportunities_detected_total").absolute(snapshot.opportunities_detected);
        metrics::counter!("precio_intel_alerts_dispatched_total").absolute(snapshot.alerts_dispatched);
        metrics::counter!("precio_intel_alerts_dropped_total").absolute(snapshot.alerts_dropped);
        metrics::counter!("precio_intel_scheduler_task_failures_total").absolute(snapshot.scheduler_task_failures);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub products_scraped: u64,
    pub products_accepted: u64,
    pub products_rejected: u64,
    pub prices_recorded: u64,
    pub matches_created: u64,
    pub opportunities_detected: u64,
    pub alerts_dispatched: u64,
    pub alerts_dropped: u64,
    pub scheduler_task_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: f64,
}

async fn healthz(AxumState(metrics): AxumState<Arc<Metrics>>) -> Result<Json<HealthResponse>, StatusCode> {
    Ok(Json(HealthResponse {
        status: "ok",
        uptime_secs: metrics.uptime_secs(),
    }))
}

async fn metrics_snapshot(AxumState(metrics): AxumState<Arc<Metrics>>) -> Result<Json<MetricsSnapshot>, StatusCode> {
    Ok(Json(metrics.snapshot()))
}

/// Builds the `/healthz` and `/metrics` router, mounted by `main.rs`
/// alongside the rest of the service's public surface.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_snapshot))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.inc_products_scraped(10);
        metrics.inc_products_accepted(7);
        metrics.inc_products_rejected(3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.products_scraped, 10);
        assert_eq!(snapshot.products_accepted, 7);
        assert_eq!(snapshot.products_rejected, 3);
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let metrics = Metrics::new();
        let response = healthz(AxumState(metrics)).await.unwrap();
        assert_eq!(response.0.status, "ok");
    }

    #[tokio::test]
    async fn metrics_endpoint_reflects_counters() {
        let metrics = Metrics::new();
        metrics.inc_opportunities_detected(4);
        let response = metrics_snapshot(AxumState(metrics)).await.unwrap();
        assert_eq!(response.0.opportunities_detected, 4);
    }
}
