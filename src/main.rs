//! Entry point: loads configuration, opens the database, wires the
//! Orchestrator/Similarity/Match/Opportunity/Alert pipeline behind the
//! Scheduler, and serves `/healthz` + `/metrics` until SIGINT/SIGTERM.

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use precio_intel::alerts::{AlertDispatcher, LoggingTransport};
use precio_intel::config::Config;
use precio_intel::db;
use precio_intel::ledger::PriceLedger;
use precio_intel::metrics::Metrics;
use precio_intel::models::Retailer;
use precio_intel::opportunity::{DetectorConfig, OpportunityDetector};
use precio_intel::orchestrator::{Orchestrator, OrchestratorConfig};
use precio_intel::pipeline::{Pipeline, PipelineConfig};
use precio_intel::processor::ProductProcessor;
use precio_intel::scheduler::Scheduler;
use precio_intel::scrapers::{FakeRetailerWorker, RetailerWorker};
use precio_intel::sku::SkuGenerator;
use precio_intel::store::InMemoryVolatilityStore;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run().await {
        Ok(true) => ExitCode::from(130),
        Ok(false) => ExitCode::from(0),
        Err(e) => {
            error!(error = %e, "fatal startup or run error");
            ExitCode::from(1)
        }
    }
}

/// Runs until shutdown. Returns `Ok(true)` if shutdown was triggered by
/// an interrupt signal (exit code 130 per POSIX convention), `Ok(false)`
/// for any other clean termination.
async fn run() -> Result<bool> {
    let config = Config::from_env().context("failed to load configuration")?;
    info!(database_path = %config.database_path, "starting");

    let pool = db::open_pool(&config.database_path, 10).context("failed to open database pool")?;

    let sku_gen = Arc::new(SkuGenerator::new());
    let ledger = PriceLedger::new(config.price_alert_threshold, config.freeze_window);
    let metrics = Metrics::new();

    let (dispatcher, alert_tx) = AlertDispatcher::new(config.clone(), Box::new(LoggingTransport));
    let shutdown = CancellationToken::new();

    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run().await;
    });

    let processor = Arc::new(ProductProcessor::new(
        pool.clone(),
        sku_gen,
        ledger,
        config.batch_size,
        Some(alert_tx.clone()),
    ));

    let workers = build_workers(&config.retailers_enabled);
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::default(),
        processor,
        workers,
    );

    let detector = OpportunityDetector::new(DetectorConfig {
        min_margin_clp: config.min_margin_clp,
        min_percentage: config.min_percentage,
        max_price_ratio: config.max_price_ratio,
        enabled_retailers: config.retailers_enabled.iter().cloned().collect(),
    });

    let pipeline = Arc::new(Pipeline::new(
        pool.clone(),
        orchestrator,
        PipelineConfig {
            min_similarity_score: config.min_similarity_score,
        },
        detector,
        Arc::new(InMemoryVolatilityStore::new()),
        Some(alert_tx),
        metrics.clone(),
    ));

    let scheduler = Arc::new(Scheduler::with_defaults(
        config.critical_tier_frequency_minutes,
        config.important_tier_frequency_minutes,
        config.tracking_tier_frequency_minutes,
    ));

    let scheduler_loop = {
        let scheduler = scheduler.clone();
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Scheduler::main_loop_interval());
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.tick(pipeline.as_ref()).await,
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    };

    let metrics_router = precio_intel::metrics::router(metrics.clone());
    let addr = format!("0.0.0.0:{}", config.metrics_port);
    let listener = TcpListener::bind(&addr).await.context("failed to bind metrics listener")?;
    info!(addr = %addr, "metrics/health server listening");

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, metrics_router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    shutdown.cancel();

    let _ = scheduler_loop.await;
    let _ = server_handle.await;
    drop(dispatcher_handle);

    Ok(true)
}

fn build_workers(retailers_enabled: &[String]) -> Vec<Arc<dyn RetailerWorker>> {
    let enabled: HashSet<&str> = retailers_enabled.iter().map(|s| s.as_str()).collect();
    let all = [
        Retailer::Falabella,
        Retailer::Ripley,
        Retailer::Paris,
        Retailer::Hites,
        Retailer::AbcDin,
        Retailer::Pcfactory,
    ];
    all.into_iter()
        .filter(|r| enabled.contains(r.as_str()))
        .map(|r| Arc::new(FakeRetailerWorker::new(r, 50)) as Arc<dyn RetailerWorker>)
        .collect()
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "precio_intel=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

