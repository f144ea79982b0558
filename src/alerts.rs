//! Alert Dispatcher (§4.9).
//!
//! Consumes three event streams — price-change-significant (from the
//! Ledger), arbitrage-opportunity (from the Detector), and
//! system-health — applies a per-kind threshold filter, formats a
//! structured message, and hands off to an external transport. Dispatch
//! is fire-and-forget but retried once on transport failure; on a
//! second failure the event is logged and dropped, matching
//! `signals::quality::SignalQualityGate`'s filter-then-log shape in the
//! teacher crate.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::Config;
use crate::models::{ArbitrageOpportunity, PriceChangeEvent};

/// The three event kinds the dispatcher fans in.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    PriceChange(PriceChangeEvent),
    Opportunity(ArbitrageOpportunity),
    Health(HealthEvent),
}

#[derive(Debug, Clone)]
pub struct HealthEvent {
    pub component: String,
    pub healthy: bool,
    pub detail: String,
}

/// Out-of-scope transport collaborator (spec.md §1: "the Telegram
/// alert transport" is a collaborator). `LoggingTransport` is the
/// default/test implementation; a real deployment would plug in a
/// Telegram (or other) transport behind this trait.
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// Writes structured `tracing` events instead of calling out to a real
/// transport. Used as the default and in all tests.
pub struct LoggingTransport;

#[async_trait]
impl AlertTransport for LoggingTransport {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        tracing::info!(target: "alerts", "{}", message);
        Ok(())
    }
}

/// A thin HTTP-based transport seam (reqwest), left unimplemented
/// beyond construction — documents where a real Telegram/webhook
/// transport would plug in without implementing that out-of-scope
/// integration.
pub struct HttpAlertTransport {
    client: reqwest::Client,
    webhook_url: String,
}

impl HttpAlertTransport {
    pub fn new(webhook_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }
}

#[async_trait]
impl AlertTransport for HttpAlertTransport {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": message }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct AlertDispatcher {
    config: Config,
    transport: Box<dyn AlertTransport>,
    rx: mpsc::UnboundedReceiver<DispatchEvent>,
}

/// Paired sender handed to the Ledger, Detector, and health probes.
pub type AlertSender = mpsc::UnboundedSender<DispatchEvent>;

impl AlertDispatcher {
    pub fn new(config: Config, transport: Box<dyn AlertTransport>) -> (Self, AlertSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                transport,
                rx,
            },
            tx,
        )
    }

    /// Drain the channel, dispatching each event that passes its
    /// threshold filter. Runs until the channel is closed (all senders
    /// dropped) — callers typically `tokio::spawn` this alongside the
    /// scheduler loop and drop it during shutdown drain.
    pub async fn run(mut self) {
        while let Some(event) = self.rx.recv().await {
            self.handle(event).await;
        }
    }

    async fn handle(&self, event: DispatchEvent) {
        let message = match self.filter_and_format(&event) {
            Some(m) => m,
            None => return,
        };
        self.dispatch_with_retry(&message).await;
    }

    fn filter_and_format(&self, event: &DispatchEvent) -> Option<String> {
        match event {
            DispatchEvent::PriceChange(e) => {
                if !self.config.enable_auto_alerts {
                    return None;
                }
                Some(format_price_change(e, self.config.enable_emoji_alerts))
            }
            DispatchEvent::Opportunity(o) => {
                let passes = o.margin_abs >= self.config.alert_high_value_threshold
                    || o.roi >= self.config.alert_high_roi_threshold;
                if !passes {
                    return None;
                }
                Some(format_opportunity(o, self.config.enable_emoji_alerts))
            }
            DispatchEvent::Health(h) => {
                if h.healthy {
                    return None;
                }
                Some(format!("[health] {} degraded: {}", h.component, h.detail))
            }
        }
    }

    async fn dispatch_with_retry(&self, message: &str) {
        if self.transport.send(message).await.is_ok() {
            return;
        }
        warn!("alert transport failed on first attempt, retrying once");
        if let Err(e) = self.transport.send(message).await {
            error!(error = %e, "alert transport failed twice, dropping event");
        }
    }
}

fn format_price_change(e: &PriceChangeEvent, emoji: bool) -> String {
    let marker = if emoji { "💰 " } else { "" };
    format!(
        "{marker}price {} changed for {} ({}): {:.0} -> {:.0} ({:+.1}%)",
        e.field.as_str(),
        e.internal_code,
        e.retailer.as_str(),
        e.old_price,
        e.new_price,
        e.pct_change,
    )
}

fn format_opportunity(o: &ArbitrageOpportunity, emoji: bool) -> String {
    let marker = if emoji { "🎯 " } else { "" };
    format!(
        "{marker}[{}] buy {} on {} at {:.0}, sell {} on {} at {:.0} — margin {:.0} ({:.1}%), roi {:.1}%",
        o.tier.as_str(),
        o.cheap_code,
        o.buy_retailer.as_str(),
        o.buy_price,
        o.expensive_code,
        o.sell_retailer.as_str(),
        o.sell_price,
        o.margin_abs,
        o.margin_pct,
        o.roi,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct RecordingTransport {
        sent: Arc<Mutex<Vec<String>>>,
        fail_times: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl AlertTransport for RecordingTransport {
        async fn send(&self, message: &str) -> anyhow::Result<()> {
            let mut remaining = self.fail_times.lock();
            if *remaining > 0 {
                *remaining -= 1;
                anyhow::bail!("simulated transport failure");
            }
            self.sent.lock().push(message.to_string());
            Ok(())
        }
    }

    fn test_config() -> Config {
        let mut cfg = Config::from_env().unwrap();
        cfg.alert_high_value_threshold = 50_000.0;
        cfg.alert_high_roi_threshold = 10.0;
        cfg.enable_auto_alerts = true;
        cfg
    }

    #[tokio::test]
    async fn low_margin_opportunity_is_not_dispatched() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: sent.clone(),
            fail_times: Arc::new(Mutex::new(0)),
        };
        let (dispatcher, tx) = AlertDispatcher::new(test_config(), Box::new(transport));
        let handle = tokio::spawn(dispatcher.run());

        let opp = sample_opportunity(1_000.0, 1.0);
        tx.send(DispatchEvent::Opportunity(opp)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(sent.lock().is_empty());
    }

    #[tokio::test]
    async fn high_margin_opportunity_is_dispatched() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: sent.clone(),
            fail_times: Arc::new(Mutex::new(0)),
        };
        let (dispatcher, tx) = AlertDispatcher::new(test_config(), Box::new(transport));
        let handle = tokio::spawn(dispatcher.run());

        let opp = sample_opportunity(80_000.0, 8.0);
        tx.send(DispatchEvent::Opportunity(opp)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn transport_failure_retried_once_then_dropped() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = RecordingTransport {
            sent: sent.clone(),
            fail_times: Arc::new(Mutex::new(2)),
        };
        let (dispatcher, tx) = AlertDispatcher::new(test_config(), Box::new(transport));
        let handle = tokio::spawn(dispatcher.run());

        let opp = sample_opportunity(80_000.0, 8.0);
        tx.send(DispatchEvent::Opportunity(opp)).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(sent.lock().is_empty());
    }

    fn sample_opportunity(margin_abs: f64, roi: f64) -> ArbitrageOpportunity {
        use crate::models::{Retailer, RiskLevel, Tier};
        ArbitrageOpportunity {
            cheap_code: "FAL0000001".into(),
            expensive_code: "RIP0000002".into(),
            match_id: None,
            buy_retailer: Retailer::Falabella,
            sell_retailer: Retailer::Ripley,
            buy_price: 100_000.0,
            sell_price: 100_000.0 + margin_abs,
            margin_abs,
            margin_pct: margin_abs / 100_000.0 * 100.0,
            roi,
            opportunity_score: 0.7,
            confidence_score: 0.7,
            risk_level: RiskLevel::Medium,
            tier: Tier::Tracking,
            predicted_duration_hours: 12.0,
            detected_at: Utc::now(),
            expires_at: Utc::now(),
            optimal_execution_time: Utc::now(),
            alerted: false,
        }
    }
}
