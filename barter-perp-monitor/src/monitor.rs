//! Cooperative run loop.
//!
//! Ingestion, evaluation ticks and digests are all driven from one task, so
//! each store mutation and each evaluation completes before the next one
//! starts and no locking is needed.

use crate::{
    config::MonitorConfig,
    engine::StrategyEngine,
    notifier::Notifier,
    summary::render_digest,
    types::MarketEventMessage,
};
use chrono::{DateTime, Utc};
use std::time::Duration as StdDuration;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};

pub struct Monitor<N> {
    engine: StrategyEngine,
    notifier: N,
    started: DateTime<Utc>,
}

impl<N: Notifier> Monitor<N> {
    pub fn new(config: MonitorConfig, notifier: N) -> Self {
        Self {
            engine: StrategyEngine::new(config),
            notifier,
            started: Utc::now(),
        }
    }

    /// Override the start time used for warmup gating.
    pub fn with_start(mut self, started: DateTime<Utc>) -> Self {
        self.started = started;
        self
    }

    pub fn engine(&self) -> &StrategyEngine {
        &self.engine
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn on_event(&mut self, event: MarketEventMessage, now: DateTime<Utc>) {
        if let Err(e) = self.engine.process_event(event, now) {
            debug!("Skipped sample: {}", e);
        }
    }

    /// Evaluate all instruments and hand alerts to the notifier. Returns the
    /// number of alerts produced, delivered or not.
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> usize {
        if now - self.started < self.engine.config().warmup {
            return 0;
        }

        let alerts = self.engine.tick(now);
        for alert in &alerts {
            if let Err(e) = self.notifier.send(alert) {
                error!("Failed to deliver {} alert for {}: {}", alert.category, alert.instrument, e);
            }
        }
        alerts.len()
    }

    /// Send the abnormal-state digest if anything is abnormal. Returns whether
    /// a digest was produced.
    pub fn on_digest(&mut self, now: DateTime<Utc>) -> bool {
        let records = self.engine.summary(now);
        let Some(text) = render_digest(&records, now) else {
            return false;
        };

        match self.notifier.send_digest(&text) {
            Ok(()) => info!("Sent digest: {} abnormal instruments", records.len()),
            Err(e) => error!("Failed to deliver digest: {}", e),
        }
        true
    }

    /// Drive the monitor until the event channel closes, then hand it back.
    ///
    /// Falling behind the feed drops the oldest events; the loop never blocks
    /// the producer.
    pub async fn run(mut self, mut events: broadcast::Receiver<MarketEventMessage>) -> Self {
        let config = self.engine.config();
        let tick_period = to_std(config.tick_interval);
        let digest_period = to_std(config.digest_interval);

        let mut tick = interval_at(Instant::now() + tick_period, tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut digest = interval_at(Instant::now() + digest_period, digest_period);
        digest.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Monitor running (tick {:?}, digest {:?})",
            tick_period, digest_period
        );

        loop {
            tokio::select! {
                maybe_event = events.recv() => match maybe_event {
                    Ok(event) => self.on_event(event, Utc::now()),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Monitor lagging behind feed, dropped {} oldest events", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Event channel closed, stopping monitor");
                        break;
                    }
                },
                _ = tick.tick() => {
                    self.on_tick(Utc::now());
                }
                _ = digest.tick() => {
                    self.on_digest(Utc::now());
                }
            }
        }

        self
    }
}

fn to_std(duration: chrono::Duration) -> StdDuration {
    duration.to_std().unwrap_or(StdDuration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alert::AlertCategory,
        notifier::{ChannelNotifier, Outbound},
        types::InstrumentInfo,
    };

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn funding_event(rate: &str) -> MarketEventMessage {
        MarketEventMessage {
            time_exchange: t(0),
            time_received: t(0),
            exchange: "BinanceFuturesUsd".to_string(),
            instrument: InstrumentInfo {
                base: "btc".to_string(),
                quote: "usdt".to_string(),
                kind: "Perpetual".to_string(),
            },
            kind: "funding_rate".to_string(),
            data: serde_json::json!({ "rate": rate }),
        }
    }

    #[test]
    fn test_warmup_gates_evaluation() {
        let (notifier, mut rx) = ChannelNotifier::channel(8);
        let mut monitor = Monitor::new(MonitorConfig::default(), notifier).with_start(t(0));

        monitor.on_event(funding_event("0.021"), t(1));
        assert_eq!(monitor.on_tick(t(30)), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(monitor.on_tick(t(60)), 1);
        match rx.try_recv().unwrap() {
            Outbound::Alert(alert) => {
                assert_eq!(alert.instrument, "BTCUSDT");
                assert_eq!(alert.category, AlertCategory::Funding);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_failed_delivery_still_advances_state() {
        let (notifier, rx) = ChannelNotifier::channel(8);
        drop(rx);
        let mut monitor = Monitor::new(MonitorConfig::default(), notifier).with_start(t(0));

        monitor.on_event(funding_event("0.021"), t(100));
        assert_eq!(monitor.on_tick(t(100)), 1);
        // Same reading, no alert storm on the next tick
        assert_eq!(monitor.on_tick(t(105)), 0);
        assert_eq!(monitor.engine().funding_state("BTCUSDT").unwrap().level, 4);
    }

    #[test]
    fn test_digest_sent_only_when_abnormal() {
        let (notifier, mut rx) = ChannelNotifier::channel(8);
        let mut monitor = Monitor::new(MonitorConfig::default(), notifier).with_start(t(0));

        assert!(!monitor.on_digest(t(100)));

        monitor.on_event(funding_event("0.012"), t(100));
        monitor.on_tick(t(100));
        let _ = rx.try_recv();

        assert!(monitor.on_digest(t(110)));
        match rx.try_recv().unwrap() {
            Outbound::Digest(text) => assert!(text.contains("⚠️ BTCUSDT")),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_drains_events_until_channel_closes() {
        let (notifier, _rx) = ChannelNotifier::channel(8);
        let monitor = Monitor::new(MonitorConfig::default(), notifier);

        let (tx, events) = broadcast::channel(8);
        tx.send(funding_event("0.0001")).unwrap();
        tx.send(funding_event("0.0002")).unwrap();
        drop(tx);

        let monitor = monitor.run(events).await;
        let store = monitor.engine().store("BTCUSDT").unwrap();
        assert_eq!(store.sample_count(crate::store::SeriesKind::Funding), 2);
        assert!((store.funding_rate() - 0.0002).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_run_skips_dropped_events_after_lag() {
        let (notifier, _rx) = ChannelNotifier::channel(8);
        let monitor = Monitor::new(MonitorConfig::default(), notifier);

        let (tx, events) = broadcast::channel(2);
        for rate in ["0.0001", "0.0002", "0.0003", "0.0004", "0.0005"] {
            tx.send(funding_event(rate)).unwrap();
        }
        drop(tx);

        let monitor = monitor.run(events).await;
        let store = monitor.engine().store("BTCUSDT").unwrap();
        assert_eq!(store.sample_count(crate::store::SeriesKind::Funding), 2);
        assert!((store.funding_rate() - 0.0005).abs() < 1e-12);
    }
}
