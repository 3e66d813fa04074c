//! Strategy engine.
//!
//! Owns every per-instrument structure (time series, funding state, cooldowns,
//! event cache). All mutation goes through `&mut self`, so a single owner
//! (the [`Monitor`](crate::monitor::Monitor) loop) serialises ingestion and
//! evaluation without locks.

use crate::{
    alert::{render_message, Alert, AlertCategory, MetricsSnapshot},
    cache::{CachedEvent, EventCache, EventCategory},
    config::MonitorConfig,
    detector::{detect_oi_shift, detect_price_shock, pct_change, CooldownRegistry, PriceMove},
    error::MonitorError,
    funding::FundingState,
    store::{SeriesKind, TimeSeriesStore},
    summary::{self, AbnormalRecord},
    types::{FundingRateData, MarkPriceData, MarketEventMessage, OpenInterestData, TradeData},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::{debug, info, warn};

const OI_WINDOW_SECS: i64 = 300;
const PRICE_FAST_SECS: i64 = 60;
const PRICE_TREND_SECS: i64 = 180;

#[derive(Debug, Clone)]
pub struct StrategyEngine {
    config: MonitorConfig,
    stores: HashMap<String, TimeSeriesStore>,
    funding: HashMap<String, FundingState>,
    cooldowns: CooldownRegistry,
    events: EventCache,
}

impl StrategyEngine {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            stores: HashMap::new(),
            funding: HashMap::new(),
            cooldowns: CooldownRegistry::new(),
            events: EventCache::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Store for `instrument`, created on first observation
    fn store_mut(&mut self, instrument: &str) -> &mut TimeSeriesStore {
        let capacity = self.config.capacity;
        self.stores
            .entry(instrument.to_string())
            .or_insert_with(|| TimeSeriesStore::new(capacity))
    }

    pub fn store(&self, instrument: &str) -> Option<&TimeSeriesStore> {
        self.stores.get(instrument)
    }

    pub fn funding_state(&self, instrument: &str) -> Option<&FundingState> {
        self.funding.get(instrument)
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn event_cache(&self) -> &EventCache {
        &self.events
    }

    /// Instruments observed so far, sorted
    pub fn instruments(&self) -> Vec<String> {
        let mut instruments: Vec<String> = self.stores.keys().cloned().collect();
        instruments.sort();
        instruments
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    pub fn record_trade(
        &mut self,
        instrument: &str,
        price: f64,
        quantity: f64,
        aggressor_is_seller: bool,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(MonitorError::malformed("trade", format!("invalid price {price}")));
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(MonitorError::malformed("trade", format!("invalid quantity {quantity}")));
        }
        let notional = price * quantity;
        if !notional.is_finite() {
            return Err(MonitorError::malformed(
                "trade",
                format!("notional overflow {price} x {quantity}"),
            ));
        }
        self.store_mut(instrument)
            .record_trade(price, quantity, aggressor_is_seller, now);
        Ok(())
    }

    /// Record an OI notional sample, snapshotting the live price alongside it.
    pub fn record_open_interest(
        &mut self,
        instrument: &str,
        notional: f64,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        if !(notional.is_finite() && notional >= 0.0) {
            return Err(MonitorError::malformed(
                "open_interest",
                format!("invalid notional {notional}"),
            ));
        }
        let store = self.store_mut(instrument);
        store.record_open_interest(notional, now);
        if let Some(price) = store.last_price() {
            store.record_price(price, now);
        }
        Ok(())
    }

    pub fn record_funding(
        &mut self,
        instrument: &str,
        rate: f64,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        if !rate.is_finite() {
            return Err(MonitorError::malformed("funding_rate", format!("invalid rate {rate}")));
        }
        self.store_mut(instrument).record_funding(rate, now);
        Ok(())
    }

    pub fn record_price(
        &mut self,
        instrument: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        if !(price.is_finite() && price > 0.0) {
            return Err(MonitorError::malformed("mark_price", format!("invalid price {price}")));
        }
        self.store_mut(instrument).record_price(price, now);
        Ok(())
    }

    /// Route a wire event into the matching store. Errors mean the sample was
    /// skipped and the store still holds its previous values.
    pub fn process_event(
        &mut self,
        event: MarketEventMessage,
        now: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let instrument = event.instrument.symbol();
        let kind = event.kind.as_str();

        match kind {
            "trade" => {
                let trade: TradeData = serde_json::from_value(event.data)
                    .map_err(|e| MonitorError::malformed(kind, e.to_string()))?;
                self.record_trade(&instrument, trade.price, trade.amount, trade.side.is_sell(), now)
            }
            "open_interest" => {
                let oi: OpenInterestData = serde_json::from_value(event.data)
                    .map_err(|e| MonitorError::malformed(kind, e.to_string()))?;
                let notional = match oi.notional {
                    Some(notional) => notional,
                    None => {
                        let price = self
                            .stores
                            .get(&instrument)
                            .and_then(TimeSeriesStore::last_price)
                            .ok_or_else(|| MonitorError::malformed(kind, "no price observed yet"))?;
                        oi.contracts * price
                    }
                };
                self.record_open_interest(&instrument, notional, now)
            }
            "funding_rate" => {
                let funding: FundingRateData = serde_json::from_value(event.data)
                    .map_err(|e| MonitorError::malformed(kind, e.to_string()))?;
                let rate = funding
                    .rate_f64()
                    .ok_or_else(|| MonitorError::malformed(kind, "rate out of range"))?;
                self.record_funding(&instrument, rate, now)
            }
            "mark_price" => {
                let mark: MarkPriceData = serde_json::from_value(event.data)
                    .map_err(|e| MonitorError::malformed(kind, e.to_string()))?;
                let price = mark
                    .price_f64()
                    .ok_or_else(|| MonitorError::malformed(kind, "price out of range"))?;
                self.record_price(&instrument, price, now)
            }
            other => Err(MonitorError::UnsupportedEventKind(other.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    /// Evaluate every instrument once, returning at most one alert each.
    ///
    /// A failing instrument is logged and skipped; the rest are still evaluated.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<Alert> {
        let mut alerts = Vec::new();

        for instrument in self.instruments() {
            match self.evaluate(&instrument, now) {
                Ok(Some(alert)) => {
                    info!("Alert triggered: {} {}", alert.instrument, alert.category);
                    alerts.push(alert);
                }
                Ok(None) => {}
                Err(error) => {
                    warn!("Evaluation failed for {}, skipping: {}", instrument, error);
                }
            }
        }

        alerts
    }

    /// Run funding, price and OI rules for one instrument.
    ///
    /// Every rule runs and updates its own state; only the highest-priority
    /// outcome (Funding > Price > OI) is returned.
    pub fn evaluate(
        &mut self,
        instrument: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, MonitorError> {
        let Some(store) = self.stores.get(instrument) else {
            return Ok(None);
        };

        let mut snapshot = MetricsSnapshot::capture(store, now);
        if let Some(metric) = snapshot.non_finite_field() {
            return Err(MonitorError::NonFiniteMetric {
                instrument: instrument.to_string(),
                metric,
            });
        }

        let fast = store.delta(SeriesKind::Price, Duration::seconds(PRICE_FAST_SECS), now);
        let trend = store.delta(SeriesKind::Price, Duration::seconds(PRICE_TREND_SECS), now);
        let oi = store.delta(SeriesKind::OpenInterest, Duration::seconds(OI_WINDOW_SECS), now);

        let state = self.funding.entry(instrument.to_string()).or_default();
        let funding_signal = state.evaluate(snapshot.funding_rate, &self.config.funding, now);
        snapshot.level = state.level;

        let moves = PriceMove {
            pct_1m: pct_change(fast.current, fast.past),
            pct_3m: pct_change(trend.current, trend.past),
            large_cap: oi.current >= self.config.oi.large_cap,
        };
        let price_trigger = detect_price_shock(
            instrument,
            moves,
            &self.config.price,
            self.config.price_cooldown,
            &mut self.cooldowns,
            now,
        );
        if let Some(trigger) = price_trigger {
            debug!("{} price trigger {} (alert: {})", instrument, trigger.tag, trigger.fire);
            self.events.insert(
                instrument,
                EventCategory::Price,
                CachedEvent {
                    time: now,
                    tag: trigger.tag,
                    snapshot: snapshot.clone(),
                },
            );
        }

        let oi_trigger = detect_oi_shift(
            instrument,
            oi.delta,
            oi.current,
            &self.config.oi,
            self.config.oi_cooldown,
            &mut self.cooldowns,
            now,
        );
        if let Some(trigger) = oi_trigger {
            debug!("{} oi trigger {} (alert: {})", instrument, trigger.tag, trigger.fire);
            self.events.insert(
                instrument,
                EventCategory::Oi,
                CachedEvent {
                    time: now,
                    tag: trigger.tag,
                    snapshot: snapshot.clone(),
                },
            );
        }

        let (category, headline) = if let Some(signal) = funding_signal {
            (AlertCategory::Funding, signal.headline(self.config.funding.critical))
        } else if let Some(trigger) = price_trigger.filter(|t| t.fire) {
            (AlertCategory::Price, trigger.headline(oi.current))
        } else if let Some(trigger) = oi_trigger.filter(|t| t.fire) {
            (AlertCategory::Oi, trigger.headline(oi.current))
        } else {
            return Ok(None);
        };

        Ok(Some(Alert {
            instrument: instrument.to_string(),
            category,
            message: render_message(instrument, &headline, store, now),
            snapshot,
            time: now,
        }))
    }

    /// Ranked list of currently abnormal instruments; purges expired events.
    pub fn summary(&mut self, now: DateTime<Utc>) -> Vec<AbnormalRecord> {
        summary::aggregate(
            &self.stores,
            &self.funding,
            &mut self.events,
            self.config.event_ttl,
            now,
        )
    }
}
