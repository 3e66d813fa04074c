//! Alert events and their human-readable rendering

use crate::store::{SeriesKind, TimeSeriesStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// Windows shown in the flow / OI matrix of every alert
const MATRIX_WINDOWS_SECS: [i64; 3] = [300, 600, 900];

/// Alert category, in descending priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Funding,
    Price,
    Oi,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Funding => "funding",
            AlertCategory::Price => "price",
            AlertCategory::Oi => "oi",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time metrics for one instrument.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub price_now: f64,
    /// Price ~5 minutes ago
    pub price_past: f64,
    pub oi_now: f64,
    /// 5-minute OI change
    pub oi_delta: f64,
    pub funding_rate: f64,
    /// 5-minute funding change
    pub funding_delta: f64,
    /// 30-minute net flow
    pub flow_total: f64,
    /// 5-minute net flow
    pub flow_5m: f64,
    pub level: u8,
}

impl MetricsSnapshot {
    pub fn capture(store: &TimeSeriesStore, now: DateTime<Utc>) -> Self {
        let five_min = Duration::seconds(300);
        let oi = store.delta(SeriesKind::OpenInterest, five_min, now);
        let funding = store.delta(SeriesKind::Funding, five_min, now);
        let price = store.delta(SeriesKind::Price, five_min, now);

        Self {
            price_now: store.price(),
            price_past: price.past,
            oi_now: oi.current,
            oi_delta: oi.delta,
            funding_rate: store.funding_rate(),
            funding_delta: funding.delta,
            flow_total: store.windowed_flow_sum(Duration::seconds(1800), now),
            flow_5m: store.windowed_flow_sum(five_min, now),
            level: 0,
        }
    }

    /// Name of the first non-finite field, if any
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("price_now", self.price_now),
            ("price_past", self.price_past),
            ("oi_now", self.oi_now),
            ("oi_delta", self.oi_delta),
            ("funding_rate", self.funding_rate),
            ("funding_delta", self.funding_delta),
            ("flow_total", self.flow_total),
            ("flow_5m", self.flow_5m),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }
}

/// Alert pushed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub instrument: String,
    pub category: AlertCategory,
    pub message: String,
    pub snapshot: MetricsSnapshot,
    pub time: DateTime<Utc>,
}

/// Abbreviate a quote-currency amount: `+1.2M`, `-350K`, `+12`.
pub fn format_volume(value: f64, signed: bool) -> String {
    let abs = value.abs();
    let sign = match (signed, value >= 0.0) {
        (false, _) => "",
        (true, true) => "+",
        (true, false) => "-",
    };
    if abs >= 1_000_000.0 {
        format!("{sign}{:.1}M", abs / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{sign}{:.0}K", abs / 1_000.0)
    } else {
        format!("{sign}{abs:.0}")
    }
}

/// Render the full alert body around `headline`.
pub fn render_message(
    instrument: &str,
    headline: &str,
    store: &TimeSeriesStore,
    now: DateTime<Utc>,
) -> String {
    let rows = MATRIX_WINDOWS_SECS
        .iter()
        .map(|&secs| {
            let window = Duration::seconds(secs);
            let flow = format_volume(store.windowed_flow_sum(window, now), true);
            let oi = format_volume(store.delta(SeriesKind::OpenInterest, window, now).delta, true);
            format!("{:02}m {flow:>7} {oi:>7}", secs / 60)
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "[{instrument}] {headline}\n\
         ------------------\n\
         💰 Price: {}\n\
         💸 Funding: {:.4}%\n\
         📊 OI: {:.1}M\n\
         ------------------\n\
         win   flow(U)  ΔOI\n\
         {rows}\n\
         ⏱ {}",
        store.price(),
        store.funding_rate() * 100.0,
        store.open_interest() / 1_000_000.0,
        now.format("%H:%M:%S"),
    )
}
