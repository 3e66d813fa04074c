//! Ranked "currently abnormal" view merging live funding state with recent
//! transient events, plus the periodic digest text built from it.

use crate::{
    alert::{format_volume, MetricsSnapshot},
    cache::EventCache,
    detector::{pct_change, EventTag},
    funding::{FundingState, LEVEL_CRITICAL},
    store::TimeSeriesStore,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::{cmp::Ordering, collections::HashMap};

/// One abnormal instrument in the summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AbnormalRecord {
    pub instrument: String,
    pub level: u8,
    pub funding_rate: f64,
    pub funding_delta: f64,
    pub oi_now: f64,
    pub oi_delta: f64,
    pub flow_total: f64,
    pub flow_5m: f64,
    pub price_now: f64,
    pub price_past: f64,
    pub tags: Vec<EventTag>,
    /// Most recent contributing cached event, `None` for funding-only records
    pub event_time: Option<DateTime<Utc>>,
}

impl AbnormalRecord {
    fn from_snapshot(instrument: &str, snapshot: &MetricsSnapshot) -> Self {
        Self {
            instrument: instrument.to_string(),
            level: snapshot.level,
            funding_rate: snapshot.funding_rate,
            funding_delta: snapshot.funding_delta,
            oi_now: snapshot.oi_now,
            oi_delta: snapshot.oi_delta,
            flow_total: snapshot.flow_total,
            flow_5m: snapshot.flow_5m,
            price_now: snapshot.price_now,
            price_past: snapshot.price_past,
            tags: Vec::new(),
            event_time: None,
        }
    }

    fn attach(&mut self, tag: EventTag, time: DateTime<Utc>) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self.event_time = Some(self.event_time.map_or(time, |current| current.max(time)));
    }
}

/// Build the ranked abnormal list. Expired cache entries are purged first.
///
/// Ordering: most recent event first (funding-only records last), then by
/// funding magnitude.
pub fn aggregate(
    stores: &HashMap<String, TimeSeriesStore>,
    funding: &HashMap<String, FundingState>,
    cache: &mut EventCache,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Vec<AbnormalRecord> {
    cache.purge_expired(ttl, now);

    let mut records: HashMap<String, AbnormalRecord> = funding
        .iter()
        .filter(|(_, state)| state.level > 0)
        .filter_map(|(instrument, state)| {
            let store = stores.get(instrument)?;
            let mut snapshot = MetricsSnapshot::capture(store, now);
            snapshot.level = state.level;
            snapshot.funding_rate = state.last_value;
            Some((instrument.clone(), AbnormalRecord::from_snapshot(instrument, &snapshot)))
        })
        .collect();

    for (instrument, _, event) in cache.iter() {
        records
            .entry(instrument.to_string())
            .or_insert_with(|| AbnormalRecord::from_snapshot(instrument, &event.snapshot))
            .attach(event.tag, event.time);
    }

    let mut records: Vec<AbnormalRecord> = records.into_values().collect();
    records.sort_by(compare_records);
    records
}

fn compare_records(a: &AbnormalRecord, b: &AbnormalRecord) -> Ordering {
    b.event_time
        .cmp(&a.event_time)
        .then_with(|| b.funding_rate.abs().total_cmp(&a.funding_rate.abs()))
        .then_with(|| a.instrument.cmp(&b.instrument))
}

/// Render the periodic digest, or `None` when nothing is abnormal.
pub fn render_digest(records: &[AbnormalRecord], now: DateTime<Utc>) -> Option<String> {
    if records.is_empty() {
        return None;
    }

    let mut lines = vec!["📋 Abnormal state digest".to_string(), "------------------".to_string()];

    for record in records {
        let icon = if record.level == LEVEL_CRITICAL { "🚨" } else { "⚠️" };
        let price_pct = pct_change(record.price_now, record.price_past) * 100.0;

        lines.push(format!(
            "{icon} {}: {} (5m {price_pct:+.2}%)",
            record.instrument, record.price_now
        ));
        lines.push(format!(
            "   Lv.{} funding: {:.4}% (5m {:+.4}%)",
            record.level,
            record.funding_rate * 100.0,
            record.funding_delta * 100.0
        ));
        lines.push(format!(
            "   OI: {} (5m {})",
            format_volume(record.oi_now, false),
            format_volume(record.oi_delta, true)
        ));
        lines.push(format!(
            "   Flow: {} (5m {})",
            format_volume(record.flow_total, true),
            format_volume(record.flow_5m, true)
        ));
        if !record.tags.is_empty() {
            let tags: Vec<String> = record.tags.iter().map(ToString::to_string).collect();
            lines.push(format!("   {}", tags.join(" | ")));
        }
        lines.push(String::new());
    }

    lines.push("------------------".to_string());
    lines.push(format!("⏱ {}", now.format("%H:%M")));
    Some(lines.join("\n"))
}
