//! Short-lived cache of transient detector events, so a shock stays visible in
//! the summary for a few minutes after it fired.

use crate::{alert::MetricsSnapshot, detector::EventTag};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventCategory {
    Price,
    Oi,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedEvent {
    pub time: DateTime<Utc>,
    pub tag: EventTag,
    pub snapshot: MetricsSnapshot,
}

/// One slot per (instrument, category); a newer event replaces the older one.
#[derive(Debug, Clone, Default)]
pub struct EventCache {
    entries: BTreeMap<(String, EventCategory), CachedEvent>,
}

impl EventCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instrument: &str, category: EventCategory, event: CachedEvent) {
        self.entries.insert((instrument.to_string(), category), event);
    }

    pub fn get(&self, instrument: &str, category: EventCategory) -> Option<&CachedEvent> {
        self.entries.get(&(instrument.to_string(), category))
    }

    /// Drop entries older than `ttl`, returning how many were removed.
    pub fn purge_expired(&mut self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, event| now - event.time <= ttl);
        before - self.entries.len()
    }

    /// Iterate (instrument, category, event) in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, EventCategory, &CachedEvent)> + '_ {
        self.entries
            .iter()
            .map(|((instrument, category), event)| (instrument.as_str(), *category, event))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
