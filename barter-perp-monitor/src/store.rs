//! Per-instrument rolling time series.
//!
//! Every series is a fixed-capacity ring so memory is bounded regardless of how
//! fast the feed is. Windowed queries scan at most `capacity` entries.

use chrono::{DateTime, Duration, Utc};

/// Fixed-capacity circular buffer. Pushing into a full buffer overwrites the
/// oldest entry.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Index of the oldest entry once the buffer has wrapped
    head: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    /// Append a value, returning the evicted oldest value if the buffer was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        if self.slots.len() < self.capacity {
            self.slots.push(value);
            None
        } else {
            let evicted = std::mem::replace(&mut self.slots[self.head], value);
            self.head = (self.head + 1) % self.capacity;
            Some(evicted)
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently pushed value
    pub fn latest(&self) -> Option<&T> {
        if self.slots.is_empty() {
            None
        } else if self.slots.len() < self.capacity {
            self.slots.last()
        } else {
            let idx = (self.head + self.capacity - 1) % self.capacity;
            self.slots.get(idx)
        }
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }
}

/// Which sampled series a windowed delta is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesKind {
    OpenInterest,
    Funding,
    Price,
}

/// Result of a windowed delta query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SeriesDelta {
    pub delta: f64,
    pub current: f64,
    /// First retained sample at or after the window cutoff
    pub past: f64,
}

/// Buffer capacities for a [`TimeSeriesStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapacity {
    pub flow_buckets: usize,
    pub open_interest: usize,
    pub funding: usize,
    pub price: usize,
}

impl Default for StoreCapacity {
    fn default() -> Self {
        Self {
            flow_buckets: 1800,
            open_interest: 300,
            funding: 300,
            price: 300,
        }
    }
}

/// Rolling net flow, open interest, funding and price history for one instrument.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    last_price: Option<f64>,
    /// Flushed one-second net notional buckets (unix second, signed notional)
    flow_buckets: RingBuffer<(i64, f64)>,
    /// Open second still accumulating trades
    current_second: Option<i64>,
    current_flow: f64,
    oi_samples: RingBuffer<(DateTime<Utc>, f64)>,
    funding_samples: RingBuffer<(DateTime<Utc>, f64)>,
    price_samples: RingBuffer<(DateTime<Utc>, f64)>,
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(StoreCapacity::default())
    }
}

impl TimeSeriesStore {
    pub fn new(capacity: StoreCapacity) -> Self {
        Self {
            last_price: None,
            flow_buckets: RingBuffer::new(capacity.flow_buckets),
            current_second: None,
            current_flow: 0.0,
            oi_samples: RingBuffer::new(capacity.open_interest),
            funding_samples: RingBuffer::new(capacity.funding),
            price_samples: RingBuffer::new(capacity.price),
        }
    }

    /// Record a trade print. A seller-initiated trade contributes negative notional.
    pub fn record_trade(&mut self, price: f64, quantity: f64, aggressor_is_seller: bool, time: DateTime<Utc>) {
        self.last_price = Some(price);

        let notional = price * quantity;
        let signed = if aggressor_is_seller { -notional } else { notional };

        let second = time.timestamp();
        match self.current_second {
            Some(open) if second <= open => self.current_flow += signed,
            Some(open) => {
                self.flow_buckets.push((open, self.current_flow));
                self.current_second = Some(second);
                self.current_flow = signed;
            }
            None => {
                self.current_second = Some(second);
                self.current_flow = signed;
            }
        }
    }

    /// Net signed notional over `window`: every bucket, the open second
    /// included, stamped at or after `now - window`.
    pub fn windowed_flow_sum(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        let cutoff = now - window;
        let in_window = |second: i64| {
            DateTime::from_timestamp(second, 0)
                .map(|ts| ts >= cutoff)
                .unwrap_or(false)
        };

        let open = match self.current_second {
            Some(second) if in_window(second) => self.current_flow,
            _ => 0.0,
        };

        self.flow_buckets
            .iter()
            .filter(|(second, _)| in_window(*second))
            .fold(open, |total, (_, flow)| total + flow)
    }

    pub fn record_open_interest(&mut self, value: f64, time: DateTime<Utc>) {
        self.oi_samples.push((time, value));
    }

    pub fn record_funding(&mut self, value: f64, time: DateTime<Utc>) {
        self.funding_samples.push((time, value));
    }

    pub fn record_price(&mut self, value: f64, time: DateTime<Utc>) {
        self.price_samples.push((time, value));
    }

    /// Change of a sampled series over `window`.
    ///
    /// `past` is the first retained sample stamped at or after `now - window`,
    /// not an interpolated value. With no such sample the delta is zero.
    pub fn delta(&self, kind: SeriesKind, window: Duration, now: DateTime<Utc>) -> SeriesDelta {
        let samples = self.samples(kind);
        let Some(&(_, current)) = samples.latest() else {
            return SeriesDelta::default();
        };

        let cutoff = now - window;
        let past = samples
            .iter()
            .find(|(ts, _)| *ts >= cutoff)
            .map(|(_, value)| *value)
            .unwrap_or(current);

        SeriesDelta {
            delta: current - past,
            current,
            past,
        }
    }

    fn samples(&self, kind: SeriesKind) -> &RingBuffer<(DateTime<Utc>, f64)> {
        match kind {
            SeriesKind::OpenInterest => &self.oi_samples,
            SeriesKind::Funding => &self.funding_samples,
            SeriesKind::Price => &self.price_samples,
        }
    }

    /// Most recent trade price
    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }

    /// Live price: last trade, falling back to the latest price sample
    pub fn price(&self) -> f64 {
        self.last_price
            .or_else(|| self.price_samples.latest().map(|(_, p)| *p))
            .unwrap_or(0.0)
    }

    pub fn open_interest(&self) -> f64 {
        self.oi_samples.latest().map(|(_, v)| *v).unwrap_or(0.0)
    }

    pub fn funding_rate(&self) -> f64 {
        self.funding_samples.latest().map(|(_, v)| *v).unwrap_or(0.0)
    }

    pub fn flow_bucket_count(&self) -> usize {
        self.flow_buckets.len()
    }

    pub fn sample_count(&self, kind: SeriesKind) -> usize {
        self.samples(kind).len()
    }
}
