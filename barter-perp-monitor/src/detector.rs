//! Price-shock and open-interest-shift rules, each gated by its own cooldown.

use crate::config::{OiThresholds, PriceThresholds};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::{collections::HashMap, fmt};

/// Independent cooldown slots per instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CooldownKind {
    Price1m,
    Price3m,
    OpenInterest,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub instrument: String,
    pub kind: CooldownKind,
}

impl CooldownKey {
    pub fn new(instrument: &str, kind: CooldownKind) -> Self {
        Self {
            instrument: instrument.to_string(),
            kind,
        }
    }
}

/// Last trigger time per (instrument, kind). Entries are overwritten on each
/// trigger and never expire on their own.
#[derive(Debug, Clone, Default)]
pub struct CooldownRegistry {
    last_trigger: HashMap<CooldownKey, DateTime<Utc>>,
}

impl CooldownRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and arms the cooldown if `key` has not fired within
    /// `cooldown` of `now`.
    pub fn try_fire(&mut self, key: CooldownKey, cooldown: Duration, now: DateTime<Utc>) -> bool {
        match self.last_trigger.get(&key) {
            Some(last) if now - *last < cooldown => false,
            _ => {
                self.last_trigger.insert(key, now);
                true
            }
        }
    }

    pub fn last_trigger(&self, key: &CooldownKey) -> Option<DateTime<Utc>> {
        self.last_trigger.get(key).copied()
    }
}

/// Display tag attached to a transient event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum EventTag {
    FastShock { rising: bool },
    TrendShock { rising: bool },
    OiSurge,
    OiDrop,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTag::FastShock { rising: true } => write!(f, "🚀 1m fast shock"),
            EventTag::FastShock { rising: false } => write!(f, "🩸 1m fast shock"),
            EventTag::TrendShock { rising: true } => write!(f, "📈 3m trend shock"),
            EventTag::TrendShock { rising: false } => write!(f, "📉 3m trend shock"),
            EventTag::OiSurge => write!(f, "📈 OI surge"),
            EventTag::OiDrop => write!(f, "📉 OI drop"),
        }
    }
}

impl From<EventTag> for String {
    fn from(tag: EventTag) -> Self {
        tag.to_string()
    }
}

/// Fractional change from `past` to `current`; zero without a positive baseline.
pub fn pct_change(current: f64, past: f64) -> f64 {
    if past > 0.0 {
        (current - past) / past
    } else {
        0.0
    }
}

/// A detector condition that held this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub tag: EventTag,
    /// Signed fractional move (price) or signed ΔOI (open interest)
    pub change: f64,
    /// Whether the cooldown allowed an outward alert
    pub fire: bool,
}

impl Trigger {
    pub fn headline(&self, oi_now: f64) -> String {
        match self.tag {
            EventTag::FastShock { rising } => format!(
                "{} Fast shock (1m)\nMove: {:+.2}%",
                if rising { "🚀" } else { "🩸" },
                self.change * 100.0
            ),
            EventTag::TrendShock { rising } => format!(
                "{} Trend shock (3m)\nMove: {:+.2}%",
                if rising { "📈" } else { "📉" },
                self.change * 100.0
            ),
            EventTag::OiSurge | EventTag::OiDrop => {
                let pct = if oi_now > 0.0 { self.change / oi_now * 100.0 } else { 0.0 };
                format!(
                    "{}\n5m: {:+.2}M ({pct:+.2}%)",
                    self.tag,
                    self.change / 1_000_000.0
                )
            }
        }
    }
}

/// Inputs for the price-shock rule.
#[derive(Debug, Clone, Copy)]
pub struct PriceMove {
    pub pct_1m: f64,
    pub pct_3m: f64,
    pub large_cap: bool,
}

/// Evaluate the price-shock rule. The 1-minute window takes precedence: once
/// it breaches, the 3-minute window is not considered this tick.
pub fn detect_price_shock(
    instrument: &str,
    moves: PriceMove,
    thresholds: &PriceThresholds,
    cooldown: Duration,
    registry: &mut CooldownRegistry,
    now: DateTime<Utc>,
) -> Option<Trigger> {
    let (limit_1m, limit_3m) = if moves.large_cap {
        (thresholds.large_1m, thresholds.large_3m)
    } else {
        (thresholds.small_1m, thresholds.small_3m)
    };

    let (tag, change, kind) = if moves.pct_1m.abs() >= limit_1m {
        (
            EventTag::FastShock { rising: moves.pct_1m > 0.0 },
            moves.pct_1m,
            CooldownKind::Price1m,
        )
    } else if moves.pct_3m.abs() >= limit_3m {
        (
            EventTag::TrendShock { rising: moves.pct_3m > 0.0 },
            moves.pct_3m,
            CooldownKind::Price3m,
        )
    } else {
        return None;
    };

    let fire = registry.try_fire(CooldownKey::new(instrument, kind), cooldown, now);
    Some(Trigger { tag, change, fire })
}

/// Evaluate the open-interest shift rule over the supplied 5-minute delta.
pub fn detect_oi_shift(
    instrument: &str,
    oi_delta: f64,
    oi_now: f64,
    thresholds: &OiThresholds,
    cooldown: Duration,
    registry: &mut CooldownRegistry,
    now: DateTime<Utc>,
) -> Option<Trigger> {
    let triggered = if oi_now >= thresholds.large_cap {
        let ratio = if oi_now > 0.0 { oi_delta.abs() / oi_now } else { 0.0 };
        ratio >= thresholds.change_pct
    } else {
        oi_delta.abs() >= thresholds.change_abs
    };

    if !triggered {
        return None;
    }

    let tag = if oi_delta > 0.0 { EventTag::OiSurge } else { EventTag::OiDrop };
    let fire = registry.try_fire(
        CooldownKey::new(instrument, CooldownKind::OpenInterest),
        cooldown,
        now,
    );
    Some(Trigger {
        tag,
        change: oi_delta,
        fire,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_pct_change_without_baseline() {
        assert_eq!(pct_change(105.0, 0.0), 0.0);
        assert_eq!(pct_change(105.0, -1.0), 0.0);
        assert!((pct_change(104.0, 100.0) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_cooldown_blocks_until_elapsed() {
        let mut registry = CooldownRegistry::new();
        let key = CooldownKey::new("BTCUSDT", CooldownKind::Price1m);
        let cooldown = Duration::seconds(60);

        assert!(registry.try_fire(key.clone(), cooldown, t(0)));
        assert!(!registry.try_fire(key.clone(), cooldown, t(1)));
        assert!(!registry.try_fire(key.clone(), cooldown, t(59)));
        assert!(registry.try_fire(key.clone(), cooldown, t(60)));
        assert_eq!(registry.last_trigger(&key), Some(t(60)));

        // Other kinds and instruments are independent
        assert!(registry.try_fire(CooldownKey::new("BTCUSDT", CooldownKind::Price3m), cooldown, t(61)));
        assert!(registry.try_fire(CooldownKey::new("ETHUSDT", CooldownKind::Price1m), cooldown, t(61)));
    }

    #[test]
    fn test_large_cap_fast_shock() {
        let mut registry = CooldownRegistry::new();
        let moves = PriceMove {
            pct_1m: 0.04,
            pct_3m: 0.0,
            large_cap: true,
        };
        let trigger = detect_price_shock(
            "BTCUSDT",
            moves,
            &PriceThresholds::default(),
            Duration::seconds(60),
            &mut registry,
            t(0),
        )
        .unwrap();

        assert_eq!(trigger.tag, EventTag::FastShock { rising: true });
        assert!(trigger.fire);
        assert!(trigger.headline(0.0).contains("+4.00%"));
    }

    #[test]
    fn test_small_cap_uses_looser_thresholds() {
        let mut registry = CooldownRegistry::new();
        let moves = PriceMove {
            pct_1m: 0.04,
            pct_3m: 0.06,
            large_cap: false,
        };
        let result = detect_price_shock(
            "DOGEUSDT",
            moves,
            &PriceThresholds::default(),
            Duration::seconds(60),
            &mut registry,
            t(0),
        );
        assert_eq!(result, None);

        let moves = PriceMove {
            pct_1m: 0.01,
            pct_3m: -0.12,
            large_cap: false,
        };
        let trigger = detect_price_shock(
            "DOGEUSDT",
            moves,
            &PriceThresholds::default(),
            Duration::seconds(60),
            &mut registry,
            t(0),
        )
        .unwrap();
        assert_eq!(trigger.tag, EventTag::TrendShock { rising: false });
    }

    #[test]
    fn test_price_trigger_reported_while_cooling_down() {
        let mut registry = CooldownRegistry::new();
        let moves = PriceMove {
            pct_1m: -0.05,
            pct_3m: -0.08,
            large_cap: true,
        };
        let th = PriceThresholds::default();
        let cooldown = Duration::seconds(60);

        let first = detect_price_shock("ETHUSDT", moves, &th, cooldown, &mut registry, t(0)).unwrap();
        assert!(first.fire);
        let second = detect_price_shock("ETHUSDT", moves, &th, cooldown, &mut registry, t(5)).unwrap();
        assert!(!second.fire);
        assert_eq!(second.tag, EventTag::FastShock { rising: false });
        let third = detect_price_shock("ETHUSDT", moves, &th, cooldown, &mut registry, t(60)).unwrap();
        assert!(third.fire);
    }

    #[test]
    fn test_oi_large_cap_percentage() {
        let mut registry = CooldownRegistry::new();
        let th = OiThresholds::default();
        let cooldown = Duration::seconds(300);

        let trigger =
            detect_oi_shift("BTCUSDT", 2_400_000.0, 40_000_000.0, &th, cooldown, &mut registry, t(0))
                .unwrap();
        assert_eq!(trigger.tag, EventTag::OiSurge);
        assert!(trigger.fire);

        // 1.2M on a 40M book is only 3%
        let mut registry = CooldownRegistry::new();
        assert_eq!(
            detect_oi_shift("BTCUSDT", 1_200_000.0, 40_000_000.0, &th, cooldown, &mut registry, t(0)),
            None
        );
    }

    #[test]
    fn test_oi_small_cap_absolute() {
        let mut registry = CooldownRegistry::new();
        let th = OiThresholds::default();
        let cooldown = Duration::seconds(300);

        let trigger =
            detect_oi_shift("ARBUSDT", -1_200_000.0, 10_000_000.0, &th, cooldown, &mut registry, t(0))
                .unwrap();
        assert_eq!(trigger.tag, EventTag::OiDrop);
        assert!(trigger.fire);

        let again =
            detect_oi_shift("ARBUSDT", -1_300_000.0, 10_000_000.0, &th, cooldown, &mut registry, t(299))
                .unwrap();
        assert!(!again.fire);
        let after =
            detect_oi_shift("ARBUSDT", -1_300_000.0, 10_000_000.0, &th, cooldown, &mut registry, t(300))
                .unwrap();
        assert!(after.fire);
    }

    #[test]
    fn test_event_tag_serializes_as_label() {
        let json = serde_json::to_string(&EventTag::OiSurge).unwrap();
        assert_eq!(json, "\"📈 OI surge\"");
    }
}
