//! Monitor configuration
//!
//! Defaults mirror the production deployment; every field can be overridden
//! through an environment variable of the same (upper-cased) name.

use crate::{error::MonitorError, store::StoreCapacity};
use chrono::Duration;
use std::str::FromStr;

/// Funding-rate severity thresholds (magnitudes).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingThresholds {
    /// Ascending breach levels L1..L3, compared with `>`
    pub levels: [f64; 3],
    /// Critical level, compared with `>=`
    pub critical: f64,
}

impl Default for FundingThresholds {
    fn default() -> Self {
        Self {
            levels: [0.005, 0.010, 0.018],
            critical: 0.020,
        }
    }
}

/// Price shock thresholds as fractional moves (0.03 = 3%).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceThresholds {
    pub small_1m: f64,
    pub small_3m: f64,
    pub large_1m: f64,
    pub large_3m: f64,
}

impl Default for PriceThresholds {
    fn default() -> Self {
        Self {
            small_1m: 0.05,
            small_3m: 0.10,
            large_1m: 0.03,
            large_3m: 0.05,
        }
    }
}

/// Open-interest shift thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OiThresholds {
    /// OI notional at or above which an instrument counts as large-cap
    pub large_cap: f64,
    /// Large-cap trigger: |ΔOI| / OI
    pub change_pct: f64,
    /// Small-cap trigger: |ΔOI| in quote currency
    pub change_abs: f64,
}

impl Default for OiThresholds {
    fn default() -> Self {
        Self {
            large_cap: 30_000_000.0,
            change_pct: 0.05,
            change_abs: 1_000_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub funding: FundingThresholds,
    pub price: PriceThresholds,
    pub oi: OiThresholds,
    /// Cooldown per (instrument, price window)
    pub price_cooldown: Duration,
    /// Cooldown per instrument for OI shifts
    pub oi_cooldown: Duration,
    /// Evaluation tick period
    pub tick_interval: Duration,
    /// No evaluation until this long after start
    pub warmup: Duration,
    /// Periodic digest period
    pub digest_interval: Duration,
    /// Transient events stay in the summary this long
    pub event_ttl: Duration,
    pub capacity: StoreCapacity,
    /// Ingestion feed URL
    pub ws_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            funding: FundingThresholds::default(),
            price: PriceThresholds::default(),
            oi: OiThresholds::default(),
            price_cooldown: Duration::seconds(60),
            oi_cooldown: Duration::seconds(300),
            tick_interval: Duration::seconds(5),
            warmup: Duration::seconds(60),
            digest_interval: Duration::seconds(600),
            event_ttl: Duration::seconds(300),
            capacity: StoreCapacity::default(),
            ws_url: "ws://127.0.0.1:9001".to_string(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Whole seconds from `key`; unparsable or out-of-range values fall back to `default`
fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .and_then(Duration::try_seconds)
        .unwrap_or(default)
}

/// Parse "a,b,c" into three ascending levels
fn parse_levels(raw: &str) -> Option<[f64; 3]> {
    let values = raw
        .split(',')
        .map(|s| s.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match values.as_slice() {
        [l1, l2, l3] => Some([*l1, *l2, *l3]),
        _ => None,
    }
}

impl MonitorConfig {
    /// Build from defaults overridden by environment variables.
    pub fn from_env() -> Result<Self, MonitorError> {
        let d = Self::default();

        let levels = match std::env::var("FUNDING_LEVELS") {
            Ok(raw) => parse_levels(&raw)
                .ok_or_else(|| MonitorError::Config(format!("FUNDING_LEVELS: {raw}")))?,
            Err(_) => d.funding.levels,
        };

        let config = Self {
            funding: FundingThresholds {
                levels,
                critical: env_or("FUNDING_CRITICAL", d.funding.critical),
            },
            price: PriceThresholds {
                small_1m: env_or("PRICE_SMALL_1M", d.price.small_1m),
                small_3m: env_or("PRICE_SMALL_3M", d.price.small_3m),
                large_1m: env_or("PRICE_LARGE_1M", d.price.large_1m),
                large_3m: env_or("PRICE_LARGE_3M", d.price.large_3m),
            },
            oi: OiThresholds {
                large_cap: env_or("OI_LARGE_CAP", d.oi.large_cap),
                change_pct: env_or("OI_CHANGE_PCT", d.oi.change_pct),
                change_abs: env_or("OI_CHANGE_ABS", d.oi.change_abs),
            },
            price_cooldown: env_secs("PRICE_COOLDOWN_SECS", d.price_cooldown),
            oi_cooldown: env_secs("OI_COOLDOWN_SECS", d.oi_cooldown),
            tick_interval: env_secs("TICK_INTERVAL_SECS", d.tick_interval),
            warmup: env_secs("WARMUP_SECS", d.warmup),
            digest_interval: env_secs("DIGEST_INTERVAL_SECS", d.digest_interval),
            event_ttl: env_secs("EVENT_TTL_SECS", d.event_ttl),
            capacity: StoreCapacity {
                flow_buckets: env_or("FLOW_BUCKETS", d.capacity.flow_buckets),
                open_interest: env_or("OI_SAMPLES", d.capacity.open_interest),
                funding: env_or("FUNDING_SAMPLES", d.capacity.funding),
                price: env_or("PRICE_SAMPLES", d.capacity.price),
            },
            ws_url: std::env::var("WS_URL").unwrap_or(d.ws_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MonitorError> {
        let [l1, l2, l3] = self.funding.levels;
        if !(0.0 <= l1 && l1 < l2 && l2 < l3) {
            return Err(MonitorError::Config(format!(
                "funding levels must be ascending, got {:?}",
                self.funding.levels
            )));
        }
        if self.funding.critical <= l3 {
            return Err(MonitorError::Config(format!(
                "funding critical {} must exceed L3 {}",
                self.funding.critical, l3
            )));
        }
        if self.tick_interval <= Duration::zero() || self.digest_interval <= Duration::zero() {
            return Err(MonitorError::Config("intervals must be positive".to_string()));
        }
        for (name, value) in [
            ("price cooldown", self.price_cooldown),
            ("oi cooldown", self.oi_cooldown),
            ("warmup", self.warmup),
            ("event ttl", self.event_ttl),
        ] {
            if value < Duration::zero() {
                return Err(MonitorError::Config(format!("{name} must not be negative")));
            }
        }
        if self.oi_cooldown <= self.price_cooldown {
            return Err(MonitorError::Config(format!(
                "oi cooldown {}s must exceed price cooldown {}s",
                self.oi_cooldown.num_seconds(),
                self.price_cooldown.num_seconds()
            )));
        }
        let c = self.capacity;
        if c.flow_buckets == 0 || c.open_interest == 0 || c.funding == 0 || c.price == 0 {
            return Err(MonitorError::Config("buffer capacities must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.funding.levels, [0.005, 0.010, 0.018]);
        assert_eq!(config.funding.critical, 0.020);
        assert_eq!(config.oi.large_cap, 30_000_000.0);
        assert_eq!(config.price_cooldown, Duration::seconds(60));
        assert_eq!(config.oi_cooldown, Duration::seconds(300));
        assert_eq!(config.tick_interval, Duration::seconds(5));
        assert_eq!(config.capacity.flow_buckets, 1800);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_levels() {
        assert_eq!(parse_levels("0.005, 0.01,0.018"), Some([0.005, 0.01, 0.018]));
        assert_eq!(parse_levels("0.005,0.01"), None);
        assert_eq!(parse_levels("a,b,c"), None);
    }

    #[test]
    fn test_validate_rejects_bad_thresholds() {
        let mut config = MonitorConfig::default();
        config.funding.levels = [0.01, 0.005, 0.018];
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let mut config = MonitorConfig::default();
        config.funding.critical = 0.018;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.capacity.price = 0;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.tick_interval = Duration::zero();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_durations() {
        let mut config = MonitorConfig::default();
        config.oi_cooldown = Duration::seconds(60);
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));

        let mut config = MonitorConfig::default();
        config.warmup = Duration::seconds(-1);
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.event_ttl = Duration::seconds(-300);
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.price_cooldown = Duration::seconds(-60);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_secs_falls_back_on_out_of_range() {
        let default = Duration::seconds(300);

        std::env::set_var("PERP_MONITOR_TEST_HUGE_SECS", i64::MAX.to_string());
        assert_eq!(env_secs("PERP_MONITOR_TEST_HUGE_SECS", default), default);

        std::env::set_var("PERP_MONITOR_TEST_BAD_SECS", "soon");
        assert_eq!(env_secs("PERP_MONITOR_TEST_BAD_SECS", default), default);

        std::env::set_var("PERP_MONITOR_TEST_OK_SECS", " 45 ");
        assert_eq!(env_secs("PERP_MONITOR_TEST_OK_SECS", default), Duration::seconds(45));

        assert_eq!(env_secs("PERP_MONITOR_TEST_UNSET_SECS", default), default);
    }
}
