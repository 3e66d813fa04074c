//! Funding-rate severity levels with staged exit confirmation.
//!
//! Levels 1-3 alert on their rising edge only. Leaving the critical level
//! (4) starts a three-step cool-down sequence so a single dip below the
//! critical threshold does not read as "all clear".

use crate::config::FundingThresholds;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

pub const LEVEL_CRITICAL: u8 = 4;

/// Elapsed time since leaving critical before the 2/3 message
const EXIT_STAGE_2: i64 = 60;
/// Elapsed time since leaving critical before the final 3/3 message
const EXIT_STAGE_3: i64 = 120;

/// Per-instrument funding state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FundingState {
    pub level: u8,
    pub last_value: f64,
    pub exit_mode: bool,
    pub exit_start: Option<DateTime<Utc>>,
    pub exit_count: u8,
}

/// Funding message produced by a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FundingSignal {
    /// Crossed into critical from any lower level
    EnteringCritical { rate: f64 },
    /// Still critical, but the reading changed
    ValueChanged { rate: f64 },
    /// Staged exit from critical, `stage` in 1..=3
    CoolingDown { stage: u8, rate: f64 },
    /// Rising edge into level 1-3
    Breach { level: u8, rate: f64 },
}

impl FundingSignal {
    pub fn rate(&self) -> f64 {
        match *self {
            FundingSignal::EnteringCritical { rate }
            | FundingSignal::ValueChanged { rate }
            | FundingSignal::CoolingDown { rate, .. }
            | FundingSignal::Breach { rate, .. } => rate,
        }
    }

    /// Human headline; `critical` is the configured critical threshold.
    pub fn headline(&self, critical: f64) -> String {
        let crit_pct = critical * 100.0;
        match *self {
            FundingSignal::EnteringCritical { rate } => format!(
                "🚨 Funding critical (>= {crit_pct:.2}%)\nEntered high-risk zone\nNow: {:.4}%",
                rate * 100.0
            ),
            FundingSignal::ValueChanged { rate } => format!(
                "🚨 Funding moved (>= {crit_pct:.2}%)\nValue changed: {:.4}%",
                rate * 100.0
            ),
            FundingSignal::CoolingDown { stage, rate } => {
                let detail = match stage {
                    1 => format!("Left high-risk zone (< {crit_pct:.2}%)"),
                    2 => "Confirming risk is clearing".to_string(),
                    _ => "Back in normal range".to_string(),
                };
                format!(
                    "📉 Funding easing ({stage}/3)\n{detail}\nNow: {:.4}%",
                    rate * 100.0
                )
            }
            FundingSignal::Breach { level, rate } => format!(
                "⚠️ Funding breach (Lv.{level})\nAbove {:.2}%",
                rate.abs() * 100.0
            ),
        }
    }
}

impl fmt::Display for FundingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundingSignal::EnteringCritical { .. } => write!(f, "entering critical"),
            FundingSignal::ValueChanged { .. } => write!(f, "value changed"),
            FundingSignal::CoolingDown { stage, .. } => write!(f, "cooling down {stage}/3"),
            FundingSignal::Breach { level, .. } => write!(f, "breach of level {level}"),
        }
    }
}

/// Classify a funding rate into severity 0-4.
pub fn classify(rate: f64, thresholds: &FundingThresholds) -> u8 {
    let magnitude = rate.abs();
    let [l1, l2, l3] = thresholds.levels;
    if magnitude >= thresholds.critical {
        LEVEL_CRITICAL
    } else if magnitude > l3 {
        3
    } else if magnitude > l2 {
        2
    } else if magnitude > l1 {
        1
    } else {
        0
    }
}

impl FundingState {
    /// Advance the state machine with this tick's rate.
    ///
    /// At most one signal is produced. `level` and `last_value` are updated
    /// whether or not a signal fires.
    pub fn evaluate(
        &mut self,
        rate: f64,
        thresholds: &FundingThresholds,
        now: DateTime<Utc>,
    ) -> Option<FundingSignal> {
        let prev_level = self.level;
        let level = classify(rate, thresholds);
        let mut signal = None;

        if self.exit_mode {
            if level == LEVEL_CRITICAL {
                self.exit_mode = false;
            } else {
                signal = self.advance_exit(rate, now);
            }
        }

        if signal.is_none() {
            signal = if level == LEVEL_CRITICAL {
                if prev_level < LEVEL_CRITICAL {
                    Some(FundingSignal::EnteringCritical { rate })
                } else if rate.to_bits() != self.last_value.to_bits() {
                    Some(FundingSignal::ValueChanged { rate })
                } else {
                    None
                }
            } else if prev_level == LEVEL_CRITICAL {
                self.exit_mode = true;
                self.exit_start = Some(now);
                self.exit_count = 1;
                Some(FundingSignal::CoolingDown { stage: 1, rate })
            } else if level > 0 && level > prev_level && !self.exit_mode {
                Some(FundingSignal::Breach { level, rate })
            } else {
                None
            };
        }

        self.level = level;
        self.last_value = rate;
        signal
    }

    fn advance_exit(&mut self, rate: f64, now: DateTime<Utc>) -> Option<FundingSignal> {
        let elapsed = self
            .exit_start
            .map(|start| now - start)
            .unwrap_or_else(Duration::zero);

        match self.exit_count {
            1 if elapsed >= Duration::seconds(EXIT_STAGE_2) => {
                self.exit_count = 2;
                Some(FundingSignal::CoolingDown { stage: 2, rate })
            }
            2 if elapsed >= Duration::seconds(EXIT_STAGE_3) => {
                self.exit_count = 3;
                self.exit_mode = false;
                Some(FundingSignal::CoolingDown { stage: 3, rate })
            }
            _ => None,
        }
    }
}
