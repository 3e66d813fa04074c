use thiserror::Error;

/// All errors generated in `barter-perp-monitor`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed {kind} event: {reason}")]
    MalformedEvent { kind: String, reason: String },

    #[error("unsupported market event kind: {0}")]
    UnsupportedEventKind(String),

    #[error("non-finite {metric} for {instrument}")]
    NonFiniteMetric {
        instrument: String,
        metric: &'static str,
    },

    #[error("alert delivery failed: {0}")]
    Delivery(String),
}

impl MonitorError {
    pub(crate) fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        Self::MalformedEvent {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    /// Determine if the error only affects a single sample, in which case the
    /// sample is dropped and the last known value is retained.
    pub fn is_sample_error(&self) -> bool {
        matches!(
            self,
            MonitorError::MalformedEvent { .. } | MonitorError::UnsupportedEventKind(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MonitorError::malformed("trade", "missing field `price`");
        assert_eq!(err.to_string(), "malformed trade event: missing field `price`");

        let err = MonitorError::NonFiniteMetric {
            instrument: "BTCUSDT".to_string(),
            metric: "flow_5m",
        };
        assert_eq!(err.to_string(), "non-finite flow_5m for BTCUSDT");
    }

    #[test]
    fn test_is_sample_error() {
        assert!(MonitorError::UnsupportedEventKind("liquidation".into()).is_sample_error());
        assert!(MonitorError::malformed("open_interest", "no price").is_sample_error());
        assert!(!MonitorError::Delivery("closed".into()).is_sample_error());
    }
}
