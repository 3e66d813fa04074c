//! Notification collaborator seam.
//!
//! Delivery is fire-and-forget: the monitor logs a failed send and moves on,
//! it never retries.

use crate::{alert::Alert, error::MonitorError, store::RingBuffer};
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::info;

/// Messages kept by [`HistoryNotifier`]
pub const HISTORY_CAPACITY: usize = 100;

/// Outbound sink for alerts and digests.
pub trait Notifier: Send + Sync {
    fn send(&self, alert: &Alert) -> Result<(), MonitorError>;

    fn send_digest(&self, text: &str) -> Result<(), MonitorError>;
}

/// Writes every message through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, alert: &Alert) -> Result<(), MonitorError> {
        info!(
            instrument = %alert.instrument,
            category = %alert.category,
            "\n{}",
            alert.message
        );
        Ok(())
    }

    fn send_digest(&self, text: &str) -> Result<(), MonitorError> {
        info!("\n{}", text);
        Ok(())
    }
}

/// Message handed to an external delivery task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Alert(Alert),
    Digest(String),
}

/// Forwards messages into a bounded tokio channel without waiting.
///
/// A full or closed channel is reported as [`MonitorError::Delivery`].
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self { tx }
    }

    /// Create a notifier together with the receiving half
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    fn forward(&self, message: Outbound) -> Result<(), MonitorError> {
        self.tx
            .try_send(message)
            .map_err(|e| MonitorError::Delivery(e.to_string()))
    }
}

impl Notifier for ChannelNotifier {
    fn send(&self, alert: &Alert) -> Result<(), MonitorError> {
        self.forward(Outbound::Alert(alert.clone()))
    }

    fn send_digest(&self, text: &str) -> Result<(), MonitorError> {
        self.forward(Outbound::Digest(text.to_string()))
    }
}

/// Keeps the last [`HISTORY_CAPACITY`] message bodies before forwarding to
/// the wrapped notifier. Messages are recorded even if forwarding fails.
#[derive(Debug)]
pub struct HistoryNotifier<N> {
    inner: N,
    history: Mutex<RingBuffer<(DateTime<Utc>, String)>>,
}

impl<N> HistoryNotifier<N> {
    pub fn new(inner: N) -> Self {
        Self {
            inner,
            history: Mutex::new(RingBuffer::new(HISTORY_CAPACITY)),
        }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }

    /// Recorded messages, newest first
    pub fn history(&self) -> Vec<(DateTime<Utc>, String)> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut messages: Vec<_> = history.iter().cloned().collect();
        messages.reverse();
        messages
    }

    fn record(&self, time: DateTime<Utc>, text: &str) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((time, text.to_string()));
    }
}

impl<N: Notifier> Notifier for HistoryNotifier<N> {
    fn send(&self, alert: &Alert) -> Result<(), MonitorError> {
        self.record(alert.time, &alert.message);
        self.inner.send(alert)
    }

    fn send_digest(&self, text: &str) -> Result<(), MonitorError> {
        self.record(Utc::now(), text);
        self.inner.send_digest(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertCategory, MetricsSnapshot};

    fn alert(n: i64) -> Alert {
        Alert {
            instrument: "BTCUSDT".to_string(),
            category: AlertCategory::Price,
            message: format!("alert {n}"),
            snapshot: MetricsSnapshot::default(),
            time: DateTime::from_timestamp(1_700_000_000 + n, 0).unwrap(),
        }
    }

    #[test]
    fn test_channel_notifier_forwards() {
        let (notifier, mut rx) = ChannelNotifier::channel(4);
        notifier.send(&alert(1)).unwrap();
        notifier.send_digest("digest").unwrap();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Alert(alert(1)));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Digest("digest".to_string()));
    }

    #[test]
    fn test_channel_notifier_full_or_closed_is_delivery_error() {
        let (notifier, rx) = ChannelNotifier::channel(1);
        notifier.send(&alert(1)).unwrap();
        assert!(matches!(notifier.send(&alert(2)), Err(MonitorError::Delivery(_))));

        drop(rx);
        assert!(matches!(notifier.send_digest("late"), Err(MonitorError::Delivery(_))));
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let notifier = HistoryNotifier::new(LogNotifier);
        for n in 0..(HISTORY_CAPACITY as i64 + 5) {
            notifier.send(&alert(n)).unwrap();
        }

        let history = notifier.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history[0].1, "alert 104");
        assert_eq!(history[HISTORY_CAPACITY - 1].1, "alert 5");
    }

    #[test]
    fn test_history_records_failed_deliveries() {
        let (inner, rx) = ChannelNotifier::channel(1);
        drop(rx);
        let notifier = HistoryNotifier::new(inner);

        assert!(notifier.send(&alert(7)).is_err());
        assert_eq!(notifier.history().len(), 1);
    }
}
