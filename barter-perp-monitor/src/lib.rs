/// Barter Perp Monitor
///
/// Windowed metrics and deduplicated alerting for perpetual-futures markets:
/// - Rolling net flow (CVD), open interest, funding and price history per instrument
/// - Funding-rate severity levels with staged exit from the critical level
/// - Cooldown-gated price-shock and open-interest-shift detectors
/// - Ranked summary of abnormal instruments for periodic digests
///
/// Market events are consumed from the aggregated market data server over
/// WebSocket and evaluated on a fixed tick from a single task.
pub mod alert;
pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod feed;
pub mod funding;
pub mod monitor;
pub mod notifier;
pub mod store;
pub mod summary;
pub mod types;

pub use alert::{Alert, AlertCategory, MetricsSnapshot};
pub use config::MonitorConfig;
pub use engine::StrategyEngine;
pub use error::MonitorError;
pub use feed::{ConnectionStatus, WebSocketClient, WebSocketConfig};
pub use monitor::Monitor;
pub use notifier::{ChannelNotifier, HistoryNotifier, LogNotifier, Notifier, Outbound};
pub use summary::AbnormalRecord;
pub use types::{InstrumentInfo, MarketEventMessage};
