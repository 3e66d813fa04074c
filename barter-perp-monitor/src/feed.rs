/// WebSocket ingestion client for the aggregated market data server
///
/// Forwards only the event kinds the monitor consumes, reconnects with a
/// capped backoff and keeps the socket alive with pings. Events go out on a
/// broadcast channel, so a slow consumer loses the oldest events instead of
/// stalling the socket reader.

use crate::types::MarketEventMessage;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Event kinds routed to the strategy engine
pub const MONITORED_KINDS: [&str; 4] = ["trade", "open_interest", "funding_rate", "mark_price"];

/// WebSocket client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct WebSocketConfig {
    pub url: String,
    pub ping_interval: Duration,
    /// First reconnect delay; doubled after each failed attempt
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub channel_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_delay: Duration::from_secs(60),
            channel_buffer_size: 10_000,
        }
    }
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration, max: Duration) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_delay = max.max(delay);
        self
    }

    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size.max(1);
        self
    }

    /// Delay before reconnect attempt number `failures` (0-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.min(16));
        self.reconnect_delay
            .saturating_mul(factor)
            .min(self.max_reconnect_delay)
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Result of decoding one text frame.
#[derive(Debug)]
pub enum Frame {
    Welcome,
    Event(Box<MarketEventMessage>),
    /// Valid envelope for a kind the monitor does not consume
    Ignored(String),
    Invalid(serde_json::Error),
}

/// Decode a text frame from the server.
pub fn parse_frame(text: &str) -> Frame {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => return Frame::Invalid(e),
    };

    if value.get("type").and_then(|v| v.as_str()) == Some("welcome") {
        return Frame::Welcome;
    }

    match serde_json::from_value::<MarketEventMessage>(value) {
        Ok(event) if MONITORED_KINDS.contains(&event.kind.as_str()) => Frame::Event(Box::new(event)),
        Ok(event) => Frame::Ignored(event.kind),
        Err(e) => Frame::Invalid(e),
    }
}

/// Receivers and task handle of a running feed
#[derive(Debug)]
pub struct FeedHandle {
    /// Reports `Lagged` when the consumer fell behind and events were dropped
    pub events: broadcast::Receiver<MarketEventMessage>,
    pub status: mpsc::Receiver<ConnectionStatus>,
    pub task: JoinHandle<()>,
}

/// WebSocket client for market data events
#[derive(Debug, Clone, Default)]
pub struct WebSocketClient {
    config: WebSocketConfig,
}

impl WebSocketClient {
    pub fn new(config: WebSocketConfig) -> Self {
        Self { config }
    }

    /// Spawn the connection loop. The task ends once the event receiver is dropped.
    pub fn start(self) -> FeedHandle {
        let (event_tx, events) = broadcast::channel(self.config.channel_buffer_size.max(1));
        let (status_tx, status) = mpsc::channel(16);
        let task = tokio::spawn(run_feed(self.config, event_tx, status_tx));

        FeedHandle { events, status, task }
    }
}

/// Why a session ended
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    ReceiverDropped,
    Disconnected,
}

async fn run_feed(
    config: WebSocketConfig,
    event_tx: broadcast::Sender<MarketEventMessage>,
    status_tx: mpsc::Sender<ConnectionStatus>,
) {
    info!("Starting market feed for {}", config.url);
    let mut failures = 0u32;

    loop {
        let _ = status_tx.try_send(ConnectionStatus::Connecting);

        match connect_async(config.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Connected to market data server at {}", config.url);
                let _ = status_tx.try_send(ConnectionStatus::Connected);
                failures = 0;

                let end = run_session(ws_stream, &config, &event_tx).await;
                let _ = status_tx.try_send(ConnectionStatus::Disconnected);

                if let SessionEnd::ReceiverDropped = end {
                    info!("Event receiver dropped, stopping market feed");
                    return;
                }
                warn!("Market feed disconnected, will reconnect");
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", config.url, e);
                let _ = status_tx.try_send(ConnectionStatus::Disconnected);
                failures = failures.saturating_add(1);
            }
        }

        if event_tx.receiver_count() == 0 {
            return;
        }

        let delay = config.backoff(failures);
        debug!("Waiting {:?} before reconnecting", delay);
        tokio::time::sleep(delay).await;
    }
}

async fn run_session<S>(
    ws_stream: tokio_tungstenite::WebSocketStream<S>,
    config: &WebSocketConfig,
    event_tx: &broadcast::Sender<MarketEventMessage>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws_stream.split();
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.tick().await;

    let mut ignored = 0u64;

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if write.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("Ping failed, connection likely dead");
                    return SessionEnd::Disconnected;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(end) = dispatch_frame(&text, event_tx, &mut ignored) {
                        return end;
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Server closed connection");
                    return SessionEnd::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return SessionEnd::Disconnected;
                }
                None => return SessionEnd::Disconnected,
            }
        }
    }
}

/// Decode one text frame and publish it. Never waits on the consumer; returns
/// `Some` only when the session should end.
fn dispatch_frame(
    text: &str,
    event_tx: &broadcast::Sender<MarketEventMessage>,
    ignored: &mut u64,
) -> Option<SessionEnd> {
    match parse_frame(text) {
        Frame::Event(event) => {
            if event_tx.send(*event).is_err() {
                return Some(SessionEnd::ReceiverDropped);
            }
        }
        Frame::Welcome => debug!("Received welcome message"),
        Frame::Ignored(kind) => {
            *ignored += 1;
            if *ignored % 10_000 == 1 {
                debug!("Ignoring {} events (total ignored: {})", kind, ignored);
            }
        }
        Frame::Invalid(e) => {
            warn!("Failed to parse message: {}", e);
            debug!("Raw message: {}", text);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = WebSocketConfig::new("ws://localhost:8080")
            .with_ping_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(5), Duration::from_secs(1))
            .with_channel_buffer_size(0);

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        // Max never below the base delay
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.channel_buffer_size, 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = WebSocketConfig::default();
        assert_eq!(config.backoff(0), Duration::from_secs(2));
        assert_eq!(config.backoff(1), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(16));
        assert_eq!(config.backoff(5), Duration::from_secs(60));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_frame() {
        assert!(matches!(
            parse_frame(r#"{"type":"welcome","message":"hi"}"#),
            Frame::Welcome
        ));
        assert!(matches!(parse_frame("not json"), Frame::Invalid(_)));

        let envelope = |kind: &str| {
            format!(
                r#"{{"time_exchange":"2024-01-01T00:00:00Z","time_received":"2024-01-01T00:00:00Z",
                "exchange":"BinanceFuturesUsd","instrument":{{"base":"btc","quote":"usdt","kind":"Perpetual"}},
                "kind":"{kind}","data":{{}}}}"#
            )
        };

        match parse_frame(&envelope("funding_rate")) {
            Frame::Event(event) => assert_eq!(event.instrument.symbol(), "BTCUSDT"),
            other => panic!("unexpected frame {other:?}"),
        }
        match parse_frame(&envelope("liquidation")) {
            Frame::Ignored(kind) => assert_eq!(kind, "liquidation"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    fn trade_frame(price: f64) -> String {
        format!(
            r#"{{"time_exchange":"2024-01-01T00:00:00Z","time_received":"2024-01-01T00:00:00Z",
            "exchange":"BinanceFuturesUsd","instrument":{{"base":"btc","quote":"usdt","kind":"Perpetual"}},
            "kind":"trade","data":{{"price":{price},"amount":1.0,"side":"Buy"}}}}"#
        )
    }

    #[test]
    fn test_full_buffer_drops_oldest_without_blocking() {
        let (event_tx, mut events) = broadcast::channel(4);
        let mut ignored = 0;

        for i in 0..10 {
            let frame = trade_frame(100.0 + i as f64);
            assert_eq!(dispatch_frame(&frame, &event_tx, &mut ignored), None);
        }

        assert_eq!(
            events.try_recv().unwrap_err(),
            broadcast::error::TryRecvError::Lagged(6)
        );
        let prices: Vec<f64> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| event.data["price"].as_f64().unwrap())
            .collect();
        assert_eq!(prices, vec![106.0, 107.0, 108.0, 109.0]);
    }

    #[test]
    fn test_dispatch_ends_session_without_receivers() {
        let (event_tx, events) = broadcast::channel(4);
        drop(events);
        let mut ignored = 0;

        assert_eq!(
            dispatch_frame(&trade_frame(1.0), &event_tx, &mut ignored),
            Some(SessionEnd::ReceiverDropped)
        );
        // Non-event frames never touch the channel
        assert_eq!(dispatch_frame(r#"{"type":"welcome"}"#, &event_tx, &mut ignored), None);
    }
}
