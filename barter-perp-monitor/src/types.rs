/// Market event wire types
///
/// These types match the JSON envelope broadcast by the market data server,
/// extended with funding-rate and mark-price snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};

/// Market event message envelope from the server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarketEventMessage {
    /// Timestamp when the event occurred on the exchange
    pub time_exchange: DateTime<Utc>,
    /// Timestamp when the event was received by the server
    pub time_received: DateTime<Utc>,
    /// Exchange name (e.g., "BinanceFuturesUsd")
    pub exchange: String,
    pub instrument: InstrumentInfo,
    /// Event type: "trade", "open_interest", "funding_rate", "mark_price"
    pub kind: String,
    /// Event-specific data (deserialize based on `kind` field)
    pub data: serde_json::Value,
}

/// Instrument information
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentInfo {
    /// Base currency (e.g., "btc")
    pub base: String,
    /// Quote currency (e.g., "usdt")
    pub quote: String,
    /// Contract kind (e.g., "perpetual")
    pub kind: String,
}

impl InstrumentInfo {
    /// Instrument id, e.g. `BTCUSDT`
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote).to_uppercase()
    }
}

/// Trade aggressor side
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }
}

/// Trade event data
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeData {
    #[serde(default)]
    pub id: String,
    pub price: f64,
    /// Trade size (in base currency)
    pub amount: f64,
    /// Side of the aggressor (buyer vs seller initiated)
    pub side: Side,
}

/// Open Interest event data
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenInterestData {
    /// Number of open contracts
    pub contracts: f64,
    /// Notional value (optional, may not be provided by all exchanges)
    pub notional: Option<f64>,
}

/// Funding rate snapshot; exchanges publish the rate as a decimal string
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FundingRateData {
    pub rate: Decimal,
}

impl FundingRateData {
    pub fn rate_f64(&self) -> Option<f64> {
        self.rate.to_f64()
    }
}

/// Mark price snapshot
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MarkPriceData {
    pub price: Decimal,
}

impl MarkPriceData {
    pub fn price_f64(&self) -> Option<f64> {
        self.price.to_f64()
    }
}
