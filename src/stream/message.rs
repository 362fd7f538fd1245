//! Venue stream message types.
//!
//! All server messages use a wrapper format:
//! ```json
//! { "type": "<message_type>", "sid": <sub_id>, "seq": <seq_num>, "msg": { ... } }
//! ```
//! Client-originated messages are `{id, cmd, params}` with a monotonically
//! increasing `id`. Prices everywhere in this module are integer cents.

use serde::Deserialize;
use serde_json::json;

/// Server message variants received over the stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    Ticker(WsEnvelope<WsTickerData>),
    OrderbookSnapshot(WsEnvelope<WsBookSnapshotData>),
    OrderbookDelta(WsEnvelope<WsBookDeltaData>),
    Trade(WsEnvelope<WsTradeData>),
    Fill(WsEnvelope<WsFillData>),
    OrderUpdate(WsEnvelope<WsOrderUpdateData>),
    Subscribed {
        id: u64,
        #[serde(default)]
        msg: serde_json::Value,
    },
    Error {
        #[serde(default)]
        id: u64,
        #[serde(default)]
        msg: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

impl WsMessage {
    /// Per-connection sequence number, where the message carries one.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Ticker(env) => Some(env.seq),
            Self::OrderbookSnapshot(env) => Some(env.seq),
            Self::OrderbookDelta(env) => Some(env.seq),
            Self::Trade(env) => Some(env.seq),
            Self::Fill(env) => Some(env.seq),
            Self::OrderUpdate(env) => Some(env.seq),
            _ => None,
        }
    }
}

/// Common `{sid, seq, msg}` wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct WsEnvelope<T> {
    #[serde(default)]
    pub sid: u64,
    #[serde(default)]
    pub seq: u64,
    pub msg: T,
}

/// Ticker update payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WsTickerData {
    pub market_ticker: String,
    /// Last traded YES price in cents.
    #[serde(alias = "yes_price")]
    pub price: Option<u32>,
    pub yes_bid: Option<u32>,
    pub yes_ask: Option<u32>,
    /// 24h volume.
    pub volume: Option<i64>,
    /// Venue timestamp, seconds since epoch.
    pub ts: Option<i64>,
}

/// Full orderbook snapshot payload. Levels are `[price_cents, count]`.
#[derive(Debug, Clone, Deserialize)]
pub struct WsBookSnapshotData {
    pub market_ticker: String,
    #[serde(default)]
    pub yes: Vec<(u32, u32)>,
    #[serde(default)]
    pub no: Vec<(u32, u32)>,
}

/// Single-level orderbook delta payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WsBookDeltaData {
    pub market_ticker: String,
    /// Price level in cents (1-99).
    pub price: u32,
    /// Signed change in resting contracts at this level.
    pub delta: i64,
    /// "yes" or "no".
    pub side: String,
}

/// Public trade payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WsTradeData {
    pub market_ticker: String,
    pub yes_price: u32,
    pub count: u32,
    #[serde(default)]
    pub taker_side: String,
    pub ts: Option<i64>,
}

/// Own-order fill payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WsFillData {
    pub trade_id: String,
    pub order_id: String,
    #[serde(alias = "ticker")]
    pub market_ticker: String,
    /// "yes" or "no".
    pub side: String,
    /// "buy" or "sell".
    pub action: String,
    pub count: u32,
    pub yes_price: u32,
    pub ts: Option<i64>,
}

/// Own-order status change payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WsOrderUpdateData {
    pub order_id: String,
    #[serde(alias = "ticker")]
    pub market_ticker: Option<String>,
    pub status: String,
    #[serde(default)]
    pub remaining_count: u32,
}

/// Build a `subscribe` command for the given channels and tickers.
pub fn subscribe_command(id: u64, channels: &[&str], tickers: Option<&[String]>) -> String {
    let mut params = json!({ "channels": channels });
    if let Some(tickers) = tickers {
        params["market_tickers"] = json!(tickers);
    }
    json!({ "id": id, "cmd": "subscribe", "params": params }).to_string()
}

/// Build an `unsubscribe` command.
pub fn unsubscribe_command(id: u64, channels: &[&str], tickers: Option<&[String]>) -> String {
    let mut params = json!({ "channels": channels });
    if let Some(tickers) = tickers {
        params["market_tickers"] = json!(tickers);
    }
    json!({ "id": id, "cmd": "unsubscribe", "params": params }).to_string()
}
