//! Authenticated venue stream client.
//!
//! Connects with RSA-signed handshake headers (generated fresh on every
//! connect), subscribes to the configured channels, and converts raw venue
//! messages into typed [`StreamEvent`]s with prices in dollars.
//!
//! Reconnect policy: on any socket error or silence beyond `max_silence`,
//! close, wait `min(30, 2^n)` seconds, reconnect, and resubscribe from the
//! local subscription set. Fill and order-update events are never dropped:
//! they block on the event queue, while ticker/trade events are shed under
//! backpressure.

pub mod message;

use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as WsFrame},
};
use tracing::{debug, info, warn};

use crate::auth::Signer;
use crate::domain::{BookSide, MarketDataEvent, OwnOrderEvent, Side, StreamEvent};
use crate::error::StreamError;
use crate::rest::model::cents_to_dollars;
use message::*;

/// Channels carrying public market data, scoped to tickers.
const MARKET_CHANNELS: [&str; 3] = ["orderbook_delta", "ticker", "trade"];
/// Owner channels carrying fills and order updates for our own orders.
const OWNER_CHANNELS: [&str; 2] = ["fill", "order_update"];

/// Maximum reconnect wait in seconds.
const MAX_RECONNECT_WAIT_S: u64 = 30;

/// Stream client configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    /// Silence threshold before the watchdog treats the socket as dead.
    pub max_silence: Duration,
}

/// Authenticated streaming client.
pub struct StreamClient {
    config: StreamConfig,
    signer: Signer,
    /// Tickers the subscription set is scoped to; restored on reconnect.
    tickers: Vec<String>,
    events: mpsc::Sender<StreamEvent>,
    /// Monotonic command id, never reset across reconnects.
    next_cmd_id: u64,
    /// Market events shed under backpressure (fills are never shed).
    shed_events: u64,
}

impl StreamClient {
    pub fn new(
        config: StreamConfig,
        signer: Signer,
        tickers: Vec<String>,
        events: mpsc::Sender<StreamEvent>,
    ) -> Self {
        Self {
            config,
            signer,
            tickers,
            events,
            next_cmd_id: 0,
            shed_events: 0,
        }
    }

    fn next_cmd_id(&mut self) -> u64 {
        self.next_cmd_id += 1;
        self.next_cmd_id
    }

    /// Run the connect/read/reconnect loop until the event queue closes.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;

        loop {
            match self.connect_and_read().await {
                Ok(()) => {
                    // Event queue closed: the engine is shutting down.
                    info!("stream client stopping");
                    return;
                }
                Err(err) => {
                    warn!(error = %err, "stream connection lost");
                    if self.events.send(StreamEvent::Disconnected).await.is_err() {
                        return;
                    }
                    let wait = MAX_RECONNECT_WAIT_S.min(1u64 << failures.min(5));
                    failures = failures.saturating_add(1);
                    info!(wait_s = wait, "reconnecting to stream");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
            }
        }
    }

    /// One connection lifetime: connect, subscribe, read until error/silence.
    /// Returns `Ok(())` only when the receiving side has gone away.
    async fn connect_and_read(&mut self) -> Result<(), StreamError> {
        // Fresh auth headers on every connect; never reuse a timestamp.
        let headers = self
            .signer
            .sign_ws()
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;
        for (name, value) in headers.pairs() {
            let value = value
                .parse()
                .map_err(|_| StreamError::ConnectionFailed(format!("bad header {}", name)))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _) = connect_async(request).await?;
        info!(url = %self.config.url, "connected to venue stream");
        let (mut sink, mut reader) = ws.split();

        // Restore the subscription set exactly as configured.
        let market_cmd = subscribe_command(
            self.next_cmd_id(),
            &MARKET_CHANNELS,
            Some(&self.tickers),
        );
        sink.send(WsFrame::text(market_cmd))
            .await
            .map_err(|e| StreamError::SendFailed(e.to_string()))?;

        let owner_cmd = subscribe_command(self.next_cmd_id(), &OWNER_CHANNELS, None);
        sink.send(WsFrame::text(owner_cmd))
            .await
            .map_err(|e| StreamError::SendFailed(e.to_string()))?;

        debug!(tickers = self.tickers.len(), "subscriptions restored");

        if self.events.send(StreamEvent::Connected).await.is_err() {
            return Ok(());
        }

        // Sequence numbers are strictly monotonic per connection; duplicates
        // and regressions are dropped.
        let mut last_seq: u64 = 0;

        loop {
            let frame = match tokio::time::timeout(self.config.max_silence, reader.next()).await {
                Err(_) => {
                    return Err(StreamError::Silent(self.config.max_silence.as_secs()));
                }
                Ok(None) => return Err(StreamError::Closed("stream ended".into())),
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                WsFrame::Text(text) => text,
                WsFrame::Ping(payload) => {
                    let _ = sink.send(WsFrame::Pong(payload)).await;
                    continue;
                }
                WsFrame::Pong(_) => continue,
                WsFrame::Close(frame) => {
                    return Err(StreamError::Closed(format!("{:?}", frame)));
                }
                _ => continue,
            };

            let parsed: WsMessage = match serde_json::from_str(&text) {
                Ok(message) => message,
                Err(err) => {
                    debug!(error = %err, payload = %text, "unparseable stream message");
                    continue;
                }
            };

            if let Some(seq) = parsed.seq() {
                if seq != 0 && seq <= last_seq {
                    debug!(seq, last_seq, "dropping duplicate/stale sequence");
                    continue;
                }
                if seq != 0 {
                    last_seq = seq;
                }
            }

            if !self.dispatch(parsed).await {
                return Ok(());
            }
        }
    }

    /// Convert and forward one message. Returns `false` if the engine side
    /// of the queue has closed.
    async fn dispatch(&mut self, message: WsMessage) -> bool {
        let now = Utc::now();
        match message {
            WsMessage::Ticker(env) => {
                let data = env.msg;
                let ts = data
                    .ts
                    .and_then(|s| Utc.timestamp_opt(s, 0).single())
                    .unwrap_or(now);
                self.forward_market(MarketDataEvent::Ticker {
                    ticker: data.market_ticker,
                    bid: data.yes_bid.map(cents_to_dollars),
                    ask: data.yes_ask.map(cents_to_dollars),
                    last: data.price.map(cents_to_dollars),
                    volume_24h: data.volume.map(rust_decimal::Decimal::from),
                    ts,
                })
                .await
            }
            WsMessage::OrderbookSnapshot(env) => {
                let data = env.msg;
                let convert = |levels: Vec<(u32, u32)>| {
                    levels
                        .into_iter()
                        .map(|(price, count)| (cents_to_dollars(price), count))
                        .collect()
                };
                // Book state must stay coherent: snapshots/deltas block
                // rather than shed.
                self.events
                    .send(StreamEvent::Market(MarketDataEvent::BookSnapshot {
                        ticker: data.market_ticker,
                        yes: convert(data.yes),
                        no: convert(data.no),
                        ts: now,
                    }))
                    .await
                    .is_ok()
            }
            WsMessage::OrderbookDelta(env) => {
                let data = env.msg;
                let side = match data.side.as_str() {
                    "yes" => BookSide::Yes,
                    "no" => BookSide::No,
                    other => {
                        debug!(side = %other, "delta with unknown side");
                        return true;
                    }
                };
                self.events
                    .send(StreamEvent::Market(MarketDataEvent::BookDelta {
                        ticker: data.market_ticker,
                        side,
                        price: cents_to_dollars(data.price),
                        delta: data.delta,
                        ts: now,
                    }))
                    .await
                    .is_ok()
            }
            WsMessage::Trade(env) => {
                let data = env.msg;
                let ts = data
                    .ts
                    .and_then(|s| Utc.timestamp_opt(s, 0).single())
                    .unwrap_or(now);
                self.forward_market(MarketDataEvent::Trade {
                    ticker: data.market_ticker,
                    price: cents_to_dollars(data.yes_price),
                    count: data.count,
                    ts,
                })
                .await
            }
            WsMessage::Fill(env) => {
                let data = env.msg;
                let side = if data.action == "buy" { Side::Buy } else { Side::Sell };
                info!(
                    order_id = %data.order_id,
                    ticker = %data.market_ticker,
                    count = data.count,
                    price_cents = data.yes_price,
                    "own-order fill received"
                );
                self.events
                    .send(StreamEvent::OwnOrder(OwnOrderEvent::Fill {
                        venue_order_id: data.order_id,
                        ticker: data.market_ticker,
                        side,
                        price: cents_to_dollars(data.yes_price),
                        count: data.count,
                    }))
                    .await
                    .is_ok()
            }
            WsMessage::OrderUpdate(env) => {
                let data = env.msg;
                // map_status already warned; without a meaningful status
                // there is nothing safe to apply.
                let Some(status) = crate::rest::model::map_status(&data.status) else {
                    return true;
                };
                self.events
                    .send(StreamEvent::OwnOrder(OwnOrderEvent::OrderUpdate {
                        venue_order_id: data.order_id,
                        status,
                        remaining_contracts: data.remaining_count,
                    }))
                    .await
                    .is_ok()
            }
            WsMessage::Subscribed { id, .. } => {
                debug!(id, "subscription confirmed");
                true
            }
            WsMessage::Error { id, msg } => {
                warn!(id, error = ?msg, "stream error message");
                true
            }
            WsMessage::Unknown => true,
        }
    }

    /// Forward a sheddable market event: under backpressure it is dropped
    /// and counted, since a later update supersedes it.
    async fn forward_market(&mut self, event: MarketDataEvent) -> bool {
        match self.events.try_send(StreamEvent::Market(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shed_events += 1;
                if self.shed_events % 1000 == 1 {
                    warn!(total = self.shed_events, "shedding market events under backpressure");
                }
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
