//! Per-ticker market state fed by the stream.
//!
//! The [`MarketStore`] applies ticker, orderbook and trade events in arrival
//! order, drops anything older than the market's `last_update_ts`, and
//! reports which tickers changed so the engine can evaluate the strategy once
//! per batch (coalescing multiple deltas into one evaluation).

pub mod book;
pub mod filter;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

use crate::domain::MarketDataEvent;
use crate::rest::MarketInfo;
use book::Ladder;

/// Rolling window for short-horizon traded volume.
const TRADE_WINDOW: Duration = Duration::seconds(60);

/// Live state for one market.
#[derive(Debug, Clone)]
pub struct Market {
    pub ticker: String,
    pub title: String,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_price: Option<Decimal>,
    /// Dollar liquidity across the top bid levels.
    pub bid_liquidity: Decimal,
    pub ask_liquidity: Decimal,
    pub volume_24h: Decimal,
    /// Dollar volume traded in the trailing short window.
    pub recent_volume: Decimal,
    pub active: bool,
    /// Scheduled close, from the venue's market listing.
    pub end_time: Option<DateTime<Utc>>,
    pub last_update_ts: DateTime<Utc>,
}

impl Market {
    fn from_info(info: &MarketInfo) -> Self {
        Self {
            ticker: info.ticker.clone(),
            title: info.title.clone(),
            best_bid: info.best_bid,
            best_ask: info.best_ask,
            last_price: info.last_price,
            bid_liquidity: info.liquidity,
            ask_liquidity: Decimal::ZERO,
            volume_24h: info.volume_24h,
            recent_volume: Decimal::ZERO,
            active: info.active,
            end_time: info.close_time,
            last_update_ts: Utc::now(),
        }
    }

    /// Relative spread `(ask − bid) / bid`.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) if bid > Decimal::ZERO => Some((ask - bid) / bid),
            _ => None,
        }
    }

    /// Midpoint of the top of book.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid, self.best_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Implied probability: the bid price of the YES contract.
    pub fn probability(&self) -> Option<Decimal> {
        self.best_bid
    }
}

/// Mapping from ticker to market state plus its ladder.
#[derive(Debug, Default)]
pub struct MarketStore {
    markets: HashMap<String, Market>,
    ladders: HashMap<String, Ladder>,
    /// (ts, dollar value) of recent public trades per ticker.
    trades: HashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
    /// Updates dropped for arriving out of order.
    stale_dropped: u64,
}

impl MarketStore {
    /// Seed the store from the REST market listing at startup.
    pub fn seed(&mut self, infos: &[MarketInfo]) {
        for info in infos {
            self.markets
                .insert(info.ticker.clone(), Market::from_info(info));
        }
    }

    pub fn get(&self, ticker: &str) -> Option<&Market> {
        self.markets.get(ticker)
    }

    pub fn ladder(&self, ticker: &str) -> Option<&Ladder> {
        self.ladders.get(ticker)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.markets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn stale_dropped(&self) -> u64 {
        self.stale_dropped
    }

    /// Apply one event. Returns the ticker if market state changed; callers
    /// collect these into a set so a batch of deltas triggers one strategy
    /// evaluation per ticker.
    pub fn apply(&mut self, event: &MarketDataEvent) -> Option<String> {
        let ticker = event.ticker();
        let Some(market) = self.markets.get_mut(ticker) else {
            // Not a tracked market; ignore quietly.
            return None;
        };

        if event.ts() < market.last_update_ts {
            self.stale_dropped += 1;
            debug!(%ticker, "dropping out-of-order market update");
            return None;
        }

        match event {
            MarketDataEvent::Ticker { bid, ask, last, volume_24h, ts, .. } => {
                if let Some(bid) = bid {
                    market.best_bid = Some(*bid);
                }
                if let Some(ask) = ask {
                    market.best_ask = Some(*ask);
                }
                if let Some(last) = last {
                    market.last_price = Some(*last);
                }
                if let Some(volume) = volume_24h {
                    market.volume_24h = *volume;
                }
                market.last_update_ts = *ts;
            }
            MarketDataEvent::BookSnapshot { yes, no, ts, .. } => {
                let ladder = self.ladders.entry(ticker.to_string()).or_default();
                ladder.apply_snapshot(yes, no);
                Self::sync_from_ladder(market, ladder);
                market.last_update_ts = *ts;
            }
            MarketDataEvent::BookDelta { side, price, delta, ts, .. } => {
                let ladder = self.ladders.entry(ticker.to_string()).or_default();
                ladder.apply_delta(*side, *price, *delta);
                Self::sync_from_ladder(market, ladder);
                market.last_update_ts = *ts;
            }
            MarketDataEvent::Trade { price, count, ts, .. } => {
                market.last_price = Some(*price);
                market.last_update_ts = *ts;

                let window = self.trades.entry(ticker.to_string()).or_default();
                window.push_back((*ts, *price * Decimal::from(*count)));
                let cutoff = *ts - TRADE_WINDOW;
                while window.front().is_some_and(|(t, _)| *t < cutoff) {
                    window.pop_front();
                }
                market.recent_volume = window.iter().map(|(_, v)| *v).sum::<Decimal>().round_dp(2);
            }
        }

        Some(ticker.to_string())
    }

    /// Apply a batch of events, returning the set of changed tickers.
    pub fn apply_batch<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a MarketDataEvent>,
    ) -> HashSet<String> {
        events.into_iter().filter_map(|e| self.apply(e)).collect()
    }

    /// Mark a market inactive (scheduled close passed or venue said so).
    pub fn deactivate(&mut self, ticker: &str) {
        if let Some(market) = self.markets.get_mut(ticker) {
            market.active = false;
        }
    }

    fn sync_from_ladder(market: &mut Market, ladder: &Ladder) {
        market.best_bid = ladder.best_bid().map(|l| l.price);
        market.best_ask = ladder.best_ask().map(|l| l.price);
        market.bid_liquidity = ladder.bid_liquidity();
        market.ask_liquidity = ladder.ask_liquidity();
    }
}
