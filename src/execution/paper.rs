//! Simulated matching gateway for paper trading.
//!
//! Mirrors the live gateway's contract: orders rest inside the simulator and
//! fill against market updates. A BUY limit at `P` fills when `best_ask ≤ P`
//! and a SELL limit at `P` fills when `best_bid ≥ P`, both at the limit
//! price. Stop-loss SELLs get stop semantics: they trigger when the bid
//! falls to or through the stop after having been higher — a plain
//! bid-crosses-limit rule would either fire the stop at placement (the stop
//! sits inside the spread) or never fire it on the way down. Fills are
//! reported through the same [`OwnOrderEvent`] shape the stream produces, so
//! order tracking, position lifecycle, accounting and risk all run the exact
//! code paths of live trading.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::{Order, OrderPurpose, OwnOrderEvent, Side};
use crate::error::RestError;
use crate::market::Market;

use super::gateway::{OrderGateway, Submission};

/// An order resting in the simulator.
#[derive(Debug, Clone)]
struct RestingOrder {
    venue_id: String,
    ticker: String,
    side: Side,
    price: Decimal,
    contracts: u32,
    /// Stop semantics (trigger on the way down) instead of plain limit.
    is_stop: bool,
    /// Highest bid seen since placement; the stop arms against this.
    reference_bid: Option<Decimal>,
}

impl RestingOrder {
    fn crosses(&mut self, market: &Market) -> bool {
        match self.side {
            Side::Buy => market.best_ask.is_some_and(|ask| ask <= self.price),
            Side::Sell if self.is_stop => {
                let Some(bid) = market.best_bid else {
                    return false;
                };
                let reference = self.reference_bid.get_or_insert(bid);
                if bid > *reference {
                    *reference = bid;
                    return false;
                }
                bid <= self.price && bid < *reference
            }
            Side::Sell => market.best_bid.is_some_and(|bid| bid >= self.price),
        }
    }
}

/// Simulated venue. Single-threaded like everything else in the engine.
#[derive(Debug, Default)]
pub struct PaperGateway {
    resting: HashMap<String, RestingOrder>,
    next_id: u64,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resting_count(&self) -> usize {
        self.resting.len()
    }

    fn fill_event(order: &RestingOrder) -> OwnOrderEvent {
        OwnOrderEvent::Fill {
            venue_order_id: order.venue_id.clone(),
            ticker: order.ticker.clone(),
            side: order.side,
            price: order.price,
            count: order.contracts,
        }
    }
}

impl OrderGateway for PaperGateway {
    async fn submit(&mut self, order: &Order) -> Result<Submission, RestError> {
        if order.price <= Decimal::ZERO {
            return Err(RestError::Validation(format!(
                "non-positive price {}",
                order.price
            )));
        }
        let contracts = (order.size / order.price).floor().to_u32().unwrap_or(0);
        if contracts == 0 {
            return Err(RestError::Validation(format!(
                "size {} at price {} rounds to zero contracts",
                order.size, order.price
            )));
        }

        self.next_id += 1;
        let venue_id = format!("sim-{}", self.next_id);
        let resting = RestingOrder {
            venue_id: venue_id.clone(),
            ticker: order.ticker.clone(),
            side: order.side,
            price: order.price,
            contracts,
            is_stop: order.purpose == OrderPurpose::StopLoss,
            reference_bid: None,
        };
        debug!(%venue_id, ticker = %order.ticker, side = ?order.side, price = %order.price, contracts, "paper order resting");
        self.resting.insert(venue_id.clone(), resting);

        let cost = (order.price * Decimal::from(contracts)).round_dp(2);
        Ok(Submission { venue_id, contracts, cost })
    }

    async fn cancel(&mut self, venue_id: &str) -> Result<(), RestError> {
        // Idempotent like the live venue's 404-as-success.
        self.resting.remove(venue_id);
        Ok(())
    }

    fn on_market_update(&mut self, market: &Market) -> Vec<OwnOrderEvent> {
        let mut crossed = Vec::new();
        for order in self.resting.values_mut() {
            if order.ticker == market.ticker && order.crosses(market) {
                crossed.push(order.venue_id.clone());
            }
        }

        let mut events = Vec::new();
        for venue_id in crossed {
            if let Some(order) = self.resting.remove(&venue_id) {
                debug!(%venue_id, price = %order.price, contracts = order.contracts, "paper order filled");
                events.push(Self::fill_event(&order));
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn market(bid: Decimal, ask: Decimal) -> Market {
        Market {
            ticker: "KXTEST-MKT".to_string(),
            title: String::new(),
            best_bid: Some(bid),
            best_ask: Some(ask),
            last_price: Some(bid),
            bid_liquidity: dec!(600),
            ask_liquidity: dec!(400),
            volume_24h: dec!(20000),
            recent_volume: Decimal::ZERO,
            active: true,
            end_time: None,
            last_update_ts: Utc::now(),
        }
    }

    fn order(side: Side, price: Decimal, size: Decimal, purpose: OrderPurpose) -> Order {
        Order::new("KXTEST-MKT", side, price, size, purpose, None)
    }

    #[tokio::test]
    async fn buy_fills_when_ask_crosses() {
        let mut gateway = PaperGateway::new();
        let submission = gateway
            .submit(&order(Side::Buy, dec!(0.91), dec!(100), OrderPurpose::Entry))
            .await
            .unwrap();
        assert_eq!(submission.contracts, 109);
        assert_eq!(submission.cost, dec!(99.19));

        // Ask above the limit: nothing happens.
        assert!(gateway.on_market_update(&market(dec!(0.91), dec!(0.92))).is_empty());

        // Ask at the limit: fill for the full count at the limit price.
        let events = gateway.on_market_update(&market(dec!(0.90), dec!(0.91)));
        assert_eq!(events.len(), 1);
        match &events[0] {
            OwnOrderEvent::Fill { price, count, side, .. } => {
                assert_eq!(*price, dec!(0.91));
                assert_eq!(*count, 109);
                assert_eq!(*side, Side::Buy);
            }
            other => panic!("expected fill, got {:?}", other),
        }
        assert_eq!(gateway.resting_count(), 0);
    }

    #[tokio::test]
    async fn sell_fills_when_bid_crosses() {
        let mut gateway = PaperGateway::new();
        gateway
            .submit(&order(Side::Sell, dec!(0.9282), dec!(101.18), OrderPurpose::TakeProfit))
            .await
            .unwrap();

        assert!(gateway.on_market_update(&market(dec!(0.92), dec!(0.93))).is_empty());

        let events = gateway.on_market_update(&market(dec!(0.93), dec!(0.94)));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn stop_rests_inside_spread_then_triggers_on_the_way_down() {
        let mut gateway = PaperGateway::new();
        // Stop at 0.9009 while the market shows 0.90 / 0.91: the stop sits
        // inside the spread and must not fire at placement.
        gateway
            .submit(&order(Side::Sell, dec!(0.9009), dec!(98.20), OrderPurpose::StopLoss))
            .await
            .unwrap();

        assert!(gateway.on_market_update(&market(dec!(0.90), dec!(0.91))).is_empty());
        assert!(gateway.on_market_update(&market(dec!(0.90), dec!(0.91))).is_empty());

        // Bid falls through the stop: filled at the stop price.
        let events = gateway.on_market_update(&market(dec!(0.89), dec!(0.90)));
        assert_eq!(events.len(), 1);
        match &events[0] {
            OwnOrderEvent::Fill { price, .. } => assert_eq!(*price, dec!(0.9009)),
            other => panic!("expected fill, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stop_rearms_after_a_rally() {
        let mut gateway = PaperGateway::new();
        gateway
            .submit(&order(Side::Sell, dec!(0.9009), dec!(98.20), OrderPurpose::StopLoss))
            .await
            .unwrap();

        // Rally above the stop: a stop does not fill on the way up.
        assert!(gateway.on_market_update(&market(dec!(0.90), dec!(0.91))).is_empty());
        assert!(gateway.on_market_update(&market(dec!(0.92), dec!(0.93))).is_empty());

        // Collapse back through it: fills.
        let events = gateway.on_market_update(&market(dec!(0.8950), dec!(0.9050)));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let mut gateway = PaperGateway::new();
        let submission = gateway
            .submit(&order(Side::Sell, dec!(0.93), dec!(100), OrderPurpose::TakeProfit))
            .await
            .unwrap();

        gateway.cancel(&submission.venue_id).await.unwrap();
        gateway.cancel(&submission.venue_id).await.unwrap();
        gateway.cancel("sim-never-existed").await.unwrap();
        assert_eq!(gateway.resting_count(), 0);
    }

    #[tokio::test]
    async fn zero_contract_sizes_are_rejected() {
        let mut gateway = PaperGateway::new();
        let result = gateway
            .submit(&order(Side::Buy, dec!(0.91), dec!(0.50), OrderPurpose::Entry))
            .await;
        assert!(matches!(result, Err(RestError::Validation(_))));
    }

    #[tokio::test]
    async fn other_tickers_do_not_match() {
        let mut gateway = PaperGateway::new();
        gateway
            .submit(&order(Side::Buy, dec!(0.91), dec!(100), OrderPurpose::Entry))
            .await
            .unwrap();

        let mut other = market(dec!(0.50), dec!(0.51));
        other.ticker = "KXOTHER-MKT".to_string();
        assert!(gateway.on_market_update(&other).is_empty());
        assert_eq!(gateway.resting_count(), 1);
    }
}
