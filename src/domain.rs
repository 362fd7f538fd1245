//! Core data model: orders, positions, signals, and the events that flow
//! between tasks.
//!
//! All prices are decimal dollars in [0.00, 1.00] with 4 decimal places, and
//! all sizes are decimal dollars with 2 decimal places. Integer cents and
//! contract counts exist only at the REST and stream boundaries; the boundary
//! values actually used for an order (contract counts) are cached on the
//! [`Order`] so fills can be reconciled without re-deriving them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of decimal places for prices.
pub const PRICE_DP: u32 = 4;
/// Number of decimal places for dollar amounts.
pub const DOLLARS_DP: u32 = 2;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// What an order is for, within a position's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPurpose {
    Entry,
    StopLoss,
    TakeProfit,
    /// Aggressive limit used for strategy/emergency exits.
    Liquidation,
}

/// Order status. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Created,
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// An order as tracked internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Assigned on creation, before any venue interaction.
    pub client_id: Uuid,
    /// Assigned by the venue on submit.
    pub venue_id: Option<String>,
    pub ticker: String,
    pub side: Side,
    /// Limit price in dollars.
    pub price: Decimal,
    /// Requested size in dollars.
    pub size: Decimal,
    /// Cumulative filled value in dollars (`filled_contracts * price`).
    pub filled_size: Decimal,
    pub status: OrderStatus,
    pub purpose: OrderPurpose,
    pub position_id: Option<Uuid>,
    /// Contract count actually sent to the venue (`floor(size / price)`).
    pub contracts: u32,
    /// Contracts filled so far, per venue fill events.
    pub filled_contracts: u32,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        ticker: impl Into<String>,
        side: Side,
        price: Decimal,
        size: Decimal,
        purpose: OrderPurpose,
        position_id: Option<Uuid>,
    ) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            venue_id: None,
            ticker: ticker.into(),
            side,
            price: price.round_dp(PRICE_DP),
            size: size.round_dp(DOLLARS_DP),
            filled_size: Decimal::ZERO,
            status: OrderStatus::Created,
            purpose,
            position_id,
            contracts: 0,
            filled_contracts: 0,
            created_at: Utc::now(),
            submitted_at: None,
            filled_at: None,
        }
    }

    /// Apply a status transition. Terminal states are absorbing: once
    /// terminal, further transitions are ignored and `false` is returned.
    pub fn apply_status(&mut self, status: OrderStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        if status == OrderStatus::Filled {
            self.filled_at = Some(Utc::now());
        }
        true
    }

    /// Record a fill of `count` contracts. Clamps so `filled_size ≤ size`
    /// and promotes the status to partially/fully filled.
    pub fn record_fill(&mut self, count: u32) {
        if self.status.is_terminal() {
            return;
        }
        self.filled_contracts = (self.filled_contracts + count).min(self.contracts);
        self.filled_size = (self.price * Decimal::from(self.filled_contracts))
            .round_dp(DOLLARS_DP)
            .min(self.size);
        if self.filled_contracts >= self.contracts {
            self.apply_status(OrderStatus::Filled);
        } else {
            self.apply_status(OrderStatus::PartiallyFilled);
        }
    }

    /// Contracts still unfilled.
    pub fn remaining_contracts(&self) -> u32 {
        self.contracts.saturating_sub(self.filled_contracts)
    }

    /// Dollar value of the filled contracts at the limit price.
    pub fn filled_value(&self) -> Decimal {
        (self.price * Decimal::from(self.filled_contracts)).round_dp(DOLLARS_DP)
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Position status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Entering,
    Entered,
    Exiting,
    Closed,
}

/// Why a position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Timeout,
    MarketClosed,
    Emergency,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TakeProfit => "TAKE_PROFIT",
            Self::StopLoss => "STOP_LOSS",
            Self::Timeout => "TIMEOUT",
            Self::MarketClosed => "MARKET_CLOSED",
            Self::Emergency => "EMERGENCY",
            Self::Manual => "MANUAL",
        }
    }
}

/// A long position and its paired protective exits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub ticker: String,
    /// Fill price of the entry order.
    pub entry_price: Decimal,
    /// Actual filled dollars.
    pub size: Decimal,
    /// Contracts held, mirroring the entry order's filled count.
    pub contracts: u32,
    pub status: PositionStatus,
    pub entry_order_id: Uuid,
    pub stop_loss_order_id: Option<Uuid>,
    pub take_profit_order_id: Option<Uuid>,
    /// Aggressive exit order, set when a strategy exit is in flight.
    pub exit_order_id: Option<Uuid>,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    /// Reason recorded when a strategy exit was issued but has not filled yet.
    pub pending_exit_reason: Option<ExitReason>,
    pub opened_at: DateTime<Utc>,
    pub entered_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<Decimal>,
    /// Best unrealized P&L percentage seen while open.
    pub max_profit_pct: Option<Decimal>,
    /// Worst unrealized P&L percentage seen while open.
    pub max_drawdown_pct: Option<Decimal>,
}

impl Position {
    pub fn new(
        ticker: impl Into<String>,
        entry_order_id: Uuid,
        entry_price: Decimal,
        size: Decimal,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticker: ticker.into(),
            entry_price: entry_price.round_dp(PRICE_DP),
            size: size.round_dp(DOLLARS_DP),
            contracts: 0,
            status: PositionStatus::Entering,
            entry_order_id,
            stop_loss_order_id: None,
            take_profit_order_id: None,
            exit_order_id: None,
            stop_loss_price: stop_loss_price.round_dp(PRICE_DP),
            take_profit_price: take_profit_price.round_dp(PRICE_DP),
            pending_exit_reason: None,
            opened_at: Utc::now(),
            entered_at: None,
            closed_at: None,
            exit_price: None,
            exit_reason: None,
            realized_pnl: None,
            max_profit_pct: None,
            max_drawdown_pct: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    /// Unrealized P&L in dollars at the given market price.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        ((current_price - self.entry_price) * self.size).round_dp(DOLLARS_DP)
    }

    /// Unrealized P&L as a percentage of the entry price.
    pub fn unrealized_pnl_pct(&self, current_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        ((current_price - self.entry_price) / self.entry_price) * Decimal::ONE_HUNDRED
    }

    /// Track the best/worst unrealized P&L percentages seen while open.
    pub fn update_excursions(&mut self, current_price: Decimal) {
        let pnl_pct = self.unrealized_pnl_pct(current_price);
        if self.max_profit_pct.map_or(true, |best| pnl_pct > best) {
            self.max_profit_pct = Some(pnl_pct);
        }
        if self.max_drawdown_pct.map_or(true, |worst| pnl_pct < worst) {
            self.max_drawdown_pct = Some(pnl_pct);
        }
    }

    /// Close the position, computing realized P&L.
    pub fn close(&mut self, exit_price: Decimal, reason: ExitReason) {
        self.status = PositionStatus::Closed;
        self.closed_at = Some(Utc::now());
        self.exit_price = Some(exit_price.round_dp(PRICE_DP));
        self.exit_reason = Some(reason);
        self.realized_pnl = Some(((exit_price - self.entry_price) * self.size).round_dp(DOLLARS_DP));
    }

    /// Hours this position has been (or was) held, from entry fill.
    pub fn held_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        match self.entered_at {
            Some(entered) => self.closed_at.unwrap_or(now) - entered,
            None => chrono::Duration::zero(),
        }
    }
}

/// Signal strength bucket, derived from confidence. Diagnostic only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalStrength {
    Weak,
    Medium,
    Strong,
}

/// An entry signal produced by the strategy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub ticker: String,
    pub entry_price: Decimal,
    /// Position size in dollars.
    pub size: Decimal,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    /// Confidence in [0, 1].
    pub confidence: Decimal,
    pub strength: SignalStrength,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Reward-to-risk ratio `(tp − entry) / (entry − sl)`.
    pub fn risk_reward(&self) -> Option<Decimal> {
        let risk = self.entry_price - self.stop_loss_price;
        let reward = self.take_profit_price - self.entry_price;
        if risk <= Decimal::ZERO {
            return None;
        }
        Some(reward / risk)
    }
}

/// Which side of the binary book a level belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookSide {
    Yes,
    No,
}

/// Market data events emitted by the stream client, prices already in dollars.
#[derive(Debug, Clone)]
pub enum MarketDataEvent {
    Ticker {
        ticker: String,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        last: Option<Decimal>,
        volume_24h: Option<Decimal>,
        ts: DateTime<Utc>,
    },
    BookSnapshot {
        ticker: String,
        yes: Vec<(Decimal, u32)>,
        no: Vec<(Decimal, u32)>,
        ts: DateTime<Utc>,
    },
    BookDelta {
        ticker: String,
        side: BookSide,
        price: Decimal,
        delta: i64,
        ts: DateTime<Utc>,
    },
    Trade {
        ticker: String,
        price: Decimal,
        count: u32,
        ts: DateTime<Utc>,
    },
}

impl MarketDataEvent {
    pub fn ticker(&self) -> &str {
        match self {
            Self::Ticker { ticker, .. }
            | Self::BookSnapshot { ticker, .. }
            | Self::BookDelta { ticker, .. }
            | Self::Trade { ticker, .. } => ticker,
        }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        match self {
            Self::Ticker { ts, .. }
            | Self::BookSnapshot { ts, .. }
            | Self::BookDelta { ts, .. }
            | Self::Trade { ts, .. } => *ts,
        }
    }
}

/// Own-order events from the stream (fills and status changes).
#[derive(Debug, Clone)]
pub enum OwnOrderEvent {
    Fill {
        venue_order_id: String,
        ticker: String,
        side: Side,
        price: Decimal,
        count: u32,
    },
    OrderUpdate {
        venue_order_id: String,
        status: OrderStatus,
        remaining_contracts: u32,
    },
}

/// Everything the stream task forwards to the engine.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Market(MarketDataEvent),
    OwnOrder(OwnOrderEvent),
    /// Connection (re-)established and subscriptions restored.
    Connected,
    Disconnected,
}

/// Lifecycle commands from the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Finish open exits, stop accepting signals, drain, close.
    GracefulStop,
    /// Force-exit all positions, then stop.
    EmergencyStop,
    /// Operator override for the API-error breaker.
    ResetBreaker,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_order() -> Order {
        let mut order = Order::new(
            "KXTEST-MKT",
            Side::Buy,
            dec!(0.91),
            dec!(100),
            OrderPurpose::Entry,
            None,
        );
        order.contracts = 109;
        order
    }

    #[test]
    fn fill_accumulates_and_clamps() {
        let mut order = test_order();
        order.record_fill(50);
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.filled_contracts, 50);
        assert_eq!(order.filled_size, dec!(45.50));

        // Overfill clamps to the requested count.
        order.record_fill(100);
        assert_eq!(order.filled_contracts, 109);
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.filled_size <= order.size);
    }

    #[test]
    fn terminal_status_is_absorbing() {
        let mut order = test_order();
        assert!(order.apply_status(OrderStatus::Cancelled));
        assert!(!order.apply_status(OrderStatus::Open));
        assert_eq!(order.status, OrderStatus::Cancelled);

        // Fills after a terminal status are ignored.
        order.record_fill(10);
        assert_eq!(order.filled_contracts, 0);
    }

    #[test]
    fn position_close_computes_pnl() {
        let mut position = Position::new(
            "KXTEST-MKT",
            Uuid::new_v4(),
            dec!(0.91),
            dec!(100),
            dec!(0.9009),
            dec!(0.9282),
        );
        position.close(dec!(0.9282), ExitReason::TakeProfit);

        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.realized_pnl, Some(dec!(1.82)));
        assert_eq!(position.exit_reason, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn excursion_tracking_keeps_best_and_worst() {
        let mut position = Position::new(
            "KXTEST-MKT",
            Uuid::new_v4(),
            dec!(0.90),
            dec!(100),
            dec!(0.891),
            dec!(0.918),
        );
        position.update_excursions(dec!(0.92));
        position.update_excursions(dec!(0.89));
        position.update_excursions(dec!(0.91));

        assert!(position.max_profit_pct.unwrap() > Decimal::ZERO);
        assert!(position.max_drawdown_pct.unwrap() < Decimal::ZERO);
    }

    #[test]
    fn signal_risk_reward() {
        let signal = Signal {
            ticker: "KXTEST-MKT".into(),
            entry_price: dec!(0.91),
            size: dec!(100),
            stop_loss_price: dec!(0.9009),
            take_profit_price: dec!(0.9282),
            confidence: dec!(0.90),
            strength: SignalStrength::Strong,
            created_at: Utc::now(),
        };
        // (0.0182) / (0.0091) = 2
        assert_eq!(signal.risk_reward(), Some(dec!(2)));
    }
}
