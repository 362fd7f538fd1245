//! Position lifecycle tracking.
//!
//! Indexed by id and by ticker. At most one non-closed position may exist
//! per ticker. The tracker stores state; the executor drives transitions.

use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ExitReason, Position, PositionStatus};

/// How many closed positions to keep in memory.
const CLOSED_KEEP: usize = 100;

#[derive(Debug, Default)]
pub struct PositionTracker {
    open: HashMap<Uuid, Position>,
    by_ticker: HashMap<String, Uuid>,
    closed: Vec<Position>,
}

impl PositionTracker {
    /// Track a new position. Refuses a second non-closed position for the
    /// same ticker.
    pub fn open(&mut self, position: Position) -> bool {
        if self.by_ticker.contains_key(&position.ticker) {
            warn!(ticker = %position.ticker, "refusing second open position for ticker");
            return false;
        }
        info!(
            position_id = %position.id,
            ticker = %position.ticker,
            entry = %position.entry_price,
            size = %position.size,
            stop_loss = %position.stop_loss_price,
            take_profit = %position.take_profit_price,
            "position opened"
        );
        self.by_ticker.insert(position.ticker.clone(), position.id);
        self.open.insert(position.id, position);
        true
    }

    pub fn get(&self, id: &Uuid) -> Option<&Position> {
        self.open.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut Position> {
        self.open.get_mut(id)
    }

    pub fn for_ticker(&self, ticker: &str) -> Option<&Position> {
        self.by_ticker.get(ticker).and_then(|id| self.open.get(id))
    }

    pub fn has_open(&self, ticker: &str) -> bool {
        self.by_ticker.contains_key(ticker)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    pub fn open_positions_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.open.values_mut()
    }

    /// Record the entry fill: actual price, size and contract count.
    pub fn mark_entered(
        &mut self,
        id: &Uuid,
        fill_price: Decimal,
        fill_size: Decimal,
        contracts: u32,
    ) -> Option<&Position> {
        let position = self.open.get_mut(id)?;
        position.entry_price = fill_price;
        position.size = fill_size;
        position.contracts = contracts;
        position.entered_at = Some(chrono::Utc::now());
        if position.status == PositionStatus::Entering {
            position.status = PositionStatus::Entered;
        }
        Some(position)
    }

    /// Attach the paired protective exits.
    pub fn attach_exits(&mut self, id: &Uuid, stop_loss: Uuid, take_profit: Uuid) {
        if let Some(position) = self.open.get_mut(id) {
            position.stop_loss_order_id = Some(stop_loss);
            position.take_profit_order_id = Some(take_profit);
        }
    }

    /// Close a position and move it to the closed list.
    pub fn close(&mut self, id: &Uuid, exit_price: Decimal, reason: ExitReason) -> Option<Position> {
        let mut position = self.open.remove(id)?;
        self.by_ticker.remove(&position.ticker);
        position.close(exit_price, reason);

        info!(
            position_id = %position.id,
            ticker = %position.ticker,
            exit_price = %exit_price,
            reason = reason.as_str(),
            realized_pnl = %position.realized_pnl.unwrap_or_default(),
            "position closed"
        );

        self.closed.push(position.clone());
        if self.closed.len() > CLOSED_KEEP {
            let excess = self.closed.len() - CLOSED_KEEP;
            self.closed.drain(..excess);
        }
        Some(position)
    }

    /// Remove a position that never entered (entry cancelled unfilled).
    pub fn discard(&mut self, id: &Uuid) -> Option<Position> {
        let position = self.open.remove(id)?;
        self.by_ticker.remove(&position.ticker);
        info!(position_id = %position.id, ticker = %position.ticker, "position discarded");
        Some(position)
    }

    /// Total unrealized P&L over open positions given current prices.
    pub fn unrealized_pnl(&self, price_of: impl Fn(&str) -> Option<Decimal>) -> Decimal {
        self.open
            .values()
            .filter_map(|p| price_of(&p.ticker).map(|price| p.unrealized_pnl(price)))
            .sum()
    }

    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }
}
