//! Order execution: the three-order state machine.
//!
//! Each accepted signal becomes an entry BUY plus, once the entry fills, a
//! paired stop-loss and take-profit SELL. The executor is the only component
//! that submits or cancels orders; the order manager and position tracker
//! only observe. Fill/cancel races therefore resolve here, in event arrival
//! order: the first exit fill wins, the sibling cancel treats "already gone"
//! as success, and a cancel that keeps failing leaves the position in
//! `EXITING` with an alert rather than ever double-closing.

pub mod gateway;
pub mod order_manager;
pub mod paper;
pub mod position;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::account::Account;
use crate::config::Config;
use crate::domain::{
    ExitReason, Order, OrderPurpose, OrderStatus, OwnOrderEvent, Position, PositionStatus, Signal,
    Side,
};
use crate::error::ExecutionError;
use crate::rest::VenueOrder;
use gateway::OrderGateway;
use order_manager::{OrderChange, OrderManager};
use position::PositionTracker;

/// Sibling-cancel attempts before declaring the position stuck.
const CANCEL_ATTEMPTS: u32 = 3;
/// Aggressive exits price at this fraction of the current bid.
const AGGRESSIVE_FACTOR: Decimal = Decimal::from_parts(95, 0, 0, false, 2); // 0.95
/// Floor for any sell price.
const PRICE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// State changes the engine reacts to (alerts, persistence, breakers).
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    /// Entry submitted, position created in `ENTERING`.
    PositionOpened(Uuid),
    /// Entry filled, paired exits resting, position `ENTERED`.
    PositionEntered(Uuid),
    /// Position closed with final state.
    PositionClosed(Position),
    /// Entry cancelled unfilled; reservation released, position discarded.
    EntryAbandoned(Uuid),
    /// Sibling cancel kept failing; position left in `EXITING`.
    ExitStuck(Uuid),
}

/// Drives orders and positions through one venue gateway (live or paper).
pub struct Executor<G: OrderGateway> {
    pub gateway: G,
    pub orders: OrderManager,
    pub positions: PositionTracker,
    pub account: Account,
    stop_loss_pct: Decimal,
    profit_target_pct: Decimal,
    entry_timeout: chrono::Duration,
    entry_deadlines: HashMap<Uuid, DateTime<Utc>>,
    accepting: bool,
}

impl<G: OrderGateway> Executor<G> {
    pub fn new(gateway: G, account: Account, config: &Config) -> Self {
        Self {
            gateway,
            orders: OrderManager::default(),
            positions: PositionTracker::default(),
            account,
            stop_loss_pct: config.stop_loss,
            profit_target_pct: config.profit_target,
            entry_timeout: chrono::Duration::seconds(config.entry_timeout_s as i64),
            entry_deadlines: HashMap::new(),
            accepting: false,
        }
    }

    /// Whether new signals are accepted (off during recovery and shutdown).
    pub fn accepting(&self) -> bool {
        self.accepting
    }

    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    /// An open position or a pending entry order occupies the ticker.
    pub fn occupied(&self, ticker: &str) -> bool {
        self.positions.has_open(ticker) || self.orders.has_pending_entry(ticker)
    }

    /// Let the gateway observe a market update (paper matching); any
    /// resulting fills are fed back through the normal event path by the
    /// caller.
    pub fn gateway_market_update(&mut self, market: &crate::market::Market) -> Vec<OwnOrderEvent> {
        self.gateway.on_market_update(market)
    }

    /// Execute an approved signal: reserve funds, submit the entry, create
    /// the position in `ENTERING`.
    pub async fn execute_signal(&mut self, signal: &Signal) -> Result<ExecOutcome, ExecutionError> {
        if !self.accepting {
            return Err(ExecutionError::Rejected("executor not accepting signals".into()));
        }

        self.account.lock_funds(signal.size)?;

        let mut order = Order::new(
            &signal.ticker,
            Side::Buy,
            signal.entry_price,
            signal.size,
            OrderPurpose::Entry,
            None,
        );
        let position = Position::new(
            &signal.ticker,
            order.client_id,
            signal.entry_price,
            signal.size,
            signal.stop_loss_price,
            signal.take_profit_price,
        );
        order.position_id = Some(position.id);
        let client_id = order.client_id;
        self.orders.insert(order.clone());

        let submission = match self.gateway.submit(&order).await {
            Ok(submission) => submission,
            Err(err) => {
                self.orders.mark_rejected(client_id);
                self.account.release_funds(signal.size);
                warn!(ticker = %signal.ticker, error = %err, "entry submission rejected");
                return Err(err.into());
            }
        };

        self.orders
            .mark_submitted(client_id, submission.venue_id.clone(), submission.contracts);
        // Contract rounding leaves dust below one contract's price; release
        // it from the reservation immediately.
        self.account.release_funds(signal.size - submission.cost);

        let position_id = position.id;
        if !self.positions.open(position) {
            // Lost a race for the ticker slot; undo everything.
            let _ = self.gateway.cancel(&submission.venue_id).await;
            self.orders.mark_cancelled(client_id);
            self.account.release_funds(submission.cost);
            return Err(ExecutionError::Rejected(format!(
                "ticker {} already has a position",
                signal.ticker
            )));
        }

        self.entry_deadlines
            .insert(position_id, Utc::now() + self.entry_timeout);

        info!(
            position_id = %position_id,
            ticker = %signal.ticker,
            venue_id = %submission.venue_id,
            contracts = submission.contracts,
            cost = %submission.cost,
            "entry order submitted"
        );
        Ok(ExecOutcome::PositionOpened(position_id))
    }

    /// Apply a fill or order-update from the venue.
    pub async fn on_own_order_event(&mut self, event: &OwnOrderEvent) -> Vec<ExecOutcome> {
        match event {
            OwnOrderEvent::Fill { venue_order_id, price, count, .. } => {
                let Some(change) = self.orders.apply_fill(venue_order_id, *count) else {
                    return Vec::new();
                };
                self.on_order_change(change, Some(*price)).await
            }
            OwnOrderEvent::OrderUpdate { venue_order_id, status, remaining_contracts } => {
                let Some(change) =
                    self.orders.apply_update(venue_order_id, *status, *remaining_contracts)
                else {
                    return Vec::new();
                };
                self.on_order_change(change, None).await
            }
        }
    }

    async fn on_order_change(
        &mut self,
        change: OrderChange,
        fill_price: Option<Decimal>,
    ) -> Vec<ExecOutcome> {
        let Some(position_id) = change.position_id else {
            return Vec::new();
        };

        match change.purpose {
            OrderPurpose::Entry => match change.status {
                OrderStatus::Filled => self.finalize_entry(position_id, fill_price).await,
                OrderStatus::Cancelled | OrderStatus::Rejected if change.became_terminal => {
                    // A cancelled entry with partial fills still becomes a
                    // position for the filled amount.
                    let filled = self
                        .orders
                        .get(&change.client_id)
                        .map(|o| o.filled_contracts)
                        .unwrap_or(0);
                    if filled > 0 {
                        self.finalize_entry(position_id, fill_price).await
                    } else {
                        self.abandon_entry(position_id)
                    }
                }
                _ => Vec::new(),
            },
            OrderPurpose::StopLoss if change.status == OrderStatus::Filled => {
                let price = fill_price.or_else(|| {
                    self.positions.get(&position_id).map(|p| p.stop_loss_price)
                });
                self.exit_filled(position_id, ExitReason::StopLoss, price).await
            }
            OrderPurpose::TakeProfit if change.status == OrderStatus::Filled => {
                let price = fill_price.or_else(|| {
                    self.positions.get(&position_id).map(|p| p.take_profit_price)
                });
                self.exit_filled(position_id, ExitReason::TakeProfit, price).await
            }
            OrderPurpose::Liquidation if change.status == OrderStatus::Filled => {
                let reason = self
                    .positions
                    .get(&position_id)
                    .and_then(|p| p.pending_exit_reason)
                    .unwrap_or(ExitReason::Manual);
                let price = fill_price.or_else(|| {
                    self.orders.get(&change.client_id).map(|o| o.price)
                });
                self.close_position(position_id, reason, price).await
            }
            _ => Vec::new(),
        }
    }

    /// Entry filled (fully, or partially at timeout): settle the
    /// reservation, recompute exits from the actual fill price, submit the
    /// paired SELLs, and mark the position entered.
    async fn finalize_entry(
        &mut self,
        position_id: Uuid,
        fill_price: Option<Decimal>,
    ) -> Vec<ExecOutcome> {
        self.entry_deadlines.remove(&position_id);

        let Some(position) = self.positions.get(&position_id) else {
            return Vec::new();
        };
        let Some(entry) = self.orders.get(&position.entry_order_id) else {
            return Vec::new();
        };

        let contracts = entry.filled_contracts;
        if contracts == 0 {
            return self.abandon_entry(position_id);
        }

        let fill_price = fill_price.unwrap_or(entry.price);
        let actual_cost = (fill_price * Decimal::from(contracts)).round_dp(2);
        let reserved = (entry.price * Decimal::from(entry.contracts)).round_dp(2);

        // Spend the filled value; anything reserved beyond it was never
        // filled and goes back to available.
        self.account.settle_entry(actual_cost);
        self.account.release_funds(reserved - actual_cost);

        let stop_loss_price =
            (fill_price * (Decimal::ONE - self.stop_loss_pct)).round_dp(4);
        let take_profit_price =
            (fill_price * (Decimal::ONE + self.profit_target_pct)).round_dp(4);

        self.positions
            .mark_entered(&position_id, fill_price, actual_cost, contracts);
        if let Some(position) = self.positions.get_mut(&position_id) {
            position.stop_loss_price = stop_loss_price;
            position.take_profit_price = take_profit_price;
        }

        let mut outcomes = vec![ExecOutcome::PositionEntered(position_id)];

        let (sl_id, tp_id) = self
            .submit_exit_pair(position_id, stop_loss_price, take_profit_price, contracts)
            .await;

        // A strategy exit issued while the entry was in flight wins: the
        // fresh exits are cancelled and the aggressive exit takes over.
        let pending = self
            .positions
            .get(&position_id)
            .and_then(|p| p.pending_exit_reason);
        if let Some(reason) = pending {
            for client_id in [sl_id, tp_id].into_iter().flatten() {
                if let Some(venue_id) =
                    self.orders.get(&client_id).and_then(|o| o.venue_id.clone())
                {
                    if self.cancel_with_retries(&venue_id).await.is_ok() {
                        self.orders.mark_cancelled(client_id);
                    }
                }
            }
            self.submit_aggressive_exit(position_id, reason, None).await;
        }

        outcomes
    }

    /// Submit the stop-loss / take-profit pair for `contracts`. A failed
    /// side is reported, never cascaded: the healthy sibling stays resting.
    async fn submit_exit_pair(
        &mut self,
        position_id: Uuid,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
        contracts: u32,
    ) -> (Option<Uuid>, Option<Uuid>) {
        let Some(position) = self.positions.get(&position_id) else {
            return (None, None);
        };
        let ticker = position.ticker.clone();

        let stop_loss = self
            .submit_sell(&ticker, stop_loss_price, contracts, OrderPurpose::StopLoss, position_id)
            .await;
        let take_profit = self
            .submit_sell(&ticker, take_profit_price, contracts, OrderPurpose::TakeProfit, position_id)
            .await;

        if let Some(position) = self.positions.get_mut(&position_id) {
            if let Some(id) = stop_loss {
                position.stop_loss_order_id = Some(id);
            }
            if let Some(id) = take_profit {
                position.take_profit_order_id = Some(id);
            }
        }

        (stop_loss, take_profit)
    }

    async fn submit_sell(
        &mut self,
        ticker: &str,
        price: Decimal,
        contracts: u32,
        purpose: OrderPurpose,
        position_id: Uuid,
    ) -> Option<Uuid> {
        let mut order = Order::new(
            ticker,
            Side::Sell,
            price,
            size_for_contracts(price, contracts),
            purpose,
            Some(position_id),
        );
        let client_id = order.client_id;
        self.orders.insert(order.clone());

        match self.gateway.submit(&order).await {
            Ok(submission) => {
                self.orders
                    .mark_submitted(client_id, submission.venue_id, submission.contracts);
                info!(
                    %ticker,
                    ?purpose,
                    %price,
                    contracts = submission.contracts,
                    "exit order submitted"
                );
                Some(client_id)
            }
            Err(err) => {
                self.orders.mark_rejected(client_id);
                error!(%ticker, ?purpose, error = %err, "exit order submission failed");
                None
            }
        }
    }

    /// One protective exit filled: cancel the sibling, then close.
    async fn exit_filled(
        &mut self,
        position_id: Uuid,
        reason: ExitReason,
        fill_price: Option<Decimal>,
    ) -> Vec<ExecOutcome> {
        let Some(position) = self.positions.get(&position_id) else {
            return Vec::new();
        };
        let sibling = match reason {
            ExitReason::StopLoss => position.take_profit_order_id,
            ExitReason::TakeProfit => position.stop_loss_order_id,
            _ => None,
        };

        if let Some(sibling_id) = sibling {
            let venue_id = self
                .orders
                .get(&sibling_id)
                .filter(|o| o.is_active())
                .and_then(|o| o.venue_id.clone());
            if let Some(venue_id) = venue_id {
                match self.cancel_with_retries(&venue_id).await {
                    Ok(()) => self.orders.mark_cancelled(sibling_id),
                    Err(err) => {
                        // Never double-close: freeze in EXITING and alert.
                        error!(
                            %position_id,
                            %venue_id,
                            error = %err,
                            "sibling cancel failed, position stuck in EXITING"
                        );
                        if let Some(position) = self.positions.get_mut(&position_id) {
                            position.status = PositionStatus::Exiting;
                            position.pending_exit_reason = Some(reason);
                        }
                        return vec![ExecOutcome::ExitStuck(position_id)];
                    }
                }
            }
        }

        self.close_position(position_id, reason, fill_price).await
    }

    async fn close_position(
        &mut self,
        position_id: Uuid,
        reason: ExitReason,
        fill_price: Option<Decimal>,
    ) -> Vec<ExecOutcome> {
        let Some(position) = self.positions.get(&position_id) else {
            return Vec::new();
        };
        let exit_price = fill_price.unwrap_or(position.entry_price);

        let Some(closed) = self.positions.close(&position_id, exit_price, reason) else {
            return Vec::new();
        };
        let pnl = closed.realized_pnl.unwrap_or_default();
        self.account.settle_close(closed.size, pnl);

        vec![ExecOutcome::PositionClosed(closed)]
    }

    /// Strategy or emergency exit: cancel both resting exits, then place an
    /// aggressive limit SELL at `max(bid · 0.95, 0.01)`.
    pub async fn strategy_exit(
        &mut self,
        position_id: Uuid,
        reason: ExitReason,
        current_bid: Option<Decimal>,
    ) -> Vec<ExecOutcome> {
        let Some(position) = self.positions.get_mut(&position_id) else {
            return Vec::new();
        };
        if position.status == PositionStatus::Exiting || position.status == PositionStatus::Closed {
            return Vec::new();
        }

        if position.status == PositionStatus::Entering {
            // Entry still in flight: record the intent and pull the entry;
            // whatever filled becomes a position and exits aggressively.
            position.pending_exit_reason = Some(reason);
            let entry_id = position.entry_order_id;
            if let Some(venue_id) = self
                .orders
                .get(&entry_id)
                .filter(|o| o.is_active())
                .and_then(|o| o.venue_id.clone())
            {
                if self.cancel_with_retries(&venue_id).await.is_ok() {
                    self.orders.mark_cancelled(entry_id);
                    let filled = self
                        .orders
                        .get(&entry_id)
                        .map(|o| o.filled_contracts)
                        .unwrap_or(0);
                    return if filled > 0 {
                        self.finalize_entry(position_id, None).await
                    } else {
                        self.abandon_entry(position_id)
                    };
                }
            }
            return Vec::new();
        }

        let exits: Vec<Uuid> = [position.stop_loss_order_id, position.take_profit_order_id]
            .into_iter()
            .flatten()
            .collect();

        for exit_id in exits {
            let venue_id = self
                .orders
                .get(&exit_id)
                .filter(|o| o.is_active())
                .and_then(|o| o.venue_id.clone());
            if let Some(venue_id) = venue_id {
                match self.cancel_with_retries(&venue_id).await {
                    Ok(()) => self.orders.mark_cancelled(exit_id),
                    Err(err) => {
                        error!(
                            %position_id,
                            %venue_id,
                            error = %err,
                            "exit cancel failed during strategy exit"
                        );
                        if let Some(position) = self.positions.get_mut(&position_id) {
                            position.status = PositionStatus::Exiting;
                            position.pending_exit_reason = Some(reason);
                        }
                        return vec![ExecOutcome::ExitStuck(position_id)];
                    }
                }
            }
        }

        self.submit_aggressive_exit(position_id, reason, current_bid).await;
        Vec::new()
    }

    /// Place the aggressive limit SELL for whatever the position holds.
    /// Both protective exits must already be inactive.
    async fn submit_aggressive_exit(
        &mut self,
        position_id: Uuid,
        reason: ExitReason,
        current_bid: Option<Decimal>,
    ) {
        let Some(position) = self.positions.get_mut(&position_id) else {
            return;
        };
        position.status = PositionStatus::Exiting;
        position.pending_exit_reason = Some(reason);
        let contracts = position.contracts;
        let ticker = position.ticker.clone();
        let fallback_bid = position.entry_price;

        let bid = current_bid.unwrap_or(fallback_bid);
        let price = (bid * AGGRESSIVE_FACTOR).round_dp(2).max(PRICE_FLOOR);
        let client_id = self
            .submit_sell(&ticker, price, contracts, OrderPurpose::Liquidation, position_id)
            .await;
        if let Some(position) = self.positions.get_mut(&position_id) {
            position.exit_order_id = client_id;
        }

        info!(
            %position_id,
            reason = reason.as_str(),
            %price,
            contracts,
            "aggressive exit submitted"
        );
    }

    /// Emergency-exit every open position (stream loss, operator stop).
    pub async fn emergency_exit_all(
        &mut self,
        bid_of: impl Fn(&str) -> Option<Decimal>,
    ) -> Vec<ExecOutcome> {
        let targets: Vec<(Uuid, Option<Decimal>)> = self
            .positions
            .open_positions()
            .map(|p| (p.id, bid_of(&p.ticker)))
            .collect();

        let mut outcomes = Vec::new();
        for (position_id, bid) in targets {
            outcomes.extend(
                self.strategy_exit(position_id, ExitReason::Emergency, bid).await,
            );
        }
        outcomes
    }

    /// Cancel entries that have rested unfilled past the timeout; partial
    /// fills proceed as the filled amount.
    pub async fn sweep_entry_timeouts(&mut self, now: DateTime<Utc>) -> Vec<ExecOutcome> {
        let due: Vec<Uuid> = self
            .entry_deadlines
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| *id)
            .collect();

        let mut outcomes = Vec::new();
        for position_id in due {
            self.entry_deadlines.remove(&position_id);
            let Some(entry_id) = self.positions.get(&position_id).map(|p| p.entry_order_id)
            else {
                continue;
            };
            let Some(order) = self.orders.get(&entry_id).filter(|o| o.is_active()) else {
                continue;
            };
            let venue_id = order.venue_id.clone();
            let filled = order.filled_contracts;

            if let Some(venue_id) = venue_id {
                if let Err(err) = self.cancel_with_retries(&venue_id).await {
                    error!(%position_id, error = %err, "entry cancel failed at timeout");
                    continue;
                }
            }
            self.orders.mark_cancelled(entry_id);

            if filled > 0 {
                info!(%position_id, filled, "entry timed out partially filled");
                outcomes.extend(self.finalize_entry(position_id, None).await);
            } else {
                info!(%position_id, "entry timed out unfilled");
                outcomes.extend(self.abandon_entry(position_id));
            }
        }
        outcomes
    }

    fn abandon_entry(&mut self, position_id: Uuid) -> Vec<ExecOutcome> {
        self.entry_deadlines.remove(&position_id);
        let Some(position) = self.positions.get(&position_id) else {
            return Vec::new();
        };
        if let Some(order) = self.orders.get(&position.entry_order_id) {
            let reserved = (order.price * Decimal::from(order.contracts)).round_dp(2);
            self.account.release_funds(reserved);
        }
        self.positions.discard(&position_id);
        vec![ExecOutcome::EntryAbandoned(position_id)]
    }

    async fn cancel_with_retries(&mut self, venue_id: &str) -> Result<(), ExecutionError> {
        let mut last = String::new();
        for attempt in 1..=CANCEL_ATTEMPTS {
            match self.gateway.cancel(venue_id).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(%venue_id, attempt, error = %err, "cancel attempt failed");
                    last = err.to_string();
                }
            }
        }
        Err(ExecutionError::CancelFailed {
            venue_id: venue_id.to_string(),
            attempts: CANCEL_ATTEMPTS,
            reason: last,
        })
    }

    /// Cancel all non-terminal entry orders (graceful shutdown).
    pub async fn cancel_open_entries(&mut self) -> Vec<ExecOutcome> {
        let pending: Vec<Uuid> = self
            .positions
            .open_positions()
            .filter(|p| p.status == PositionStatus::Entering)
            .map(|p| p.id)
            .collect();

        let mut outcomes = Vec::new();
        for position_id in pending {
            outcomes.extend(
                self.strategy_exit(position_id, ExitReason::Manual, None).await,
            );
        }
        outcomes
    }

    /// Startup/recovery: rebuild state from venue orders and persisted
    /// positions, cancel orphans, recreate missing exits. Only after this
    /// completes does the executor accept signals.
    pub async fn recover(
        &mut self,
        venue_orders: Vec<VenueOrder>,
        persisted: Vec<Position>,
    ) -> Result<(), ExecutionError> {
        let mut known: HashMap<Uuid, (Uuid, OrderPurpose)> = HashMap::new();
        for position in &persisted {
            if position.status == PositionStatus::Closed {
                continue;
            }
            known.insert(position.entry_order_id, (position.id, OrderPurpose::Entry));
            if let Some(id) = position.stop_loss_order_id {
                known.insert(id, (position.id, OrderPurpose::StopLoss));
            }
            if let Some(id) = position.take_profit_order_id {
                known.insert(id, (position.id, OrderPurpose::TakeProfit));
            }
            if let Some(id) = position.exit_order_id {
                known.insert(id, (position.id, OrderPurpose::Liquidation));
            }
        }

        for position in persisted {
            if position.status == PositionStatus::Closed {
                continue;
            }
            self.account.assume_exposure(position.size);
            self.positions.open(position);
        }

        let mut live_exits: HashMap<Uuid, u32> = HashMap::new();
        for venue_order in venue_orders {
            match venue_order.client_order_id.and_then(|id| known.get(&id).copied().map(|k| (id, k))) {
                Some((client_id, (position_id, purpose))) => {
                    let mut order = Order::new(
                        &venue_order.ticker,
                        venue_order.side,
                        venue_order.price.unwrap_or_default(),
                        venue_order
                            .price
                            .unwrap_or_default()
                            * Decimal::from(venue_order.contracts),
                        purpose,
                        Some(position_id),
                    );
                    order.client_id = client_id;
                    self.orders.insert(order);
                    self.orders.mark_submitted(
                        client_id,
                        venue_order.venue_id,
                        venue_order.contracts,
                    );
                    *live_exits.entry(position_id).or_default() += 1;
                }
                None => {
                    // Orphan with unknown client metadata: not ours to keep.
                    warn!(venue_id = %venue_order.venue_id, "cancelling orphan venue order");
                    let _ = self.gateway.cancel(&venue_order.venue_id).await;
                }
            }
        }

        // Entered positions must carry both protective exits; recreate any
        // the venue no longer holds.
        let needs_exits: Vec<(Uuid, Decimal, Decimal, u32)> = self
            .positions
            .open_positions()
            .filter(|p| p.status == PositionStatus::Entered)
            .filter(|p| {
                let live = live_exits.get(&p.id).copied().unwrap_or(0);
                live < 2
            })
            .map(|p| (p.id, p.stop_loss_price, p.take_profit_price, p.contracts))
            .collect();

        for (position_id, stop_loss_price, take_profit_price, contracts) in needs_exits {
            let Some(position) = self.positions.get(&position_id) else {
                continue;
            };
            let has_sl = position
                .stop_loss_order_id
                .and_then(|id| self.orders.get(&id))
                .is_some_and(Order::is_active);
            let has_tp = position
                .take_profit_order_id
                .and_then(|id| self.orders.get(&id))
                .is_some_and(Order::is_active);
            let ticker = position.ticker.clone();

            if !has_sl {
                info!(%position_id, "recreating missing stop-loss");
                let id = self
                    .submit_sell(&ticker, stop_loss_price, contracts, OrderPurpose::StopLoss, position_id)
                    .await;
                if let Some(position) = self.positions.get_mut(&position_id) {
                    position.stop_loss_order_id = id;
                }
            }
            if !has_tp {
                info!(%position_id, "recreating missing take-profit");
                let id = self
                    .submit_sell(&ticker, take_profit_price, contracts, OrderPurpose::TakeProfit, position_id)
                    .await;
                if let Some(position) = self.positions.get_mut(&position_id) {
                    position.take_profit_order_id = id;
                }
            }
        }

        self.accepting = true;
        info!(
            positions = self.positions.open_count(),
            "recovery complete, accepting signals"
        );
        Ok(())
    }
}

/// Dollar size that guarantees `floor(size / price) == contracts` at the
/// boundary: round the exact product up to the next cent.
fn size_for_contracts(price: Decimal, contracts: u32) -> Decimal {
    (price * Decimal::from(contracts))
        .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SignalStrength;
    use crate::market::Market;
    use paper::PaperGateway;
    use rust_decimal_macros::dec;

    fn signal() -> Signal {
        Signal {
            ticker: "KXTEST-MKT".to_string(),
            entry_price: dec!(0.91),
            size: dec!(100),
            stop_loss_price: dec!(0.9009),
            take_profit_price: dec!(0.9282),
            confidence: dec!(0.90),
            strength: SignalStrength::Strong,
            created_at: Utc::now(),
        }
    }

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

    fn executor() -> Executor<PaperGateway> {
        let config = crate::config::test_default();
        let mut executor = Executor::new(
            PaperGateway::new(),
            Account::new(dec!(1000)),
            &config,
        );
        executor.set_accepting(true);
        executor
    }

    /// Drive paper matching for one market state to quiescence, feeding
    /// fills back through the executor.
    async fn pump(executor: &mut Executor<PaperGateway>, market: &Market) -> Vec<ExecOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let fills = executor.gateway_market_update(market);
            if fills.is_empty() {
                break;
            }
            for fill in fills {
                outcomes.extend(executor.on_own_order_event(&fill).await);
            }
        }
        outcomes
    }

    async fn entered_position(executor: &mut Executor<PaperGateway>) -> Uuid {
        let outcome = executor.execute_signal(&signal()).await.unwrap();
        let ExecOutcome::PositionOpened(position_id) = outcome else {
            panic!("expected opened outcome");
        };
        // Ask drops to the entry limit: the paper entry fills.
        let outcomes = pump(executor, &market(dec!(0.90), dec!(0.91))).await;
        assert!(matches!(outcomes[0], ExecOutcome::PositionEntered(_)));
        position_id
    }

    #[tokio::test]
    async fn signal_to_entered_with_paired_exits() {
        let mut executor = executor();
        let position_id = entered_position(&mut executor).await;

        let position = executor.positions.get(&position_id).unwrap();
        assert_eq!(position.status, PositionStatus::Entered);
        assert_eq!(position.contracts, 109);
        assert_eq!(position.size, dec!(99.19));
        assert_eq!(position.stop_loss_price, dec!(0.9009));
        assert_eq!(position.take_profit_price, dec!(0.9282));

        // Exactly one live SL and one live TP, both sized to the position.
        let sl = executor.orders.get(&position.stop_loss_order_id.unwrap()).unwrap();
        let tp = executor.orders.get(&position.take_profit_order_id.unwrap()).unwrap();
        assert_eq!(sl.side, Side::Sell);
        assert_eq!(tp.side, Side::Sell);
        assert_eq!(sl.contracts, 109);
        assert_eq!(tp.contracts, 109);
        assert!(sl.is_active() && tp.is_active());
        assert!(position.stop_loss_price < position.entry_price);
        assert!(position.entry_price < position.take_profit_price);

        // Accounting: cash spent, dust released, exposure carried.
        assert_eq!(executor.account.total_exposure, dec!(99.19));
        assert_eq!(executor.account.locked_balance, dec!(0));
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn take_profit_fill_cancels_stop_and_closes() {
        let mut executor = executor();
        let position_id = entered_position(&mut executor).await;

        // Bid rises through the take-profit price.
        let outcomes = pump(&mut executor, &market(dec!(0.93), dec!(0.94))).await;
        let closed = outcomes
            .iter()
            .find_map(|o| match o {
                ExecOutcome::PositionClosed(p) => Some(p.clone()),
                _ => None,
            })
            .expect("position closed");

        assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(closed.exit_price, Some(dec!(0.9282)));
        // (0.9282 - 0.91) * 99.19 ≈ +1.81
        assert_eq!(closed.realized_pnl, Some(dec!(1.81)));

        // Sibling stop-loss is no longer active anywhere.
        let sl = executor.orders.get(&closed.stop_loss_order_id.unwrap()).unwrap();
        assert!(!sl.is_active());
        assert_eq!(executor.gateway.resting_count(), 0);

        assert!(executor.positions.get(&position_id).is_none());
        assert_eq!(executor.account.daily_wins, 1);
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn stop_loss_fill_cancels_take_profit_and_closes() {
        let mut executor = executor();
        entered_position(&mut executor).await;

        // Bid collapses through the stop.
        let outcomes = pump(&mut executor, &market(dec!(0.89), dec!(0.90))).await;
        let closed = outcomes
            .iter()
            .find_map(|o| match o {
                ExecOutcome::PositionClosed(p) => Some(p.clone()),
                _ => None,
            })
            .expect("position closed");

        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
        // (0.9009 - 0.91) * 99.19 ≈ -0.90
        assert_eq!(closed.realized_pnl, Some(dec!(-0.90)));
        assert_eq!(executor.account.daily_losses, 1);
        assert_eq!(executor.account.consecutive_losses, 1);
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn timeout_exit_goes_aggressive() {
        let mut executor = executor();
        let position_id = entered_position(&mut executor).await;

        let outcomes = executor
            .strategy_exit(position_id, ExitReason::Timeout, Some(dec!(0.90)))
            .await;
        assert!(outcomes.is_empty());

        let position = executor.positions.get(&position_id).unwrap();
        assert_eq!(position.status, PositionStatus::Exiting);
        assert_eq!(position.pending_exit_reason, Some(ExitReason::Timeout));

        // Both protective exits were pulled; only the aggressive sell rests.
        assert_eq!(executor.gateway.resting_count(), 1);
        let exit = executor.orders.get(&position.exit_order_id.unwrap()).unwrap();
        // max(0.90 * 0.95, 0.01) = 0.855 → 0.86 at cent rounding
        assert_eq!(exit.price, dec!(0.86));

        // The aggressive sell fills when the bid reaches it.
        let outcomes = pump(&mut executor, &market(dec!(0.86), dec!(0.87))).await;
        let closed = outcomes
            .iter()
            .find_map(|o| match o {
                ExecOutcome::PositionClosed(p) => Some(p.clone()),
                _ => None,
            })
            .expect("position closed");
        assert_eq!(closed.exit_reason, Some(ExitReason::Timeout));
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn unfilled_entry_times_out_and_releases_reservation() {
        let mut executor = executor();
        executor.execute_signal(&signal()).await.unwrap();
        assert_eq!(executor.account.locked_balance, dec!(99.19));

        let outcomes = executor
            .sweep_entry_timeouts(Utc::now() + chrono::Duration::seconds(61))
            .await;
        assert!(matches!(outcomes[0], ExecOutcome::EntryAbandoned(_)));

        assert_eq!(executor.account.locked_balance, dec!(0));
        assert_eq!(executor.account.available_balance, dec!(1000));
        assert_eq!(executor.positions.open_count(), 0);
        assert_eq!(executor.gateway.resting_count(), 0);
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn emergency_exit_covers_entering_positions() {
        let mut executor = executor();
        executor.execute_signal(&signal()).await.unwrap();

        // Entry never filled; emergency exit should pull it and walk away.
        let outcomes = executor.emergency_exit_all(|_| Some(dec!(0.90))).await;
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, ExecOutcome::EntryAbandoned(_))));
        assert_eq!(executor.positions.open_count(), 0);
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn duplicate_exit_fill_is_idempotent() {
        let mut executor = executor();
        let position_id = entered_position(&mut executor).await;
        let tp_venue_id = {
            let position = executor.positions.get(&position_id).unwrap();
            executor
                .orders
                .get(&position.take_profit_order_id.unwrap())
                .unwrap()
                .venue_id
                .clone()
                .unwrap()
        };

        let fill = OwnOrderEvent::Fill {
            venue_order_id: tp_venue_id,
            ticker: "KXTEST-MKT".to_string(),
            side: Side::Sell,
            price: dec!(0.9282),
            count: 109,
        };
        let first = executor.on_own_order_event(&fill).await;
        assert!(first
            .iter()
            .any(|o| matches!(o, ExecOutcome::PositionClosed(_))));

        // The same frame replayed produces nothing: the order is terminal.
        let second = executor.on_own_order_event(&fill).await;
        assert!(second.is_empty());
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn occupied_ticker_blocks_second_entry() {
        let mut executor = executor();
        entered_position(&mut executor).await;
        assert!(executor.occupied("KXTEST-MKT"));

        let err = executor.execute_signal(&signal()).await;
        // The executor itself refuses via the tracker even if the engine's
        // occupancy check were bypassed.
        assert!(err.is_err());
        assert_eq!(executor.positions.open_count(), 1);
        assert!(executor.account.check_invariants());
    }

    #[tokio::test]
    async fn recovery_cancels_orphans_and_recreates_exits() {
        let mut executor = executor();

        let mut position = Position::new(
            "KXTEST-MKT",
            Uuid::new_v4(),
            dec!(0.91),
            dec!(99.19),
            dec!(0.9009),
            dec!(0.9282),
        );
        position.status = PositionStatus::Entered;
        position.contracts = 109;
        position.entered_at = Some(Utc::now());

        let orphan = VenueOrder {
            venue_id: "ven-orphan".to_string(),
            client_order_id: None,
            ticker: "KXOTHER-MKT".to_string(),
            side: Side::Buy,
            status: Some(OrderStatus::Open),
            price: Some(dec!(0.50)),
            contracts: 10,
            filled_contracts: 0,
        };

        executor.recover(vec![orphan], vec![position]).await.unwrap();

        assert!(executor.accepting());
        assert_eq!(executor.positions.open_count(), 1);
        // Both exits were recreated in the venue.
        assert_eq!(executor.gateway.resting_count(), 2);
        assert_eq!(executor.account.total_exposure, dec!(99.19));
        assert!(executor.account.check_invariants());
    }
}
