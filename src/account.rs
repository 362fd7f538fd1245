//! Account state: the single source of truth for cash, locked funds,
//! exposure, and P&L.
//!
//! Accounting model: `available_balance + locked_balance = current_balance`
//! (cash), with `total_exposure` carrying open position notionals at entry
//! value. Locking reserves cash for an unfilled BUY; an entry fill converts
//! the locked value into exposure and spends the cash; an exit fill returns
//! the notional plus realized P&L to cash.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::DOLLARS_DP;
use crate::error::ExecutionError;

/// In-memory account state. Mutated only from the executor task.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub starting_balance: Decimal,
    /// Total cash, including locked funds.
    pub current_balance: Decimal,
    /// Cash not reserved by unfilled BUY orders.
    pub available_balance: Decimal,
    /// Cash reserved by unfilled BUY orders.
    pub locked_balance: Decimal,
    /// Sum of open position notionals at entry value.
    pub total_exposure: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,

    // Daily counters, reset at UTC midnight.
    pub daily_starting_balance: Decimal,
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    pub consecutive_losses: u32,
    pub last_reset: DateTime<Utc>,
}

impl Account {
    pub fn new(starting_balance: Decimal) -> Self {
        let balance = starting_balance.round_dp(DOLLARS_DP);
        Self {
            starting_balance: balance,
            current_balance: balance,
            available_balance: balance,
            locked_balance: Decimal::ZERO,
            total_exposure: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            daily_starting_balance: balance,
            daily_pnl: Decimal::ZERO,
            daily_trades: 0,
            daily_wins: 0,
            daily_losses: 0,
            consecutive_losses: 0,
            last_reset: Utc::now(),
        }
    }

    /// Position size for a new signal: half-Kelly fixed fraction, capped by
    /// available cash.
    pub fn position_size(&self, max_position_pct: Decimal) -> Decimal {
        let fraction = max_position_pct.min(Decimal::new(10, 2));
        (self.current_balance * fraction)
            .min(self.available_balance)
            .round_dp(DOLLARS_DP)
    }

    /// Reserve cash for an unfilled BUY order.
    pub fn lock_funds(&mut self, amount: Decimal) -> Result<(), ExecutionError> {
        let amount = amount.round_dp(DOLLARS_DP);
        if amount > self.available_balance {
            return Err(ExecutionError::InsufficientFunds {
                required: amount,
                available: self.available_balance,
            });
        }
        self.available_balance -= amount;
        self.locked_balance += amount;
        Ok(())
    }

    /// Return reserved cash to the available pool (entry cancelled, or dust
    /// left over after rounding down to contracts).
    pub fn release_funds(&mut self, amount: Decimal) {
        let amount = amount
            .round_dp(DOLLARS_DP)
            .clamp(Decimal::ZERO, self.locked_balance);
        self.locked_balance -= amount;
        self.available_balance += amount;
    }

    /// Convert a filled entry's reserved cash into exposure: the cash is
    /// spent, and the position notional is now carried in `total_exposure`.
    pub fn settle_entry(&mut self, cost: Decimal) {
        let cost = cost.round_dp(DOLLARS_DP).min(self.locked_balance);
        self.locked_balance -= cost;
        self.current_balance -= cost;
        self.total_exposure += cost;
    }

    /// Settle a closed position: exposure comes off, and the notional plus
    /// realized P&L returns to cash. Updates daily counters and the
    /// consecutive-loss streak (any win resets it).
    pub fn settle_close(&mut self, notional: Decimal, pnl: Decimal) {
        let notional = notional.round_dp(DOLLARS_DP);
        let pnl = pnl.round_dp(DOLLARS_DP);
        self.total_exposure = (self.total_exposure - notional).max(Decimal::ZERO);

        let proceeds = notional + pnl;
        self.current_balance += proceeds;
        self.available_balance += proceeds;

        self.realized_pnl += pnl;
        self.daily_pnl += pnl;
        self.daily_trades += 1;
        if pnl > Decimal::ZERO {
            self.daily_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.daily_losses += 1;
            self.consecutive_losses += 1;
        }
    }

    /// Refresh `unrealized_pnl` from open positions.
    pub fn set_unrealized_pnl(&mut self, pnl: Decimal) {
        self.unrealized_pnl = pnl.round_dp(DOLLARS_DP);
    }

    /// Recovery only: carry exposure for positions that were already open
    /// before this process started. The venue balance excludes their cost,
    /// so the starting equity is adjusted to keep the accounting identity.
    pub fn assume_exposure(&mut self, notional: Decimal) {
        let notional = notional.round_dp(DOLLARS_DP);
        self.total_exposure += notional;
        self.starting_balance += notional;
    }

    /// Daily P&L as a (possibly negative) fraction of the day's starting
    /// balance.
    pub fn daily_pnl_fraction(&self) -> Decimal {
        if self.daily_starting_balance.is_zero() {
            return Decimal::ZERO;
        }
        self.daily_pnl / self.daily_starting_balance
    }

    /// Reset daily counters if a UTC day boundary has passed since the last
    /// reset. Returns `true` when a reset happened (drives the daily summary
    /// alert and the daily-loss breaker reset).
    pub fn maybe_reset_daily(&mut self, now: DateTime<Utc>) -> bool {
        if now.date_naive() == self.last_reset.date_naive() {
            return false;
        }
        self.daily_starting_balance = self.current_balance;
        self.daily_pnl = Decimal::ZERO;
        self.daily_trades = 0;
        self.daily_wins = 0;
        self.daily_losses = 0;
        self.last_reset = now;
        true
    }

    /// Core accounting identity, asserted by tests after every operation:
    /// cash splits exactly into available + locked, and equity equals the
    /// starting balance plus realized P&L while positions carry entry value.
    pub fn check_invariants(&self) -> bool {
        self.current_balance >= Decimal::ZERO
            && self.available_balance + self.locked_balance == self.current_balance
            && self.available_balance + self.locked_balance + self.total_exposure
                == self.starting_balance + self.realized_pnl
    }
}
