//! Signal generation and periodic exit evaluation.
//!
//! Entries fire on market updates: a market that passes the filter and has no
//! open or pending position produces a [`Signal`]. Price-based exits (stop
//! loss / take profit) are NOT evaluated here; those rest on the venue as
//! limit orders and fire via fill events. The periodic sweep only handles
//! timeout and market-close exits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::account::Account;
use crate::config::Config;
use crate::domain::{ExitReason, Position, Signal, SignalStrength};
use crate::market::filter::MarketFilter;
use crate::market::Market;

/// A strategy-driven exit decision for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitIntent {
    pub position_id: Uuid,
    pub reason: ExitReason,
}

/// Strategy parameters and the entry filter.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    filter: MarketFilter,
    profit_target: Decimal,
    stop_loss: Decimal,
    max_position_pct: Decimal,
    min_position_dollars: Decimal,
    max_hold: chrono::Duration,
    close_buffer: chrono::Duration,
}

impl StrategyEngine {
    pub fn from_config(config: &Config) -> Self {
        Self {
            filter: MarketFilter::from_config(config),
            profit_target: config.profit_target,
            stop_loss: config.stop_loss,
            max_position_pct: config.max_position_pct,
            min_position_dollars: config.min_position_dollars,
            max_hold: config.max_hold(),
            close_buffer: config.close_buffer(),
        }
    }

    /// Evaluate one market for entry. `occupied` is true when an open
    /// position or a pending entry order already exists for this ticker.
    pub fn evaluate_entry(
        &self,
        market: &Market,
        account: &Account,
        occupied: bool,
    ) -> Option<Signal> {
        if occupied {
            return None;
        }

        if let Err(reject) = self.filter.check(market) {
            debug!(ticker = %market.ticker, reason = reject.as_str(), "market filtered out");
            return None;
        }

        let entry_price = market.best_ask?;
        let size = account.position_size(self.max_position_pct);
        if size < self.min_position_dollars {
            debug!(
                ticker = %market.ticker,
                size = %size,
                "position size below minimum"
            );
            return None;
        }

        let stop_loss_price = entry_price * (Decimal::ONE - self.stop_loss);
        let take_profit_price = entry_price * (Decimal::ONE + self.profit_target);

        let confidence = market
            .probability()
            .unwrap_or(entry_price)
            .clamp(Decimal::ZERO, Decimal::ONE);

        let signal = Signal {
            ticker: market.ticker.clone(),
            entry_price,
            size,
            stop_loss_price,
            take_profit_price,
            confidence,
            strength: strength_for(confidence),
            created_at: Utc::now(),
        };

        info!(
            ticker = %signal.ticker,
            entry = %signal.entry_price,
            stop_loss = %signal.stop_loss_price,
            take_profit = %signal.take_profit_price,
            size = %signal.size,
            confidence = %signal.confidence,
            score = ?self.filter.score(market),
            "entry signal generated"
        );

        Some(signal)
    }

    /// Periodic sweep over open positions for timeout and market-close
    /// exits. Also rolls each position's excursion metrics.
    pub fn evaluate_exits<'a>(
        &self,
        positions: impl IntoIterator<Item = &'a mut Position>,
        market_of: impl Fn(&str) -> Option<Market>,
        now: DateTime<Utc>,
    ) -> Vec<ExitIntent> {
        let mut intents = Vec::new();

        for position in positions {
            // Only fully-entered positions are strategy-exitable; entries in
            // flight have their own timeout, and exits already in flight
            // must not be re-issued.
            if position.pending_exit_reason.is_some() {
                continue;
            }
            let Some(entered_at) = position.entered_at else {
                continue;
            };

            let market = market_of(&position.ticker);
            if let Some(price) = market.as_ref().and_then(|m| m.last_price.or(m.best_bid)) {
                position.update_excursions(price);
            }

            if now - entered_at >= self.max_hold {
                info!(
                    position_id = %position.id,
                    ticker = %position.ticker,
                    held_hours = (now - entered_at).num_minutes() as f64 / 60.0,
                    "max hold time reached"
                );
                intents.push(ExitIntent {
                    position_id: position.id,
                    reason: ExitReason::Timeout,
                });
                continue;
            }

            let closing = match market {
                Some(market) => {
                    !market.active
                        || market
                            .end_time
                            .is_some_and(|end| end - now <= self.close_buffer)
                }
                None => false,
            };
            if closing {
                info!(
                    position_id = %position.id,
                    ticker = %position.ticker,
                    "market closing, exiting position"
                );
                intents.push(ExitIntent {
                    position_id: position.id,
                    reason: ExitReason::MarketClosed,
                });
            }
        }

        intents
    }
}

fn strength_for(confidence: Decimal) -> SignalStrength {
    if confidence >= Decimal::new(92, 2) {
        SignalStrength::Strong
    } else if confidence >= Decimal::new(88, 2) {
        SignalStrength::Medium
    } else {
        SignalStrength::Weak
    }
}
