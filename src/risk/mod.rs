//! Pre-trade validation and circuit breaking.

pub mod breaker;

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::account::Account;
use crate::config::Config;
use crate::domain::Signal;
use crate::market::Market;
use breaker::CircuitBreakers;

/// Minimum acceptable reward-to-risk ratio for an entry.
const MIN_RISK_REWARD: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
/// Entry prices must sit inside this band.
const MIN_ENTRY_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01
const MAX_ENTRY_PRICE: Decimal = Decimal::from_parts(95, 0, 0, false, 2); // 0.95
/// Entry may exceed the observed ask by at most this factor.
const SLIPPAGE_CAP: Decimal = Decimal::from_parts(102, 0, 0, false, 2); // 1.02

/// Why a signal was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskReject {
    #[error("circuit breaker active: {0}")]
    BreakerActive(&'static str),

    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("max concurrent positions reached: {open}/{max}")]
    TooManyPositions { open: usize, max: usize },

    #[error("total exposure would exceed limit: {would_be} > {max}")]
    ExposureExceeded { would_be: Decimal, max: Decimal },

    #[error("position size {size} exceeds per-position limit {max}")]
    PositionTooLarge { size: Decimal, max: Decimal },

    #[error("position size {size} below minimum {min}")]
    PositionTooSmall { size: Decimal, min: Decimal },

    #[error("entry price {0} outside [0.01, 0.95]")]
    PriceOutOfBand(Decimal),

    #[error("entry price {entry} exceeds slippage cap over ask {ask}")]
    SlippageCapExceeded { entry: Decimal, ask: Decimal },

    #[error("risk/reward {0} below minimum")]
    PoorRiskReward(Decimal),
}

impl RiskReject {
    /// Stable reason token for logs, alerts and rejection counters.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BreakerActive(reason) => reason,
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::TooManyPositions { .. } => "max_positions",
            Self::ExposureExceeded { .. } => "max_exposure",
            Self::PositionTooLarge { .. } => "position_too_large",
            Self::PositionTooSmall { .. } => "position_too_small",
            Self::PriceOutOfBand(_) => "price_out_of_band",
            Self::SlippageCapExceeded { .. } => "slippage_cap",
            Self::PoorRiskReward(_) => "poor_risk_reward",
        }
    }
}

/// Validates every signal before it reaches the executor, and owns the
/// circuit breakers.
#[derive(Debug)]
pub struct RiskManager {
    max_position_pct: Decimal,
    max_exposure_pct: Decimal,
    max_positions: usize,
    min_position_dollars: Decimal,
    pub breakers: CircuitBreakers,
}

impl RiskManager {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_position_pct: config.max_position_pct,
            max_exposure_pct: config.max_exposure_pct,
            max_positions: config.max_positions,
            min_position_dollars: config.min_position_dollars,
            breakers: CircuitBreakers::new(
                config.daily_loss_limit,
                config.max_consecutive_losses,
                config.api_error_rate_limit,
                config.stream_silence_s,
            ),
        }
    }

    /// Validate a signal against account state, limits and breakers.
    pub fn validate_signal(
        &self,
        signal: &Signal,
        account: &Account,
        open_positions: usize,
        market: Option<&Market>,
    ) -> Result<(), RiskReject> {
        if self.breakers.is_active() {
            let reason = self
                .breakers
                .reason()
                .map(|r| r.as_str())
                .unwrap_or("unknown");
            return Err(RiskReject::BreakerActive(reason));
        }

        if signal.size > account.available_balance {
            return Err(RiskReject::InsufficientBalance {
                required: signal.size,
                available: account.available_balance,
            });
        }

        if open_positions >= self.max_positions {
            return Err(RiskReject::TooManyPositions {
                open: open_positions,
                max: self.max_positions,
            });
        }

        let max_exposure = account.current_balance * self.max_exposure_pct;
        let would_be = account.total_exposure + signal.size;
        if would_be > max_exposure {
            return Err(RiskReject::ExposureExceeded { would_be, max: max_exposure });
        }

        let max_size = account.current_balance * self.max_position_pct;
        if signal.size > max_size {
            return Err(RiskReject::PositionTooLarge { size: signal.size, max: max_size });
        }
        if signal.size < self.min_position_dollars {
            return Err(RiskReject::PositionTooSmall {
                size: signal.size,
                min: self.min_position_dollars,
            });
        }

        if signal.entry_price < MIN_ENTRY_PRICE || signal.entry_price > MAX_ENTRY_PRICE {
            return Err(RiskReject::PriceOutOfBand(signal.entry_price));
        }

        if let Some(ask) = market.and_then(|m| m.best_ask) {
            if signal.entry_price > ask * SLIPPAGE_CAP {
                return Err(RiskReject::SlippageCapExceeded {
                    entry: signal.entry_price,
                    ask,
                });
            }
        }

        match signal.risk_reward() {
            Some(ratio) if ratio >= MIN_RISK_REWARD => {}
            Some(ratio) => return Err(RiskReject::PoorRiskReward(ratio.round_dp(2))),
            None => return Err(RiskReject::PoorRiskReward(Decimal::ZERO)),
        }

        Ok(())
    }

    /// Post-fill slippage measurement. Diagnostic only: the pre-trade cap is
    /// what gates entries.
    pub fn measure_slippage(expected: Decimal, actual: Decimal) -> Decimal {
        if expected.is_zero() {
            return Decimal::ONE;
        }
        let slippage = ((actual - expected) / expected).abs();
        if slippage > Decimal::new(5, 2) {
            warn!(%expected, %actual, %slippage, "excessive fill slippage");
        }
        slippage
    }
}
