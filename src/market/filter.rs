//! Static market filter: decides which markets are candidates for entry.

use rust_decimal::prelude::MathematicalOps;
use rust_decimal::Decimal;

use crate::config::Config;
use crate::market::Market;

/// Take-profit exits must land below this ceiling to leave headroom under
/// the 0.99 price cap.
const PROFIT_CEILING: Decimal = Decimal::from_parts(95, 0, 0, false, 2); // 0.95

/// Why a market failed the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReject {
    Inactive,
    ProbabilityTooLow,
    InsufficientLiquidity,
    InsufficientVolume,
    SpreadTooWide,
    MissingPrices,
    NoProfitHeadroom,
}

impl FilterReject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "market_inactive",
            Self::ProbabilityTooLow => "probability_too_low",
            Self::InsufficientLiquidity => "insufficient_liquidity",
            Self::InsufficientVolume => "insufficient_volume",
            Self::SpreadTooWide => "spread_too_wide",
            Self::MissingPrices => "missing_prices",
            Self::NoProfitHeadroom => "insufficient_room_for_profit",
        }
    }
}

/// Pure predicate over `(Market, Config)`.
#[derive(Debug, Clone)]
pub struct MarketFilter {
    entry_threshold: Decimal,
    min_liquidity: Decimal,
    min_volume: Decimal,
    max_spread: Decimal,
    profit_target: Decimal,
}

impl MarketFilter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            entry_threshold: config.entry_threshold,
            min_liquidity: config.min_liquidity,
            min_volume: config.min_volume,
            max_spread: config.max_spread,
            profit_target: config.profit_target,
        }
    }

    /// Check every criterion; `Err` carries the first failure.
    pub fn check(&self, market: &Market) -> Result<(), FilterReject> {
        if !market.active {
            return Err(FilterReject::Inactive);
        }

        let (Some(bid), Some(ask)) = (market.best_bid, market.best_ask) else {
            return Err(FilterReject::MissingPrices);
        };

        if bid < self.entry_threshold {
            return Err(FilterReject::ProbabilityTooLow);
        }
        if market.bid_liquidity < self.min_liquidity {
            return Err(FilterReject::InsufficientLiquidity);
        }
        if market.volume_24h < self.min_volume {
            return Err(FilterReject::InsufficientVolume);
        }

        if bid <= Decimal::ZERO || (ask - bid) / bid > self.max_spread {
            return Err(FilterReject::SpreadTooWide);
        }

        // The take-profit target must stay below the ceiling, otherwise the
        // exit would need more headroom than the 0.99 cap leaves.
        if bid * (Decimal::ONE + self.profit_target) > PROFIT_CEILING {
            return Err(FilterReject::NoProfitHeadroom);
        }

        Ok(())
    }

    /// Opportunity score in [0, 100], higher is better. Diagnostic only:
    /// probability 40%, liquidity 30%, spread 20%, volume 10%.
    pub fn score(&self, market: &Market) -> Option<Decimal> {
        self.check(market).ok()?;

        let bid = market.best_bid?;
        let spread = market.spread()?;
        let mut score = Decimal::ZERO;

        let prob_band = Decimal::new(95, 2) - self.entry_threshold;
        if prob_band > Decimal::ZERO {
            let prob_score = ((bid - self.entry_threshold) / prob_band).clamp(Decimal::ZERO, Decimal::ONE);
            score += prob_score * Decimal::new(40, 0);
        }

        let liq_ratio = market.bid_liquidity / self.min_liquidity;
        let liq_score = liq_ratio.ln().max(Decimal::ZERO).min(Decimal::ONE);
        score += liq_score * Decimal::new(30, 0);

        let spread_score = (Decimal::ONE - spread / self.max_spread).clamp(Decimal::ZERO, Decimal::ONE);
        score += spread_score * Decimal::new(20, 0);

        let vol_ratio = market.volume_24h / self.min_volume;
        let vol_score = vol_ratio.ln().max(Decimal::ZERO).min(Decimal::ONE);
        score += vol_score * Decimal::new(10, 0);

        Some(score.min(Decimal::ONE_HUNDRED).round_dp(1))
    }
}
