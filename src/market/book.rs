//! Per-ticker price ladder for a binary market.
//!
//! The venue publishes resting depth for both YES and NO sides. A YES ask is
//! implied from the NO side: buying YES at price `p` is matched by a resting
//! NO bid at `1 − p`. The ladder keys levels by dollar price and keeps
//! contract counts as integers.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

use crate::domain::BookSide;

/// How many top levels feed the liquidity aggregates.
const LIQUIDITY_DEPTH: usize = 3;

/// A single displayed level: dollar price and resting contract count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level {
    pub price: Decimal,
    pub contracts: u32,
}

/// Resting depth for one market, keyed by dollar price per side.
#[derive(Debug, Clone, Default)]
pub struct Ladder {
    yes: BTreeMap<Decimal, u32>,
    no: BTreeMap<Decimal, u32>,
}

impl Ladder {
    /// Replace the ladder wholesale from a snapshot.
    pub fn apply_snapshot(&mut self, yes: &[(Decimal, u32)], no: &[(Decimal, u32)]) {
        self.yes.clear();
        self.no.clear();
        for &(price, count) in yes {
            if count > 0 {
                self.yes.insert(price, count);
            }
        }
        for &(price, count) in no {
            if count > 0 {
                self.no.insert(price, count);
            }
        }
    }

    /// Apply a signed delta to one level; a level reaching zero is removed.
    pub fn apply_delta(&mut self, side: BookSide, price: Decimal, delta: i64) {
        let book = match side {
            BookSide::Yes => &mut self.yes,
            BookSide::No => &mut self.no,
        };
        let current = book.get(&price).copied().unwrap_or(0) as i64;
        let updated = (current + delta).max(0) as u32;
        if updated == 0 {
            book.remove(&price);
        } else {
            book.insert(price, updated);
        }
    }

    /// Best YES bid: highest YES price with resting contracts.
    pub fn best_bid(&self) -> Option<Level> {
        self.yes
            .iter()
            .next_back()
            .map(|(&price, &contracts)| Level { price, contracts })
    }

    /// Best YES ask, implied from the NO side: `1 − best NO bid`.
    pub fn best_ask(&self) -> Option<Level> {
        self.no.iter().next_back().map(|(&no_price, &contracts)| Level {
            price: Decimal::ONE - no_price,
            contracts,
        })
    }

    /// Dollar liquidity across the top bid levels.
    pub fn bid_liquidity(&self) -> Decimal {
        self.yes
            .iter()
            .rev()
            .take(LIQUIDITY_DEPTH)
            .map(|(&price, &contracts)| price * Decimal::from(contracts))
            .sum::<Decimal>()
            .round_dp(2)
    }

    /// Dollar liquidity across the top (implied) ask levels.
    pub fn ask_liquidity(&self) -> Decimal {
        self.no
            .iter()
            .rev()
            .take(LIQUIDITY_DEPTH)
            .map(|(&no_price, &contracts)| (Decimal::ONE - no_price) * Decimal::from(contracts))
            .sum::<Decimal>()
            .round_dp(2)
    }

    /// Top `n` bid levels, best first.
    pub fn top_bids(&self, n: usize) -> Vec<Level> {
        self.yes
            .iter()
            .rev()
            .take(n)
            .map(|(&price, &contracts)| Level { price, contracts })
            .collect()
    }

    /// Top `n` implied ask levels, best (lowest) first.
    pub fn top_asks(&self, n: usize) -> Vec<Level> {
        self.no
            .iter()
            .rev()
            .take(n)
            .map(|(&no_price, &contracts)| Level {
                price: Decimal::ONE - no_price,
                contracts,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.yes.is_empty() && self.no.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn seeded() -> Ladder {
        let mut ladder = Ladder::default();
        ladder.apply_snapshot(
            &[(dec!(0.90), 300), (dec!(0.89), 200), (dec!(0.88), 100), (dec!(0.87), 500)],
            &[(dec!(0.09), 250), (dec!(0.08), 150)],
        );
        ladder
    }

    #[test]
    fn best_prices_and_implied_ask() {
        let ladder = seeded();
        assert_eq!(ladder.best_bid().unwrap().price, dec!(0.90));
        // Best NO bid 0.09 implies a YES ask at 0.91.
        assert_eq!(ladder.best_ask().unwrap().price, dec!(0.91));
    }

    #[test]
    fn delta_add_update_remove() {
        let mut ladder = seeded();

        ladder.apply_delta(BookSide::Yes, dec!(0.90), 100);
        assert_eq!(ladder.best_bid().unwrap().contracts, 400);

        ladder.apply_delta(BookSide::Yes, dec!(0.90), -400);
        assert_eq!(ladder.best_bid().unwrap().price, dec!(0.89));

        // Delta below zero clamps to removal rather than underflow.
        ladder.apply_delta(BookSide::Yes, dec!(0.89), -10_000);
        assert_eq!(ladder.best_bid().unwrap().price, dec!(0.88));

        ladder.apply_delta(BookSide::Yes, dec!(0.95), 50);
        assert_eq!(ladder.best_bid().unwrap().price, dec!(0.95));
    }

    #[test]
    fn liquidity_sums_top_three_levels_in_dollars() {
        let ladder = seeded();
        // 0.90*300 + 0.89*200 + 0.88*100 = 270 + 178 + 88 = 536
        assert_eq!(ladder.bid_liquidity(), dec!(536.00));
        // Fourth level (0.87) is excluded.
    }

    #[test]
    fn snapshot_discards_zero_levels() {
        let mut ladder = Ladder::default();
        ladder.apply_snapshot(&[(dec!(0.90), 0), (dec!(0.89), 10)], &[]);
        assert_eq!(ladder.best_bid().unwrap().price, dec!(0.89));
    }

    #[test]
    fn top_levels_ordering() {
        let ladder = seeded();
        let bids = ladder.top_bids(2);
        assert_eq!(bids[0].price, dec!(0.90));
        assert_eq!(bids[1].price, dec!(0.89));

        let asks = ladder.top_asks(2);
        assert_eq!(asks[0].price, dec!(0.91));
        assert_eq!(asks[1].price, dec!(0.92));
    }
}
