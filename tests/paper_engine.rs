//! End-to-end paper-trading scenarios.
//!
//! Drives the real strategy → risk → executor pipeline against the paper
//! gateway, with market data applied through the same store the live engine
//! uses. Starting balance $1000 and default parameters throughout.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use kalshi_momentum::account::Account;
use kalshi_momentum::config::Config;
use kalshi_momentum::domain::{
    ExitReason, MarketDataEvent, OwnOrderEvent, PositionStatus, Signal, SignalStrength,
};
use kalshi_momentum::execution::{ExecOutcome, Executor};
use kalshi_momentum::market::MarketStore;
use kalshi_momentum::rest::MarketInfo;
use kalshi_momentum::risk::breaker::BreakerInputs;
use kalshi_momentum::risk::RiskManager;
use kalshi_momentum::strategy::StrategyEngine;
use kalshi_momentum::{PaperGateway, Side};

const TICKER: &str = "KXTEST-MKT";

fn test_config() -> Config {
    Config {
        kalshi_api_key_id: "test-key".to_string(),
        kalshi_private_key: Some("unused".to_string()),
        kalshi_private_key_path: None,
        entry_threshold: dec!(0.85),
        profit_target: dec!(0.02),
        stop_loss: dec!(0.01),
        max_hold_hours: 2,
        close_buffer_minutes: 30,
        min_liquidity: dec!(500),
        min_volume: dec!(10000),
        max_spread: dec!(0.02),
        max_position_pct: dec!(0.10),
        max_exposure_pct: dec!(0.30),
        max_positions: 5,
        min_position_dollars: dec!(50),
        daily_loss_limit: dec!(0.05),
        max_consecutive_losses: 5,
        api_error_rate_limit: 0.10,
        stream_silence_s: 15,
        stream_force_exit_s: 30,
        read_rate: 20,
        write_rate: 10,
        use_demo: true,
        entry_timeout_s: 60,
        health_port: 0,
        persist_dir: ".".to_string(),
        log_filter: "warn".to_string(),
    }
}

/// The live pipeline minus the network: store, strategy, risk, executor.
struct Harness {
    store: MarketStore,
    strategy: StrategyEngine,
    risk: RiskManager,
    executor: Executor<PaperGateway>,
}

impl Harness {
    fn new(balance: Decimal) -> Self {
        let config = test_config();
        let mut store = MarketStore::default();
        store.seed(&[MarketInfo {
            ticker: TICKER.to_string(),
            title: "Test market".to_string(),
            active: true,
            close_time: Some(Utc::now() + chrono::Duration::hours(6)),
            volume_24h: dec!(20000),
            liquidity: dec!(600),
            best_bid: None,
            best_ask: None,
            last_price: None,
        }]);

        let mut executor = Executor::new(PaperGateway::new(), Account::new(balance), &config);
        executor.set_accepting(true);

        Self {
            store,
            strategy: StrategyEngine::from_config(&config),
            risk: RiskManager::from_config(&config),
            executor,
        }
    }

    /// Apply a quote update and run paper matching to completion.
    async fn apply(&mut self, bid: Decimal, ask: Decimal) -> Vec<ExecOutcome> {
        let changed = self.store.apply(&MarketDataEvent::Ticker {
            ticker: TICKER.to_string(),
            bid: Some(bid),
            ask: Some(ask),
            last: Some(bid),
            volume_24h: Some(dec!(20000)),
            ts: Utc::now(),
        });
        assert!(changed.is_some(), "update applied");
        self.pump().await
    }

    /// Evaluate the current market for entry, gate through risk, execute,
    /// and let the fresh entry cross if it can — the same order of
    /// operations as the engine's batch handling.
    async fn evaluate_entry(&mut self) -> Result<Vec<ExecOutcome>, &'static str> {
        let market = self.store.get(TICKER).unwrap().clone();
        let occupied = self.executor.occupied(TICKER);
        let Some(signal) =
            self.strategy.evaluate_entry(&market, &self.executor.account, occupied)
        else {
            return Err("no_signal");
        };

        self.risk
            .validate_signal(
                &signal,
                &self.executor.account,
                self.executor.positions.open_count(),
                Some(&market),
            )
            .map_err(|reject| reject.reason())?;

        let mut outcomes = vec![self.executor.execute_signal(&signal).await.unwrap()];
        outcomes.extend(self.pump().await);
        Ok(outcomes)
    }

    /// Apply a quote and immediately evaluate entry on it.
    async fn tick_and_enter(&mut self, bid: Decimal, ask: Decimal) -> Vec<ExecOutcome> {
        let mut outcomes = self.apply(bid, ask).await;
        if let Ok(entered) = self.evaluate_entry().await {
            outcomes.extend(entered);
        }
        outcomes
    }

    /// Run paper matching until no more fills land.
    async fn pump(&mut self) -> Vec<ExecOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let market = self.store.get(TICKER).unwrap().clone();
            let fills: Vec<OwnOrderEvent> = self.executor.gateway_market_update(&market);
            if fills.is_empty() {
                break;
            }
            for fill in fills {
                outcomes.extend(self.executor.on_own_order_event(&fill).await);
            }
        }
        outcomes
    }

    fn closed(outcomes: &[ExecOutcome]) -> Option<kalshi_momentum::Position> {
        outcomes.iter().find_map(|o| match o {
            ExecOutcome::PositionClosed(p) => Some(p.clone()),
            _ => None,
        })
    }
}

/// Scenario 1: a qualifying tick produces one entry, and the fill attaches
/// paired exits at −1%/+2% of the fill price.
#[tokio::test]
async fn qualifying_tick_opens_position_with_paired_exits() {
    let mut harness = Harness::new(dec!(1000));

    let outcomes = harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, ExecOutcome::PositionEntered(_))));

    let position = harness.executor.positions.for_ticker(TICKER).unwrap();
    assert_eq!(position.status, PositionStatus::Entered);
    assert_eq!(position.entry_price, dec!(0.91));
    // $100 at 0.91 rounds down to 109 contracts = $99.19 deployed.
    assert_eq!(position.contracts, 109);
    assert_eq!(position.size, dec!(99.19));
    assert_eq!(position.stop_loss_price, dec!(0.9009));
    assert_eq!(position.take_profit_price, dec!(0.9282));

    // Exactly one non-terminal stop and one non-terminal target, both SELL
    // for the full position.
    let sl = harness
        .executor
        .orders
        .get(&position.stop_loss_order_id.unwrap())
        .unwrap();
    let tp = harness
        .executor
        .orders
        .get(&position.take_profit_order_id.unwrap())
        .unwrap();
    assert!(sl.is_active() && tp.is_active());
    assert_eq!(sl.side, Side::Sell);
    assert_eq!(tp.side, Side::Sell);
    assert_eq!(sl.contracts, 109);
    assert_eq!(tp.contracts, 109);
    assert!(position.stop_loss_price < position.entry_price);
    assert!(position.entry_price < position.take_profit_price);

    assert!(harness.executor.account.check_invariants());
    // Only the paired exits rest at the venue.
    assert_eq!(harness.executor.gateway.resting_count(), 2);
}

/// Scenario 2: the market rallies through the take-profit; the stop is
/// cancelled and the position closes with roughly +$2.
#[tokio::test]
async fn rally_takes_profit_and_cancels_stop() {
    let mut harness = Harness::new(dec!(1000));
    harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;

    let outcomes = harness.apply(dec!(0.93), dec!(0.94)).await;
    let closed = Harness::closed(&outcomes).expect("position closed");

    assert_eq!(closed.exit_reason, Some(ExitReason::TakeProfit));
    assert_eq!(closed.exit_price, Some(dec!(0.9282)));
    // (0.9282 − 0.91) × $99.19 ≈ +$1.81
    assert_eq!(closed.realized_pnl, Some(dec!(1.81)));

    // The sibling stop is gone from the venue.
    assert_eq!(harness.executor.gateway.resting_count(), 0);
    assert_eq!(harness.executor.account.daily_wins, 1);
    assert_eq!(harness.executor.account.realized_pnl, dec!(1.81));
    assert!(harness.executor.account.check_invariants());
}

/// Scenario 3: the market drops through the stop; the target is cancelled
/// and the loss is realized.
#[tokio::test]
async fn drop_hits_stop_and_cancels_target() {
    let mut harness = Harness::new(dec!(1000));
    harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;

    let outcomes = harness.apply(dec!(0.8900), dec!(0.90)).await;
    let closed = Harness::closed(&outcomes).expect("position closed");

    assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
    // (0.9009 − 0.91) × $99.19 ≈ −$0.90
    assert_eq!(closed.realized_pnl, Some(dec!(-0.90)));
    assert_eq!(harness.executor.account.daily_losses, 1);
    assert_eq!(harness.executor.account.consecutive_losses, 1);
    assert_eq!(harness.executor.gateway.resting_count(), 0);
    assert!(harness.executor.account.check_invariants());
}

/// Scenario 4: no price movement for over two hours; the strategy emits a
/// timeout, both exits are pulled, and an aggressive sell closes the
/// position.
#[tokio::test]
async fn stale_position_times_out_via_aggressive_exit() {
    let mut harness = Harness::new(dec!(1000));
    harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;

    // Rewind the entry clock instead of sleeping two hours.
    let position_id = harness.executor.positions.for_ticker(TICKER).unwrap().id;
    harness
        .executor
        .positions
        .get_mut(&position_id)
        .unwrap()
        .entered_at = Some(Utc::now() - chrono::Duration::hours(2) - chrono::Duration::seconds(1));

    let now = Utc::now();
    let intents = {
        let store = &harness.store;
        harness.strategy.evaluate_exits(
            harness.executor.positions.open_positions_mut(),
            |t| store.get(t).cloned(),
            now,
        )
    };
    assert_eq!(intents.len(), 1);
    assert_eq!(intents[0].reason, ExitReason::Timeout);

    let outcomes = harness
        .executor
        .strategy_exit(intents[0].position_id, ExitReason::Timeout, Some(dec!(0.90)))
        .await;
    assert!(outcomes.is_empty());

    // Both protective exits pulled; one aggressive sell at 0.95·bid rests.
    assert_eq!(harness.executor.gateway.resting_count(), 1);
    let position = harness.executor.positions.get(&position_id).unwrap();
    assert_eq!(position.status, PositionStatus::Exiting);
    let exit = harness
        .executor
        .orders
        .get(&position.exit_order_id.unwrap())
        .unwrap();
    assert_eq!(exit.price, dec!(0.86)); // 0.90 × 0.95, cent-rounded

    // The aggressive limit fills once the bid touches it.
    let outcomes = harness.apply(dec!(0.86), dec!(0.87)).await;
    let closed = Harness::closed(&outcomes).expect("position closed");
    assert_eq!(closed.exit_reason, Some(ExitReason::Timeout));
    assert!(harness.executor.account.check_invariants());
}

/// Scenario 5: a stream outage first trips the disconnect breaker (no new
/// entries), then past the force-exit threshold every open position is
/// emergency-exited with aggressive limits.
#[tokio::test]
async fn stream_outage_trips_breaker_then_force_exits() {
    let mut harness = Harness::new(dec!(1000));
    harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;

    // 16 seconds of silence: the breaker trips and refuses new entries.
    let tripped = harness.risk.breakers.check(
        &harness.executor.account,
        BreakerInputs { api_error_rate: 0.0, stream_down_secs: 16.0 },
    );
    assert_eq!(tripped.map(|r| r.as_str()), Some("stream_disconnect"));

    let market = harness.store.get(TICKER).unwrap().clone();
    let signal = Signal {
        ticker: "KXSECOND-MKT".to_string(),
        entry_price: dec!(0.91),
        size: dec!(100),
        stop_loss_price: dec!(0.9009),
        take_profit_price: dec!(0.9282),
        confidence: dec!(0.90),
        strength: SignalStrength::Strong,
        created_at: Utc::now(),
    };
    let reject = harness
        .risk
        .validate_signal(&signal, &harness.executor.account, 1, Some(&market))
        .unwrap_err();
    assert_eq!(reject.reason(), "stream_disconnect");

    // Existing positions keep their resting exits while the breaker holds.
    assert_eq!(harness.executor.gateway.resting_count(), 2);

    // Past 30 seconds: emergency-exit all open positions.
    let outcomes = harness
        .executor
        .emergency_exit_all(|_| Some(dec!(0.90)))
        .await;
    assert!(outcomes.is_empty());

    let position = harness.executor.positions.for_ticker(TICKER).unwrap();
    assert_eq!(position.status, PositionStatus::Exiting);
    assert_eq!(position.pending_exit_reason, Some(ExitReason::Emergency));
    // The protective pair is pulled; one aggressive sell remains.
    assert_eq!(harness.executor.gateway.resting_count(), 1);

    // Reconnect clears the breaker.
    harness.risk.breakers.on_stream_reconnected();
    assert!(!harness.risk.breakers.is_active());
}

/// Scenario 6: five losing closures in a row trip the streak breaker; the
/// next qualifying signal is rejected with reason `consecutive_losses`.
#[tokio::test]
async fn five_straight_losses_trip_the_streak_breaker() {
    let mut harness = Harness::new(dec!(100000));

    for round in 0..5 {
        // Four prior losses must not block the next entry.
        let outcomes = harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;
        assert!(
            outcomes.iter().any(|o| matches!(o, ExecOutcome::PositionEntered(_))),
            "round {round} should enter"
        );
        let outcomes = harness.apply(dec!(0.8900), dec!(0.90)).await;
        let closed = Harness::closed(&outcomes).expect("stop loss close");
        assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
    }
    assert_eq!(harness.executor.account.consecutive_losses, 5);

    let tripped = harness.risk.breakers.check(
        &harness.executor.account,
        BreakerInputs { api_error_rate: 0.0, stream_down_secs: 0.0 },
    );
    assert_eq!(tripped.map(|r| r.as_str()), Some("consecutive_losses"));

    // A fresh qualifying quote now produces a signal the risk gate refuses.
    harness.apply(dec!(0.90), dec!(0.91)).await;
    let reject = harness.evaluate_entry().await.unwrap_err();
    assert_eq!(reject, "consecutive_losses");
    assert_eq!(harness.executor.positions.open_count(), 0);
}

/// Universal invariants: the accounting identity and exposure cap hold
/// through a mixed sequence of entries and exits.
#[tokio::test]
async fn accounting_identity_holds_across_lifecycles() {
    let mut harness = Harness::new(dec!(1000));

    // Enter, take profit.
    harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;
    assert!(harness.executor.account.check_invariants());
    assert!(
        harness.executor.account.total_exposure
            <= harness.executor.account.current_balance * dec!(0.30)
    );
    harness.apply(dec!(0.93), dec!(0.94)).await;
    assert!(harness.executor.account.check_invariants());

    // Enter again, stop out.
    harness.tick_and_enter(dec!(0.90), dec!(0.91)).await;
    harness.apply(dec!(0.8900), dec!(0.90)).await;
    assert!(harness.executor.account.check_invariants());

    // All venue state resolved.
    assert_eq!(harness.executor.gateway.resting_count(), 0);
    assert_eq!(harness.executor.positions.open_count(), 0);
}

/// A partially-filled entry that times out proceeds with the filled amount
/// and releases the unused reservation.
#[tokio::test]
async fn partial_entry_timeout_enters_with_partial_size() {
    let mut harness = Harness::new(dec!(1000));

    // Quote the market wide so nothing auto-enters, then place an entry
    // below the ask so it rests instead of crossing.
    harness.apply(dec!(0.90), dec!(0.93)).await;
    let signal = Signal {
        ticker: TICKER.to_string(),
        entry_price: dec!(0.91),
        size: dec!(100),
        stop_loss_price: dec!(0.9009),
        take_profit_price: dec!(0.9282),
        confidence: dec!(0.90),
        strength: SignalStrength::Strong,
        created_at: Utc::now(),
    };
    harness.executor.execute_signal(&signal).await.unwrap();

    let position_id = harness.executor.positions.for_ticker(TICKER).unwrap().id;
    assert_eq!(
        harness.executor.positions.get(&position_id).unwrap().status,
        PositionStatus::Entering
    );
    assert!(harness.pump().await.is_empty());

    // Venue reports 40 of 109 contracts filled.
    let venue_id = {
        let position = harness.executor.positions.get(&position_id).unwrap();
        harness
            .executor
            .orders
            .get(&position.entry_order_id)
            .unwrap()
            .venue_id
            .clone()
            .unwrap()
    };
    harness
        .executor
        .on_own_order_event(&OwnOrderEvent::Fill {
            venue_order_id: venue_id,
            ticker: TICKER.to_string(),
            side: Side::Buy,
            price: dec!(0.91),
            count: 40,
        })
        .await;

    // The timeout sweep cancels the remainder and enters with 40 contracts.
    let outcomes = harness
        .executor
        .sweep_entry_timeouts(Utc::now() + chrono::Duration::seconds(61))
        .await;
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, ExecOutcome::PositionEntered(_))));

    let position = harness.executor.positions.get(&position_id).unwrap();
    assert_eq!(position.status, PositionStatus::Entered);
    assert_eq!(position.contracts, 40);
    assert_eq!(position.size, dec!(36.40)); // 40 × 0.91

    // Reservation for the unfilled 69 contracts is back in available.
    assert_eq!(harness.executor.account.locked_balance, dec!(0));
    assert!(harness.executor.account.check_invariants());
}
