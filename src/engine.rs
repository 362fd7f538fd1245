//! The event loop tying stream, strategy, risk, and execution together.
//!
//! Single-threaded cooperative scheduling: every mutation of market, order,
//! position and account state happens on this task. The stream task forwards
//! events over a bounded queue; timers drive the periodic exit sweep, risk
//! check, and account snapshots. Batches of market events coalesce into one
//! strategy evaluation per ticker, while fills and order updates are applied
//! inline in arrival order.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::account::Account;
use crate::alert::{Alert, AlertSender};
use crate::config::Config;
use crate::domain::{Command, OwnOrderEvent, Position, Signal, StreamEvent};
use crate::error::BotError;
use crate::execution::gateway::OrderGateway;
use crate::execution::{ExecOutcome, Executor};
use crate::health::StatusSnapshot;
use crate::market::MarketStore;
use crate::persist::{EventRecord, PersistHandle, SnapshotRecord, TradeRecord};
use crate::rest::RestClient;
use crate::risk::breaker::BreakerInputs;
use crate::risk::RiskManager;
use crate::strategy::StrategyEngine;

/// Strategy exit sweep cadence.
const EXIT_SWEEP_PERIOD: Duration = Duration::from_secs(3);
/// Circuit breaker evaluation cadence (debounces noisy inputs).
const RISK_CHECK_PERIOD: Duration = Duration::from_secs(10);
/// Account snapshot cadence.
const SNAPSHOT_PERIOD: Duration = Duration::from_secs(300);
/// Accepted signals kept for the status surface.
const SIGNAL_HISTORY: usize = 10;

/// Everything the engine needs at construction.
pub struct EngineParts<G: OrderGateway> {
    pub config: Config,
    pub store: MarketStore,
    pub executor: Executor<G>,
    /// Present in live mode; paper runs have no REST side.
    pub rest: Option<std::sync::Arc<RestClient>>,
    pub persist: PersistHandle,
    pub alerts: AlertSender,
    pub events_rx: mpsc::Receiver<StreamEvent>,
    pub commands_rx: mpsc::Receiver<Command>,
    pub status_tx: watch::Sender<StatusSnapshot>,
}

/// The single-threaded core.
pub struct Engine<G: OrderGateway> {
    config: Config,
    store: MarketStore,
    strategy: StrategyEngine,
    risk: RiskManager,
    executor: Executor<G>,
    rest: Option<std::sync::Arc<RestClient>>,
    persist: PersistHandle,
    alerts: AlertSender,
    events_rx: mpsc::Receiver<StreamEvent>,
    commands_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<StatusSnapshot>,

    stream_connected: bool,
    stream_down_since: Option<chrono::DateTime<Utc>>,
    /// Set once positions have been force-exited for this outage.
    force_exited: bool,
    last_signals: VecDeque<Signal>,
    running: bool,
}

impl<G: OrderGateway> Engine<G> {
    pub fn new(parts: EngineParts<G>) -> Self {
        let strategy = StrategyEngine::from_config(&parts.config);
        let risk = RiskManager::from_config(&parts.config);
        Self {
            config: parts.config,
            store: parts.store,
            strategy,
            risk,
            executor: parts.executor,
            rest: parts.rest,
            persist: parts.persist,
            alerts: parts.alerts,
            events_rx: parts.events_rx,
            commands_rx: parts.commands_rx,
            status_tx: parts.status_tx,
            stream_connected: false,
            stream_down_since: None,
            force_exited: false,
            last_signals: VecDeque::new(),
            running: false,
        }
    }

    /// Startup recovery, then the main loop. Returns on graceful or
    /// emergency stop.
    pub async fn run(mut self) -> Result<(), BotError> {
        self.recover().await?;
        self.running = true;
        self.publish_status();
        info!(markets = self.store.len(), "engine running");

        let mut exit_sweep = tokio::time::interval(EXIT_SWEEP_PERIOD);
        let mut risk_check = tokio::time::interval(RISK_CHECK_PERIOD);
        let mut snapshots = tokio::time::interval(SNAPSHOT_PERIOD);
        exit_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        risk_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        snapshots.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_stream_batch(event).await,
                    None => {
                        warn!("event queue closed, stopping");
                        self.shutdown(false).await;
                        break;
                    }
                },
                command = self.commands_rx.recv() => match command {
                    Some(Command::GracefulStop) => {
                        self.shutdown(false).await;
                        break;
                    }
                    Some(Command::EmergencyStop) => {
                        self.shutdown(true).await;
                        break;
                    }
                    Some(Command::ResetBreaker) => {
                        self.risk.breakers.reset_manual();
                        self.publish_status();
                    }
                    None => {
                        self.shutdown(false).await;
                        break;
                    }
                },
                _ = exit_sweep.tick() => self.on_exit_sweep().await,
                _ = risk_check.tick() => {
                    if self.on_risk_check().await {
                        break;
                    }
                }
                _ = snapshots.tick() => self.on_snapshot(),
            }
        }

        Ok(())
    }

    /// Boot-time reconciliation: balance and active orders from REST,
    /// orphan cleanup, exit recreation. Signals flow only after this.
    async fn recover(&mut self) -> Result<(), BotError> {
        let venue_orders = match &self.rest {
            Some(rest) => rest.get_active_orders().await.map_err(BotError::Rest)?,
            None => Vec::new(),
        };
        // Positions persisted by the external store would be injected here;
        // the store is write-only from the core's perspective, so a fresh
        // process starts flat and treats unmatched venue orders as orphans.
        self.executor.recover(venue_orders, Vec::new()).await?;
        Ok(())
    }

    /// Drain the queue batch that begins with `first`: apply all market
    /// events, handle own-order events inline in arrival order, then
    /// evaluate entries once per changed ticker.
    async fn handle_stream_batch(&mut self, first: StreamEvent) {
        let mut changed: HashSet<String> = HashSet::new();
        let mut next = Some(first);

        while let Some(event) = next.take() {
            match event {
                StreamEvent::Market(market_event) => {
                    if let Some(ticker) = self.store.apply(&market_event) {
                        self.pump_paper_fills(&ticker).await;
                        changed.insert(ticker);
                    }
                }
                StreamEvent::OwnOrder(own_event) => {
                    let outcomes = self.executor.on_own_order_event(&own_event).await;
                    self.process_outcomes(outcomes).await;
                }
                StreamEvent::Connected => self.on_stream_connected().await,
                StreamEvent::Disconnected => {
                    self.stream_connected = false;
                    self.stream_down_since = Some(Utc::now());
                    self.persist
                        .record_event(EventRecord::new("stream_disconnected", None, ""));
                    self.publish_status();
                }
            }

            if let Ok(event) = self.events_rx.try_recv() {
                next = Some(event);
            }
        }

        for ticker in changed {
            self.maybe_enter(&ticker).await;
        }
    }

    /// Let the paper gateway match resting orders against the new market
    /// state. Live gateways produce nothing here.
    async fn pump_paper_fills(&mut self, ticker: &str) {
        let Some(market) = self.store.get(ticker).cloned() else {
            return;
        };
        let fills: Vec<OwnOrderEvent> = self.executor.gateway_market_update(&market);
        for fill in fills {
            let outcomes = self.executor.on_own_order_event(&fill).await;
            self.process_outcomes(outcomes).await;
            // A fill may free the gateway to match again (sibling exits).
            self.pump_paper_fills_once(ticker).await;
        }
    }

    async fn pump_paper_fills_once(&mut self, ticker: &str) {
        let Some(market) = self.store.get(ticker).cloned() else {
            return;
        };
        let fills: Vec<OwnOrderEvent> = self.executor.gateway_market_update(&market);
        for fill in fills {
            let outcomes = self.executor.on_own_order_event(&fill).await;
            self.process_outcomes(outcomes).await;
        }
    }

    /// Evaluate one ticker for entry, gate through risk, execute.
    async fn maybe_enter(&mut self, ticker: &str) {
        if !self.executor.accepting() {
            return;
        }
        let Some(market) = self.store.get(ticker).cloned() else {
            return;
        };

        let occupied = self.executor.occupied(ticker);
        let Some(signal) =
            self.strategy
                .evaluate_entry(&market, &self.executor.account, occupied)
        else {
            return;
        };

        if let Err(reject) = self.risk.validate_signal(
            &signal,
            &self.executor.account,
            self.executor.positions.open_count(),
            Some(&market),
        ) {
            info!(
                ticker = %signal.ticker,
                reason = reject.reason(),
                detail = %reject,
                "signal rejected"
            );
            self.persist.record_event(EventRecord::new(
                "signal_rejected",
                Some(ticker),
                reject.reason(),
            ));
            return;
        }

        match self.executor.execute_signal(&signal).await {
            Ok(outcome) => {
                self.last_signals.push_back(signal);
                if self.last_signals.len() > SIGNAL_HISTORY {
                    self.last_signals.pop_front();
                }
                self.process_outcomes(vec![outcome]).await;
            }
            Err(err) => {
                warn!(ticker = %ticker, error = %err, "signal execution failed");
                self.persist.record_event(EventRecord::new(
                    "signal_failed",
                    Some(ticker),
                    err.to_string(),
                ));
            }
        }
    }

    /// React to executor state changes: alerts, persistence, breaker hooks.
    async fn process_outcomes(&mut self, outcomes: Vec<ExecOutcome>) {
        for outcome in outcomes {
            match outcome {
                ExecOutcome::PositionOpened(position_id) => {
                    self.persist.record_event(EventRecord::new(
                        "entry_submitted",
                        self.executor.positions.get(&position_id).map(|p| p.ticker.as_str()),
                        position_id.to_string(),
                    ));
                }
                ExecOutcome::PositionEntered(position_id) => {
                    if let Some(position) = self.executor.positions.get(&position_id) {
                        self.alerts.send(Alert::PositionOpened {
                            ticker: position.ticker.clone(),
                            entry_price: position.entry_price,
                            size: position.size,
                        });
                        self.persist
                            .record_trade(TradeRecord::from_position(position));
                    }
                }
                ExecOutcome::PositionClosed(position) => {
                    self.on_position_closed(&position);
                }
                ExecOutcome::EntryAbandoned(position_id) => {
                    self.persist.record_event(EventRecord::new(
                        "entry_abandoned",
                        None,
                        position_id.to_string(),
                    ));
                }
                ExecOutcome::ExitStuck(position_id) => {
                    self.alerts.send(Alert::ExitStuck { position_id });
                    self.persist.record_event(EventRecord::new(
                        "exit_stuck",
                        None,
                        position_id.to_string(),
                    ));
                }
            }
        }
        self.publish_status();
    }

    fn on_position_closed(&mut self, position: &Position) {
        let pnl = position.realized_pnl.unwrap_or_default();
        if pnl > Decimal::ZERO {
            self.risk.breakers.on_winning_close();
        }
        self.alerts.send(Alert::PositionClosed {
            ticker: position.ticker.clone(),
            reason: position
                .exit_reason
                .map(|r| r.as_str().to_string())
                .unwrap_or_default(),
            realized_pnl: pnl,
        });
        self.persist.record_trade(TradeRecord::from_position(position));
    }

    /// 3s sweep: entry timeouts, then timeout/close exits.
    async fn on_exit_sweep(&mut self) {
        let now = Utc::now();

        let outcomes = self.executor.sweep_entry_timeouts(now).await;
        self.process_outcomes(outcomes).await;

        let intents = {
            let store = &self.store;
            self.strategy.evaluate_exits(
                self.executor.positions.open_positions_mut(),
                |ticker| store.get(ticker).cloned(),
                now,
            )
        };

        for intent in intents {
            let bid = self
                .executor
                .positions
                .get(&intent.position_id)
                .and_then(|p| self.store.get(&p.ticker))
                .and_then(|m| m.best_bid);
            let outcomes = self
                .executor
                .strategy_exit(intent.position_id, intent.reason, bid)
                .await;
            self.process_outcomes(outcomes).await;
        }
    }

    /// 10s check: daily rollover, breaker evaluation, forced exits on a
    /// long stream outage. Returns true when the engine must stop.
    async fn on_risk_check(&mut self) -> bool {
        let now = Utc::now();

        // UTC-midnight rollover: summary alert, counters reset, daily-loss
        // breaker cleared.
        let summary = (
            self.executor.account.daily_pnl,
            self.executor.account.daily_trades,
            self.executor.account.daily_wins,
            self.executor.account.daily_losses,
        );
        if self.executor.account.maybe_reset_daily(now) {
            self.alerts.send(Alert::DailySummary {
                pnl: summary.0,
                trades: summary.1,
                wins: summary.2,
                losses: summary.3,
            });
            self.risk.breakers.on_daily_reset();
        }

        let down_secs = match (self.stream_connected, self.stream_down_since) {
            (true, _) => 0.0,
            (false, Some(since)) => (now - since).num_milliseconds() as f64 / 1000.0,
            (false, None) => 0.0,
        };
        let api_error_rate = self.rest.as_ref().map(|r| r.error_rate()).unwrap_or(0.0);

        if let Some(reason) = self.risk.breakers.check(
            &self.executor.account,
            BreakerInputs { api_error_rate, stream_down_secs: down_secs },
        ) {
            self.alerts.send(Alert::BreakerTripped {
                reason: reason.as_str().to_string(),
                daily_pnl: self.executor.account.daily_pnl,
                consecutive_losses: self.executor.account.consecutive_losses,
            });
            self.persist
                .record_event(EventRecord::new("breaker_tripped", None, reason.as_str()));
        }

        // A long outage force-exits everything; resting exits may be
        // unservable while the venue connection is gone.
        if !self.stream_connected
            && down_secs >= self.config.stream_force_exit_s as f64
            && !self.force_exited
            && self.executor.positions.open_count() > 0
        {
            warn!(down_secs, "stream outage past force-exit threshold");
            self.force_exited = true;
            let count = self.executor.positions.open_count();
            self.alerts.send(Alert::EmergencyExit { positions: count });
            let outcomes = {
                let store = &self.store;
                self.executor
                    .emergency_exit_all(|ticker| store.get(ticker).and_then(|m| m.best_bid))
                    .await
            };
            self.process_outcomes(outcomes).await;
        }

        // Refresh unrealized P&L for the status surface.
        let unrealized = {
            let store = &self.store;
            self.executor
                .positions
                .unrealized_pnl(|ticker| store.get(ticker).and_then(|m| m.last_price.or(m.best_bid)))
        };
        self.executor.account.set_unrealized_pnl(unrealized);

        if self.risk.breakers.requires_shutdown() {
            error!("breaker requires shutdown");
            self.shutdown(false).await;
            return true;
        }

        self.publish_status();
        false
    }

    fn on_snapshot(&mut self) {
        self.persist.record_snapshot(SnapshotRecord::new(
            &self.executor.account,
            self.executor.positions.open_count(),
            self.risk.breakers.state(),
        ));
        self.publish_status();
    }

    /// Stop accepting signals, resolve open work, close out.
    async fn shutdown(&mut self, emergency: bool) {
        info!(emergency, "shutting down");
        self.executor.set_accepting(false);

        let outcomes = self.executor.cancel_open_entries().await;
        self.process_outcomes(outcomes).await;

        if emergency {
            let outcomes = {
                let store = &self.store;
                self.executor
                    .emergency_exit_all(|ticker| store.get(ticker).and_then(|m| m.best_bid))
                    .await
            };
            self.process_outcomes(outcomes).await;
        }

        self.on_snapshot();
        self.running = false;
        self.publish_status();
        info!("engine stopped");
    }

    async fn on_stream_connected(&mut self) {
        let was_down = !self.stream_connected && self.stream_down_since.is_some();
        self.stream_connected = true;
        self.stream_down_since = None;
        self.force_exited = false;
        self.risk.breakers.on_stream_reconnected();
        if was_down {
            info!("stream reconnected");
            self.persist
                .record_event(EventRecord::new("stream_reconnected", None, ""));
        }

        // Reconcile order state after the gap: the venue's resting list is
        // authoritative for anything we think is live.
        if let Some(rest) = self.rest.clone() {
            match rest.get_active_orders().await {
                Ok(venue_orders) => {
                    for venue_order in venue_orders {
                        if self.executor.orders.by_venue_id(&venue_order.venue_id).is_some() {
                            let Some(status) = venue_order.status else {
                                continue;
                            };
                            let remaining =
                                venue_order.contracts.saturating_sub(venue_order.filled_contracts);
                            let event = OwnOrderEvent::OrderUpdate {
                                venue_order_id: venue_order.venue_id.clone(),
                                status,
                                remaining_contracts: remaining,
                            };
                            let outcomes = self.executor.on_own_order_event(&event).await;
                            self.process_outcomes(outcomes).await;
                        }
                    }
                }
                Err(err) => warn!(error = %err, "post-reconnect order reconciliation failed"),
            }
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let snapshot = StatusSnapshot {
            running: self.running,
            accepting_signals: self.executor.accepting(),
            stream_connected: self.stream_connected,
            breaker: self.risk.breakers.state(),
            account: self.executor.account.clone(),
            open_positions: self.executor.positions.open_positions().cloned().collect(),
            markets_tracked: self.store.len(),
            rest_error_rate: self.rest.as_ref().map(|r| r.error_rate()).unwrap_or(0.0),
            last_signals: self.last_signals.iter().cloned().collect(),
            updated_at: Utc::now(),
        };
        let _ = self.status_tx.send(snapshot);
    }
}
