//! Write intents for the external store.
//!
//! The core emits trade, snapshot and event records over a bounded channel
//! and never waits for them: a full channel drops the intent and bumps a
//! counter. The in-repo sink appends JSONL files; a real store consumes the
//! same channel shape.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::account::Account;
use crate::domain::Position;
use crate::risk::breaker::BreakerState;

/// Completed (or force-closed) trade row.
#[derive(Debug, Clone, Serialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub ticker: String,
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_price: Decimal,
    pub position_size: Decimal,
    pub contracts: u32,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<String>,
    pub realized_pnl: Option<Decimal>,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub max_profit_pct: Option<Decimal>,
    pub max_drawdown_pct: Option<Decimal>,
    pub status: String,
}

impl TradeRecord {
    pub fn from_position(position: &Position) -> Self {
        Self {
            id: position.id,
            ticker: position.ticker.clone(),
            entry_time: position.entered_at,
            entry_price: position.entry_price,
            position_size: position.size,
            contracts: position.contracts,
            exit_time: position.closed_at,
            exit_price: position.exit_price,
            exit_reason: position.exit_reason.map(|r| r.as_str().to_string()),
            realized_pnl: position.realized_pnl,
            stop_loss_price: position.stop_loss_price,
            take_profit_price: position.take_profit_price,
            max_profit_pct: position.max_profit_pct,
            max_drawdown_pct: position.max_drawdown_pct,
            status: format!("{:?}", position.status).to_uppercase(),
        }
    }
}

/// Periodic account snapshot row.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotRecord {
    pub created_at: DateTime<Utc>,
    pub total_balance: Decimal,
    pub available_balance: Decimal,
    pub locked_balance: Decimal,
    pub total_exposure: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub daily_pnl: Decimal,
    pub daily_trades: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    pub consecutive_losses: u32,
    pub open_positions: usize,
    pub breaker_active: bool,
    pub breaker_reason: Option<String>,
}

impl SnapshotRecord {
    pub fn new(account: &Account, open_positions: usize, breaker: BreakerState) -> Self {
        Self {
            created_at: Utc::now(),
            total_balance: account.current_balance,
            available_balance: account.available_balance,
            locked_balance: account.locked_balance,
            total_exposure: account.total_exposure,
            realized_pnl: account.realized_pnl,
            unrealized_pnl: account.unrealized_pnl,
            daily_pnl: account.daily_pnl,
            daily_trades: account.daily_trades,
            daily_wins: account.daily_wins,
            daily_losses: account.daily_losses,
            consecutive_losses: account.consecutive_losses,
            open_positions,
            breaker_active: breaker.active,
            breaker_reason: breaker.reason.map(|r| r.as_str().to_string()),
        }
    }
}

/// Structured log row for the events relation.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    pub kind: String,
    pub ticker: Option<String>,
    pub detail: String,
}

impl EventRecord {
    pub fn new(kind: impl Into<String>, ticker: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind: kind.into(),
            ticker: ticker.map(str::to_string),
            detail: detail.into(),
        }
    }
}

/// One write intent.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "relation", rename_all = "snake_case")]
pub enum WriteIntent {
    Trade(TradeRecord),
    Snapshot(SnapshotRecord),
    Event(EventRecord),
}

/// Cheap-to-clone handle the engine writes through.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::Sender<WriteIntent>,
    dropped: Arc<AtomicU64>,
}

impl PersistHandle {
    /// Create a handle plus the receiving end for a sink task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WriteIntent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Intents never block trading: a full channel drops and counts.
    fn push(&self, intent: WriteIntent) {
        if self.tx.try_send(intent).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_trade(&self, record: TradeRecord) {
        self.push(WriteIntent::Trade(record));
    }

    pub fn record_snapshot(&self, record: SnapshotRecord) {
        self.push(WriteIntent::Snapshot(record));
    }

    pub fn record_event(&self, record: EventRecord) {
        self.push(WriteIntent::Event(record));
    }

    /// Intents dropped because the sink could not keep up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Appends intents to per-relation JSONL files.
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Drain the channel until every handle is dropped. A failed write is
    /// logged and the intent discarded; the sink keeps going.
    pub async fn run(self, mut rx: mpsc::Receiver<WriteIntent>) {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            error!(dir = ?self.dir, error = %err, "cannot create persist directory, records will be dropped");
        }
        info!(dir = ?self.dir, "persist sink started");

        while let Some(intent) = rx.recv().await {
            let file = match &intent {
                WriteIntent::Trade(_) => "trades.jsonl",
                WriteIntent::Snapshot(_) => "account_snapshots.jsonl",
                WriteIntent::Event(_) => "events.jsonl",
            };
            let line = match serde_json::to_string(&intent) {
                Ok(line) => line,
                Err(err) => {
                    error!(error = %err, "unserializable write intent");
                    continue;
                }
            };
            let path = self.dir.join(file);
            if let Err(err) = append_line(&path, &line) {
                debug!(?path, error = %err, "write intent dropped");
            }
        }
        info!("persist sink stopped");
    }
}

fn append_line(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let (handle, _rx) = PersistHandle::channel(1);
        handle.record_event(EventRecord::new("test", None, "first"));
        handle.record_event(EventRecord::new("test", None, "second"));
        assert_eq!(handle.dropped(), 1);
    }

    #[tokio::test]
    async fn sink_writes_jsonl_rows() {
        let dir = std::env::temp_dir().join(format!("km_persist_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let (handle, rx) = PersistHandle::channel(16);
        let sink = JsonlSink::new(&dir);

        handle.record_event(EventRecord::new("signal_rejected", Some("KXTEST-MKT"), "max_positions"));
        drop(handle);
        sink.run(rx).await;

        let content = std::fs::read_to_string(dir.join("events.jsonl")).unwrap();
        let value: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(value["relation"], "event");
        assert_eq!(value["ticker"], "KXTEST-MKT");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn trade_record_from_position() {
        let mut position = Position::new(
            "KXTEST-MKT",
            Uuid::new_v4(),
            dec!(0.91),
            dec!(99.19),
            dec!(0.9009),
            dec!(0.9282),
        );
        position.contracts = 109;
        position.close(dec!(0.9282), crate::domain::ExitReason::TakeProfit);

        let record = TradeRecord::from_position(&position);
        assert_eq!(record.exit_reason.as_deref(), Some("TAKE_PROFIT"));
        assert_eq!(record.realized_pnl, Some(dec!(1.81)));
        assert_eq!(record.status, "CLOSED");
    }
}
