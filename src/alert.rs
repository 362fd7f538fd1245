//! Outbound alert intents.
//!
//! The core emits typed alerts over a channel; delivery (SMTP, chat, pager)
//! is an external collaborator consuming the receiving end. The in-repo sink
//! logs them, which keeps every alert visible in development and paper mode.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events worth waking a human for.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    BreakerTripped {
        reason: String,
        daily_pnl: Decimal,
        consecutive_losses: u32,
    },
    StreamDown {
        down_secs: u64,
    },
    EmergencyExit {
        positions: usize,
    },
    PositionOpened {
        ticker: String,
        entry_price: Decimal,
        size: Decimal,
    },
    PositionClosed {
        ticker: String,
        reason: String,
        realized_pnl: Decimal,
    },
    ExitStuck {
        position_id: Uuid,
    },
    DailySummary {
        pnl: Decimal,
        trades: u32,
        wins: u32,
        losses: u32,
    },
    Fatal {
        detail: String,
    },
}

/// Cheap-to-clone emitting handle. Alerts are best-effort: a full channel
/// drops the alert (the log sink will usually have printed the underlying
/// condition anyway).
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<Alert>,
}

impl AlertSender {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn send(&self, alert: Alert) {
        let _ = self.tx.try_send(alert);
    }
}

/// Default sink: log every alert.
pub async fn run_log_sink(mut rx: mpsc::Receiver<Alert>) {
    while let Some(alert) = rx.recv().await {
        match &alert {
            Alert::BreakerTripped { .. }
            | Alert::StreamDown { .. }
            | Alert::EmergencyExit { .. }
            | Alert::ExitStuck { .. }
            | Alert::Fatal { .. } => warn!(alert = ?alert, "ALERT"),
            _ => info!(alert = ?alert, "alert"),
        }
    }
}
