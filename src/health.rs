//! Read-only status surface.
//!
//! A tiny HTTP server exposing a liveness probe and the current engine
//! status snapshot. The engine publishes snapshots over a watch channel;
//! the server never touches engine state directly.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::account::Account;
use crate::domain::{Position, Signal};
use crate::risk::breaker::BreakerState;

/// Point-in-time view of the engine, safe to serialize.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub accepting_signals: bool,
    pub stream_connected: bool,
    pub breaker: BreakerState,
    pub account: Account,
    pub open_positions: Vec<Position>,
    pub markets_tracked: usize,
    pub rest_error_rate: f64,
    /// Most recent accepted signals, newest last.
    pub last_signals: Vec<Signal>,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Placeholder published before the engine finishes starting.
    pub fn starting(account: Account, breaker: BreakerState) -> Self {
        Self {
            running: false,
            accepting_signals: false,
            stream_connected: false,
            breaker,
            account,
            open_positions: Vec::new(),
            markets_tracked: 0,
            rest_error_rate: 0.0,
            last_signals: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

async fn health(State(rx): State<watch::Receiver<StatusSnapshot>>) -> impl IntoResponse {
    let snapshot = rx.borrow();
    if snapshot.running {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not running")
    }
}

async fn status(State(rx): State<watch::Receiver<StatusSnapshot>>) -> impl IntoResponse {
    let snapshot = rx.borrow().clone();
    Json(snapshot)
}

/// Build the router (exposed separately for tests).
pub fn router(rx: watch::Receiver<StatusSnapshot>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(rx)
}

/// Serve the probe until the process exits.
pub async fn serve(port: u16, rx: watch::Receiver<StatusSnapshot>) {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%addr, error = %err, "health server failed to bind");
            return;
        }
    };
    info!(%addr, "health server listening");
    if let Err(err) = axum::serve(listener, router(rx)).await {
        error!(error = %err, "health server stopped");
    }
}
