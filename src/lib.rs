//! Momentum trading agent for Kalshi binary prediction markets.
//!
//! The agent watches a live market-data stream for contracts whose bid
//! probability has risen above a configured threshold, enters long, and
//! manages each position with a paired stop-loss and take-profit resting on
//! the venue until one fills, a timeout fires, or the market closes.
//!
//! # Architecture
//!
//! A single-process, single-threaded event pipeline:
//!
//! ```text
//! StreamClient ─events─▶ MarketStore ─▶ StrategyEngine ─▶ RiskManager
//!                                                            │
//!                     OrderManager / PositionTracker ◀── Executor ──▶ RestClient
//!                                                            │
//!                                                         Account
//! ```
//!
//! The [`engine::Engine`] owns all mutable state and drains one bounded
//! event queue; suspension happens only at I/O boundaries. The
//! [`execution::paper::PaperGateway`] swaps in for the live venue behind
//! [`execution::gateway::OrderGateway`], running the identical order,
//! position, account and risk code paths offline.

pub mod account;
pub mod alert;
pub mod auth;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod execution;
pub mod health;
pub mod market;
pub mod persist;
pub mod rest;
pub mod risk;
pub mod strategy;
pub mod stream;

pub use account::Account;
pub use config::Config;
pub use domain::{
    Command, ExitReason, Order, OrderPurpose, OrderStatus, Position, PositionStatus, Side, Signal,
    StreamEvent,
};
pub use engine::{Engine, EngineParts};
pub use error::{BotError, ErrorKind};
pub use execution::{gateway::OrderGateway, paper::PaperGateway, ExecOutcome, Executor};
pub use market::{Market, MarketStore};
pub use risk::RiskManager;
pub use strategy::StrategyEngine;
