//! Binary entry point: configuration, logging, wiring, lifecycle signals.

use anyhow::Context;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kalshi_momentum::account::Account;
use kalshi_momentum::alert::{self, AlertSender};
use kalshi_momentum::auth::Signer;
use kalshi_momentum::config::Config;
use kalshi_momentum::domain::Command;
use kalshi_momentum::engine::{Engine, EngineParts};
use kalshi_momentum::execution::gateway::LiveGateway;
use kalshi_momentum::execution::Executor;
use kalshi_momentum::health::{self, StatusSnapshot};
use kalshi_momentum::market::MarketStore;
use kalshi_momentum::persist::{JsonlSink, PersistHandle};
use kalshi_momentum::rest::RestClient;
use kalshi_momentum::risk::breaker::CircuitBreakers;
use kalshi_momentum::stream::{StreamClient, StreamConfig};

/// Event queue depth between the stream task and the engine.
const EVENT_QUEUE_DEPTH: usize = 4096;

fn main() -> anyhow::Result<()> {
    // All core state lives on one cooperative loop.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building runtime")?;
    runtime.block_on(run())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone())),
        )
        .init();

    info!(demo = config.use_demo, "starting kalshi-momentum");

    // Fatal at startup if the key is unreadable.
    let signer = match (&config.kalshi_private_key, &config.kalshi_private_key_path) {
        (Some(pem), _) => Signer::from_pem(&config.kalshi_api_key_id, pem),
        (None, Some(path)) => Signer::from_file(&config.kalshi_api_key_id, path),
        (None, None) => unreachable!("config validation requires a key"),
    }
    .context("loading signing key")?;

    let rest = Arc::new(
        RestClient::new(
            config.api_base_url(),
            signer.clone(),
            config.read_rate,
            config.write_rate,
        )
        .context("building rest client")?,
    );

    // Seed account and market state from the venue before anything trades.
    let balance = rest.get_balance().await.context("fetching balance")?;
    let account = Account::new(balance);
    info!(%balance, "account balance fetched");

    let markets = rest.list_markets().await.context("listing markets")?;
    let mut store = MarketStore::default();
    store.seed(&markets);
    let tickers: Vec<String> = markets.iter().map(|m| m.ticker.clone()).collect();
    info!(count = tickers.len(), "tracking markets");

    // Collaborator sinks.
    let (persist, persist_rx) = PersistHandle::channel(1024);
    tokio::spawn(JsonlSink::new(config.persist_dir.clone()).run(persist_rx));

    let (alerts, alerts_rx) = AlertSender::channel(256);
    tokio::spawn(alert::run_log_sink(alerts_rx));

    // Status surface.
    let breakers_for_status = CircuitBreakers::new(
        config.daily_loss_limit,
        config.max_consecutive_losses,
        config.api_error_rate_limit,
        config.stream_silence_s,
    );
    let (status_tx, status_rx) =
        watch::channel(StatusSnapshot::starting(account.clone(), breakers_for_status.state()));
    tokio::spawn(health::serve(config.health_port, status_rx));

    // Stream task.
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let stream = StreamClient::new(
        StreamConfig {
            url: config.ws_url().to_string(),
            max_silence: std::time::Duration::from_secs(30),
        },
        signer,
        tickers,
        events_tx,
    );
    tokio::spawn(stream.run());

    // Lifecycle: first signal stops gracefully, second force-exits.
    let (commands_tx, commands_rx) = mpsc::channel(4);
    tokio::spawn(async move {
        let mut stops = 0u32;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            stops += 1;
            let command = if stops == 1 {
                info!("interrupt received, stopping gracefully (again to force-exit)");
                Command::GracefulStop
            } else {
                warn!("second interrupt, force-exiting positions");
                Command::EmergencyStop
            };
            if commands_tx.send(command).await.is_err() {
                return;
            }
        }
    });

    let executor = Executor::new(LiveGateway::new(rest.clone()), account, &config);
    let engine = Engine::new(EngineParts {
        config,
        store,
        executor,
        rest: Some(rest),
        persist,
        alerts,
        events_rx,
        commands_rx,
        status_tx,
    });

    if let Err(err) = engine.run().await {
        error!(error = %err, "engine failed");
        return Err(err.into());
    }

    info!("shutdown complete");
    Ok(())
}
