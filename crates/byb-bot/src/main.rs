//! byb-bot: Martingale-chaser trading engine for Bybit linear perpetuals.
//!
//! Usage:
//!   byb-bot [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/bot.toml)
//!   --symbols <SYMBOLS>     Comma-separated market symbols (overrides config)
//!   -s, --symbol <SYMBOL>   Symbol the strategy trades (overrides config)
//!   --dry-run               Market data and IPC only, no order entry
//!
//! Credentials come from `BYBIT_API_KEY` / `BYBIT_API_SECRET`; when unset,
//! authenticated operations are disabled and market data continues.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use byb_bot::config::BotConfig;
use byb_bot::strategy::{run_strategy_loop, EngineConfig, StrategyEngine};
use byb_bot::trade::TradeSession;
use byb_common::ipc::{IpcPublisher, IpcPublisherConfig};
use byb_market::feed::MarketSession;
use byb_market::registry::{BookRegistry, SubscriptionSet};

/// CLI arguments for byb-bot.
#[derive(Parser, Debug)]
#[command(name = "byb-bot")]
#[command(about = "Martingale-chaser trading engine for Bybit linear perpetuals")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/bot.toml")]
    config: PathBuf,

    /// Comma-separated market symbols to subscribe
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,

    /// Symbol the strategy engine trades
    #[arg(short, long)]
    symbol: Option<String>,

    /// Run market data and IPC only, without order entry
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_publisher(cfg: &BotConfig, stream_id: i32) -> Arc<IpcPublisher> {
    let mut publisher = IpcPublisher::new(IpcPublisherConfig {
        channel: cfg.ipc.channel.clone(),
        stream_id,
        capacity: cfg.ipc.capacity_bytes,
        ..IpcPublisherConfig::default()
    });
    if cfg.ipc.enabled {
        if let Err(e) = publisher.init() {
            warn!(stream_id, error = %e, "ipc disabled, continuing without transport");
        }
    }
    Arc::new(publisher)
}

async fn run() -> Result<()> {
    // Load .env if present; only surface unexpected failures.
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: failed to load .env file: {}", e);
        }
    }

    let args = Args::parse();

    let mut config = if args.config.exists() {
        BotConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config from {:?}", args.config))?
    } else {
        BotConfig::default()
    };
    config.apply_env_overrides();
    config.apply_cli_overrides(args.symbols, args.symbol);
    if args.dry_run {
        config.trading.enabled = false;
    }
    config.validate().context("invalid configuration")?;

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    info!("starting byb-bot");
    info!(symbols = ?config.market.symbols, "market subscriptions");
    info!(
        trading = config.trading.enabled,
        symbol = %config.trading.symbol,
        authenticated = config.credentials.is_some(),
        "trading mode"
    );

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(8);
    let books = Arc::new(BookRegistry::new());
    let subscriptions = Arc::new(SubscriptionSet::new());

    let orderbook_publisher = build_publisher(&config, config.ipc.orderbook_stream_id);
    let signal_publisher = build_publisher(&config, config.ipc.signal_stream_id);

    // Public market session.
    let market = MarketSession::new(
        config.market.ws_url.clone(),
        Arc::clone(&books),
        Arc::clone(&subscriptions),
        Arc::clone(&orderbook_publisher),
    );
    for symbol in &config.market.symbols {
        market
            .subscribe(symbol)
            .with_context(|| format!("failed to queue subscription for {symbol}"))?;
    }
    let feed_handler = market.handler();

    let mut tasks = Vec::new();

    {
        let shutdown_tx = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = market.run(shutdown_rx).await {
                error!(error = %e, "market session terminated");
                let _ = shutdown_tx.send(());
            }
        }));
    }

    // IPC service task, ~20 Hz.
    {
        let orderbook_publisher = Arc::clone(&orderbook_publisher);
        let signal_publisher = Arc::clone(&signal_publisher);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(50));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        orderbook_publisher.service();
                        signal_publisher.service();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));
    }

    // Private trade session and strategy engine.
    if config.trading.enabled {
        if config.credentials.is_some() {
            let (trade_session, trade_handle, updates_rx) = TradeSession::new(
                config.trading.ws_url.clone(),
                config.credentials.clone(),
                config.trading.recv_window_ms,
            );

            {
                let shutdown_tx = shutdown_tx.clone();
                let shutdown_rx = shutdown_tx.subscribe();
                tasks.push(tokio::spawn(async move {
                    if let Err(e) = trade_session.run(shutdown_rx).await {
                        error!(error = %e, "trade session terminated");
                        let _ = shutdown_tx.send(());
                    }
                }));
            }

            let engine = StrategyEngine::new(
                config.trading.symbol.clone(),
                EngineConfig::from(&config.strategy),
                trade_handle,
                Arc::clone(&books),
                Arc::clone(&subscriptions),
                Arc::clone(&signal_publisher),
            );
            let tick_interval = Duration::from_micros(config.strategy.tick_interval_us);
            let shutdown_rx = shutdown_tx.subscribe();
            tasks.push(tokio::spawn(run_strategy_loop(
                engine,
                updates_rx,
                tick_interval,
                shutdown_rx,
            )));
        } else {
            warn!("trading enabled but credentials unset; running market data only");
        }
    } else {
        info!("order entry disabled; running market data only");
    }

    // Run until Ctrl-C or a fatal session error.
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutdown signal received");
        }
        _ = shutdown_rx.recv() => {}
    }
    let _ = shutdown_tx.send(());

    for task in tasks {
        let _ = task.await;
    }

    let stats = feed_handler.stats();
    info!(
        messages = stats.messages_received.load(std::sync::atomic::Ordering::Relaxed),
        snapshots = stats.snapshots_published.load(std::sync::atomic::Ordering::Relaxed),
        parse_errors = stats.parse_errors.load(std::sync::atomic::Ordering::Relaxed),
        ipc_sent = orderbook_publisher.messages_sent() + signal_publisher.messages_sent(),
        ipc_failures = orderbook_publisher.offer_failures() + signal_publisher.offer_failures(),
        symbols = books.len(),
        "final statistics"
    );
    info!("bot stopped cleanly");
    Ok(())
}
