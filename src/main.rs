use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coinfeed::board::Board;
use coinfeed::config::{Protocol, fetch_config};
use coinfeed::exchange::{Exchange, RestExchange};
use coinfeed::inventory::{Inventory, SWEEP_INTERVAL};
use coinfeed::streaming::Streaming;
use coinfeed::trader::{Logic, TickContext, Trader, UNTRACKED_CHECK_INTERVAL};
use coinfeed::websocket::{SocketIoSource, Source, WebsocketSource};
use coinfeed::{CoinfeedError, Result};

/// Logs a one-line market summary per tick.
struct LoggingLogic;

#[async_trait]
impl Logic for LoggingLogic {
    async fn on_tick(&self, ctx: TickContext<'_>) -> Result<()> {
        let last = ctx.executions.last();
        let volume: rust_decimal::Decimal = ctx.executions.iter().map(|t| t.amount).sum();
        let position = ctx.trader.inventory().summary();
        info!(
            trades = ctx.executions.len(),
            last_rate = ?last.map(|t| t.rate),
            %volume,
            best_bid = ?ctx.board.as_ref().and_then(|b| b.best_bid()).map(|l| l.price),
            best_ask = ?ctx.board.as_ref().and_then(|b| b.best_ask()).map(|l| l.price),
            position = %position.position_size,
            pnl = %position.unrealized_pnl,
            "Tick"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app_config = fetch_config()?;
    let coincheck = &app_config.coincheck;
    let trading = app_config.trading;

    let source: Arc<dyn Source> = match coincheck.protocol {
        Protocol::WebSocket => Arc::new(WebsocketSource::new(coincheck.feed_url())),
        Protocol::SocketIo => Arc::new(SocketIoSource::new(coincheck.feed_url())),
    };
    let mut rest = RestExchange::new(&coincheck.rest_url)?;
    if let Some((key, secret)) = coincheck.credentials() {
        rest = rest.with_credentials(key, secret);
    } else {
        warn!("No API credentials; private endpoints disabled");
    }
    let exchange: Arc<dyn Exchange> = Arc::new(rest);

    let streaming = Arc::new(Streaming::new(source));
    let executions = streaming
        .trades_endpoint(&trading.pair, trading.trades_capacity)
        .await;
    let inventory = Arc::new(Inventory::new(trading.spec));

    let mut trader = Trader::new(
        trading.pair.clone(),
        exchange.clone(),
        inventory.clone(),
        executions,
        trading.interval,
    );
    if let Some(minimum) = trading.minimum_interval {
        trader = trader.with_minimum_interval(minimum);
    }
    if trading.enable_board {
        let board = Arc::new(Board::new(trading.pair.clone()));
        Board::attach(&board, &streaming, exchange.clone()).await?;
        trader = trader.with_board(board);
    }
    let trader = Arc::new(trader);

    let (sweeper_stop, sweeper_rx) = tokio::sync::watch::channel(false);
    let mut tasks = vec![
        tokio::spawn({
            let streaming = streaming.clone();
            async move { streaming.start().await }
        }),
        tokio::spawn(inventory.clone().run_sweeper(SWEEP_INTERVAL, sweeper_rx)),
        tokio::spawn({
            let trader = trader.clone();
            async move { trader.run(&LoggingLogic).await }
        }),
    ];
    if exchange.can_trade() {
        tasks.push(tokio::spawn({
            let trader = trader.clone();
            async move { trader.run_untracked_checker(UNTRACKED_CHECK_INTERVAL).await }
        }));
    }

    info!(pair = trading.pair, protocol = %coincheck.protocol, "Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CoinfeedError::Config(format!("cannot listen for Ctrl-C: {e}")))?;

    info!("Shutting down");
    streaming.stop().await;
    trader.stop();
    sweeper_stop.send_replace(true);
    if exchange.can_trade() {
        trader.cancel_all().await;
    }
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }
    Ok(())
}
