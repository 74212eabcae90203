//! Decision loop and the order handle exposed to trading logic.
//!
//! [`Trader`] ties the trade endpoint, the optional [`Board`], the
//! [`Inventory`] and the [`Exchange`] together. It ticks on wall-clock
//! interval boundaries (or on every trade update when the interval is
//! zero), reconciles fills before each tick and hands a [`TickContext`] to
//! the user's [`Logic`]. A failing or panicking tick is logged and the loop
//! keeps going.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::FutureExt;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::board::{Board, BoardView};
use crate::endpoint::{Endpoint, Wake};
use crate::exchange::{Exchange, ExchangeResult, OrderRequest};
use crate::inventory::Inventory;
use crate::models::{Order, Side, TradeExecution};

/// Interval of the orphaned-order check.
pub const UNTRACKED_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Inputs of one decision tick.
pub struct TickContext<'a> {
    /// Trades received since the previous tick, oldest first.
    pub executions: Vec<TradeExecution>,
    /// Materialized book, when a board is attached.
    pub board: Option<BoardView>,
    /// Order handle and ledger access.
    pub trader: &'a Trader,
}

/// User-supplied trading decision, invoked once per tick.
#[async_trait]
pub trait Logic: Send + Sync {
    async fn on_tick(&self, ctx: TickContext<'_>) -> Result<()>;
}

/// Time until the next multiple of `interval` since the Unix epoch. A time
/// exactly on a boundary waits a full interval.
pub fn until_next_boundary(now: SystemTime, interval: Duration) -> Duration {
    let interval_ms = interval.as_millis();
    if interval_ms == 0 {
        return Duration::ZERO;
    }
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let remaining = interval_ms - now_ms % interval_ms;
    Duration::from_millis(u64::try_from(remaining).unwrap_or(u64::MAX))
}

/// Returns `true` when `now` lies in a later `minimum`-wide bucket since the
/// Unix epoch than `last_entry`.
pub fn entry_allowed(last_entry: SystemTime, now: SystemTime, minimum: Duration) -> bool {
    let minimum_ms = minimum.as_millis();
    if minimum_ms == 0 {
        return true;
    }
    let bucket = |at: SystemTime| {
        at.duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default()
            / minimum_ms
    };
    bucket(now) > bucket(last_entry)
}

/// Order handle and decision loop for one pair.
pub struct Trader {
    pair: String,
    exchange: Arc<dyn Exchange>,
    inventory: Arc<Inventory>,
    executions: Arc<Endpoint<TradeExecution>>,
    board: Option<Arc<Board>>,
    interval: Duration,
    minimum_interval: Option<Duration>,
    last_entry: Mutex<SystemTime>,
    latest_trade_id: Mutex<Option<u64>>,
    stop_tx: watch::Sender<bool>,
}

impl Trader {
    pub fn new(
        pair: impl Into<String>,
        exchange: Arc<dyn Exchange>,
        inventory: Arc<Inventory>,
        executions: Arc<Endpoint<TradeExecution>>,
        interval: Duration,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            pair: pair.into(),
            exchange,
            inventory,
            executions,
            board: None,
            interval,
            minimum_interval: None,
            last_entry: Mutex::new(SystemTime::now()),
            latest_trade_id: Mutex::new(None),
            stop_tx,
        }
    }

    /// Passes the materialized `board` to every tick.
    #[must_use]
    pub fn with_board(mut self, board: Arc<Board>) -> Self {
        self.board = Some(board);
        self
    }

    /// Skips trade polling and the logic call on ticks that fall in the same
    /// `minimum`-wide wall-clock bucket as the previous entry. Trades are
    /// still drained on skipped ticks.
    #[must_use]
    pub fn with_minimum_interval(mut self, minimum: Duration) -> Self {
        self.minimum_interval = Some(minimum).filter(|m| !m.is_zero());
        self
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub fn inventory(&self) -> &Arc<Inventory> {
        &self.inventory
    }

    pub fn get_order(&self, client_id: &str) -> Option<Order> {
        self.inventory.get_order(client_id)
    }

    /// Places an order under `client_id`.
    ///
    /// If the client id already has an open order with the same rate and
    /// size this is a no-op returning `Ok(None)`. A different open order is
    /// cancelled first. With `cancel_after`, the new order is cancelled
    /// after that delay if still open.
    ///
    /// # Errors
    ///
    /// Returns the [`ExchangeError`](crate::exchange::ExchangeError) of a
    /// failed placement; the ledger is left unchanged.
    pub async fn order(
        &self,
        client_id: &str,
        side: Side,
        size: Decimal,
        limit: Option<Decimal>,
        cancel_after: Option<Duration>,
    ) -> ExchangeResult<Option<Order>> {
        let spec = self.inventory.spec();
        let size = spec.round_amount(size);
        let limit = limit.map(|rate| spec.round_price(rate));

        if let Some(existing) = self.inventory.get_order(client_id)
            && existing.status.is_open()
        {
            if existing.matches(limit, size) {
                debug!(client_id, order_id = existing.exchange_id, "Order unchanged");
                return Ok(None);
            }
            info!(client_id, order_id = existing.exchange_id, "CANCEL");
            if let Err(e) = self.cancel_order(existing.exchange_id).await {
                warn!(
                    client_id,
                    order_id = existing.exchange_id,
                    error = %e,
                    "Cancel before replace failed"
                );
            }
        }

        let request = OrderRequest {
            pair: self.pair.clone(),
            side,
            amount: size,
            rate: limit,
            stop_rate: None,
        };
        let result = match self.exchange.place(&request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(client_id, error = %e, "Order placement failed");
                return Err(e);
            }
        };
        let order = self.inventory.new_order(client_id, &result);

        if let Some(delay) = cancel_after {
            let exchange = self.exchange.clone();
            let inventory = self.inventory.clone();
            let order_id = order.exchange_id;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let still_open = inventory
                    .get_by_exchange_id(order_id)
                    .is_some_and(|o| o.status.is_open());
                if !still_open {
                    return;
                }
                info!(order_id, "CANCEL LATER");
                match exchange.cancel(order_id).await {
                    Ok(()) => {
                        inventory.mark_cancelled(order_id);
                    }
                    Err(e) => warn!(order_id, error = %e, "Delayed cancel failed"),
                }
            });
        }
        Ok(Some(order))
    }

    async fn cancel_order(&self, order_id: u64) -> ExchangeResult<()> {
        self.exchange.cancel(order_id).await?;
        self.inventory.mark_cancelled(order_id);
        Ok(())
    }

    /// Cancels the open order of `client_id`. Returns `Ok(false)` when there
    /// is nothing open to cancel.
    ///
    /// # Errors
    ///
    /// Returns the exchange error of a failed cancel; the order stays open.
    pub async fn cancel(&self, client_id: &str) -> ExchangeResult<bool> {
        let Some(order) = self.inventory.get_order(client_id) else {
            return Ok(false);
        };
        if !order.status.is_open() {
            return Ok(false);
        }
        info!(client_id, order_id = order.exchange_id, "CANCEL");
        match self.cancel_order(order.exchange_id).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(client_id, order_id = order.exchange_id, error = %e, "Cancel failed");
                Err(e)
            }
        }
    }

    /// Cancels every open order in the ledger, tracked or not. Failures are
    /// logged. Returns how many orders were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut orders = self.inventory.get_active_orders();
        orders.extend(self.inventory.get_untracked_active_orders());

        let mut cancelled = 0;
        for order in orders {
            match self.cancel_order(order.exchange_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(order_id = order.exchange_id, error = %e, "Cancel failed"),
            }
        }
        info!(cancelled, "Cancelled all open orders");
        cancelled
    }

    /// Polls account fills newer than the last seen trade id and applies
    /// them to the ledger.
    ///
    /// # Errors
    ///
    /// Returns the exchange error if the fills cannot be fetched.
    pub async fn check_trades(&self) -> ExchangeResult<usize> {
        let since = *self
            .latest_trade_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let fills = self.exchange.fetch_trades(&self.pair, since).await?;

        if let Some(max_id) = fills.iter().map(|fill| fill.trade.id).max() {
            let mut latest = self
                .latest_trade_id
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *latest = Some(latest.map_or(max_id, |id| id.max(max_id)));
        }
        Ok(self.inventory.apply_fills(fills))
    }

    /// Adopts orders the exchange reports open but the ledger does not
    /// know, then cancels every untracked open order.
    ///
    /// # Errors
    ///
    /// Returns the exchange error if the open orders cannot be listed.
    pub async fn cancel_untracked_orders(&self) -> ExchangeResult<usize> {
        let reported = self.exchange.list_open(Some(&self.pair)).await?;
        self.inventory.track_exchange_orders(&reported);

        let mut cancelled = 0;
        for order in self.inventory.get_untracked_active_orders() {
            info!(order_id = order.exchange_id, "CANCEL UNTRACKED");
            match self.cancel_order(order.exchange_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!(order_id = order.exchange_id, error = %e, "Cancel failed"),
            }
        }
        Ok(cancelled)
    }

    /// Runs [`cancel_untracked_orders`](Self::cancel_untracked_orders) every
    /// `interval` until [`stop`](Self::stop).
    pub async fn run_untracked_checker(&self, interval: Duration) {
        let mut stop = self.stop_tx.subscribe();
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
            if let Err(e) = self.cancel_untracked_orders().await {
                warn!(error = %e, "Untracked order check failed");
            }
        }
    }

    /// Runs the decision loop until [`stop`](Self::stop) or until the trade
    /// endpoint is shut down.
    pub async fn run(&self, logic: &dyn Logic) {
        let mut stop = self.stop_tx.subscribe();
        info!(pair = self.pair, interval_secs = self.interval.as_secs_f64(), "Start trading");

        // First tick only once the feed is delivering.
        tokio::select! {
            wake = self.executions.wait() => if wake == Wake::Closed { return },
            _ = stop.wait_for(|stopped| *stopped) => return,
        }
        *self
            .last_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = SystemTime::now();

        loop {
            let wake = if self.interval.is_zero() {
                tokio::select! {
                    wake = self.executions.wait() => wake,
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
            } else {
                let delay = until_next_boundary(SystemTime::now(), self.interval);
                tokio::select! {
                    () = tokio::time::sleep(delay) => Wake::Updated,
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
            };
            if wake == Wake::Closed || self.executions.is_closed() {
                break;
            }

            match AssertUnwindSafe(self.tick(logic)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Tick failed"),
                Err(_) => error!("Tick panicked"),
            }
        }
        info!("Stop trading");
    }

    async fn tick(&self, logic: &dyn Logic) -> Result<()> {
        let now = SystemTime::now();
        let can_enter = self.minimum_interval.is_none_or(|minimum| {
            let last_entry = *self
                .last_entry
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            entry_allowed(last_entry, now, minimum)
        });

        if can_enter
            && self.exchange.can_trade()
            && let Err(e) = self.check_trades().await
        {
            warn!(error = %e, "Trade check failed");
        }

        let executions = self.executions.get_data(false).await;
        if !can_enter {
            debug!(executions = executions.len(), "Within minimum interval; entry skipped");
            return Ok(());
        }
        *self
            .last_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = now;
        let board = self.board.as_ref().map(|board| board.materialize());
        debug!(executions = executions.len(), "Tick");

        logic
            .on_tick(TickContext {
                executions,
                board,
                trader: self,
            })
            .await
    }

    /// Ends [`run`](Self::run) and the background loops.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}
