//! Order book reconstructed from a snapshot plus incremental diffs.
//!
//! Diffs are merged into per-side price maps and the sorted sides are only
//! rebuilt on [`Board::materialize`], so a burst of diffs costs one sort.
//! Diffs must be applied in arrival order; reordering whole batches can
//! leave stale levels behind.

pub mod depth;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::endpoint::{Wake, wait_until};
use crate::exchange::Exchange;
use crate::models::{BookLevels, Channel, FeedPayload, PriceLevel};
use crate::streaming::{ChannelCallback, ConnectHook, Streaming};
use crate::{CoinfeedError, Result};

/// Sorted, pruned view of both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardView {
    /// Descending by price.
    pub bids: Vec<PriceLevel>,
    /// Ascending by price.
    pub asks: Vec<PriceLevel>,
}

impl BoardView {
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Best ask minus best bid, if both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }
}

#[derive(Default)]
struct BoardState {
    bid_map: HashMap<Decimal, Decimal>,
    ask_map: HashMap<Decimal, Decimal>,
    view: BoardView,
    updated: bool,
    dirty: bool,
    closed: bool,
}

impl BoardState {
    fn rebuild(&mut self) {
        self.bid_map.retain(|_, size| *size > Decimal::ZERO);
        self.ask_map.retain(|_, size| *size > Decimal::ZERO);

        let mut bids = levels(&self.bid_map);
        bids.sort_unstable_by(|a, b| b.price.cmp(&a.price));
        let mut asks = levels(&self.ask_map);
        asks.sort_unstable_by(|a, b| a.price.cmp(&b.price));

        self.view = BoardView { bids, asks };
        self.dirty = false;
    }

    fn touch(&mut self, notify: &Notify) {
        self.updated = true;
        notify.notify_waiters();
    }
}

fn levels(map: &HashMap<Decimal, Decimal>) -> Vec<PriceLevel> {
    map.iter()
        .map(|(price, size)| PriceLevel::new(*price, *size))
        .collect()
}

fn merge(map: &mut HashMap<Decimal, Decimal>, levels: &[PriceLevel]) {
    map.extend(levels.iter().map(|level| (level.price, level.size)));
}

/// Order book of one trading pair.
pub struct Board {
    pair: String,
    state: Mutex<BoardState>,
    notify: Notify,
}

impl Board {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            state: Mutex::new(BoardState::default()),
            notify: Notify::new(),
        }
    }

    pub fn pair(&self) -> &str {
        &self.pair
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces both sides with a full snapshot. The sorted view is rebuilt
    /// immediately.
    pub fn sync(&self, snapshot: &BookLevels) {
        let mut state = self.state();
        state.bid_map.clear();
        state.ask_map.clear();
        merge(&mut state.bid_map, &snapshot.bids);
        merge(&mut state.ask_map, &snapshot.asks);
        state.rebuild();
        state.touch(&self.notify);
        debug!(
            pair = self.pair,
            bids = state.view.bids.len(),
            asks = state.view.asks.len(),
            "Board synced"
        );
    }

    /// Upserts diff levels by price and marks the book dirty. A size of zero
    /// removes the level on the next [`materialize`](Self::materialize).
    pub fn apply(&self, diff: &BookLevels) {
        let mut state = self.state();
        merge(&mut state.bid_map, &diff.bids);
        merge(&mut state.ask_map, &diff.asks);
        state.dirty = true;
        state.touch(&self.notify);
    }

    /// Prunes empty levels and re-sorts if dirty, then returns both sides.
    pub fn materialize(&self) -> BoardView {
        let mut state = self.state();
        if state.dirty {
            state.rebuild();
        }
        state.view.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.state().dirty
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.materialize().best_bid()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.materialize().best_ask()
    }

    /// Waits until a [`sync`](Self::sync) or [`apply`](Self::apply) has
    /// happened since the previous call, or the board is shut down.
    pub async fn wait_for_update(&self) -> Wake {
        wait_until(&self.notify, || {
            let mut state = self.state();
            if state.closed {
                Some(Wake::Closed)
            } else if state.updated {
                state.updated = false;
                Some(Wake::Updated)
            } else {
                None
            }
        })
        .await
    }

    /// Releases all waiters permanently.
    pub fn shutdown(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Subscribes the board to its pair's order-book channel and refetches
    /// the snapshot from `exchange` on every connect.
    ///
    /// If the feed is already connected the snapshot is fetched right away.
    ///
    /// # Errors
    ///
    /// Returns the exchange error if the immediate snapshot fetch fails.
    pub async fn attach(
        board: &Arc<Board>,
        streaming: &Streaming,
        exchange: Arc<dyn Exchange>,
    ) -> Result<()> {
        let hook = Arc::new(SnapshotHook {
            board: board.clone(),
            exchange,
        });
        streaming.add_connect_hook(hook.clone());
        streaming
            .add_endpoint(&Channel::OrderBook.key(&board.pair), board.clone())
            .await;

        if streaming.is_connected() {
            hook.on_connect().await?;
        }
        Ok(())
    }
}

impl ChannelCallback for Board {
    fn on_record(&self, channel: &str, payload: &FeedPayload) -> Result<()> {
        match payload {
            FeedPayload::OrderBookSnapshot(levels) => self.sync(levels),
            FeedPayload::OrderBookDiff(levels) => self.apply(levels),
            other => {
                return Err(CoinfeedError::UnexpectedRecord {
                    channel: channel.to_string(),
                    kind: other.kind(),
                });
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        Board::shutdown(self);
    }
}

/// Fetches a fresh snapshot whenever the feed (re)connects.
struct SnapshotHook {
    board: Arc<Board>,
    exchange: Arc<dyn Exchange>,
}

#[async_trait]
impl ConnectHook for SnapshotHook {
    async fn on_connect(&self) -> Result<()> {
        let snapshot = self.exchange.order_book(&self.board.pair).await?;
        info!(
            pair = self.board.pair,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Fetched order book snapshot"
        );
        self.board.sync(&snapshot);
        Ok(())
    }
}
