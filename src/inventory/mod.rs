//! Order and position ledger.
//!
//! Orders are keyed by exchange id (authoritative) and indexed by the
//! caller's client id. Trade confirmations update the order they belong to
//! and feed the FIFO [`Position`]. Orders that leave the `open` state are
//! periodically moved from the active map into an archive; nothing is ever
//! deleted.

mod position;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::{Fill, Order, OrderResult, OrderStatus, PairSpec, TradeExecution};

pub use position::{Lot, Position, PositionSummary};

/// Interval of the active/archive reconciliation pass.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Point-in-time copy of the position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub lots: Vec<Lot>,
    pub summary: PositionSummary,
}

struct Ledger {
    active: HashMap<u64, Order>,
    archive: HashMap<u64, Order>,
    by_client: HashMap<String, u64>,
    position: Position,
}

impl Ledger {
    fn order(&self, exchange_id: u64) -> Option<&Order> {
        self.active
            .get(&exchange_id)
            .or_else(|| self.archive.get(&exchange_id))
    }

    fn order_mut(&mut self, exchange_id: u64) -> Option<&mut Order> {
        match self.active.get_mut(&exchange_id) {
            Some(order) => Some(order),
            None => self.archive.get_mut(&exchange_id),
        }
    }
}

/// Thread-safe order and position ledger for one trading pair.
pub struct Inventory {
    spec: PairSpec,
    state: Mutex<Ledger>,
}

impl Inventory {
    pub fn new(spec: PairSpec) -> Self {
        Self {
            spec,
            state: Mutex::new(Ledger {
                active: HashMap::new(),
                archive: HashMap::new(),
                by_client: HashMap::new(),
                position: Position::new(spec),
            }),
        }
    }

    pub fn spec(&self) -> PairSpec {
        self.spec
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a freshly placed order as open and unfilled under
    /// `client_id`, replacing any previous order for that id in the index.
    pub fn new_order(&self, client_id: &str, result: &OrderResult) -> Order {
        let order = Order::from_result(result, Some(client_id.to_string()));
        let mut ledger = self.ledger();
        ledger.active.insert(order.exchange_id, order.clone());
        ledger.by_client.insert(client_id.to_string(), order.exchange_id);
        info!(
            client_id,
            order_id = order.exchange_id,
            side = %order.side,
            rate = ?order.rate,
            amount = %order.requested_amount,
            "NEW"
        );
        order
    }

    /// Latest order registered under `client_id`.
    pub fn get_order(&self, client_id: &str) -> Option<Order> {
        let ledger = self.ledger();
        let id = ledger.by_client.get(client_id)?;
        ledger.order(*id).cloned()
    }

    /// Order by exchange id, active or archived.
    pub fn get_by_exchange_id(&self, exchange_id: u64) -> Option<Order> {
        self.ledger().order(exchange_id).cloned()
    }

    /// Open orders currently referenced by a client id.
    pub fn get_active_orders(&self) -> Vec<Order> {
        let ledger = self.ledger();
        ledger
            .by_client
            .values()
            .filter_map(|id| ledger.order(*id))
            .filter(|order| order.status.is_open())
            .cloned()
            .collect()
    }

    /// Open orders in the working set that no client id references: orders
    /// replaced under their client id while still open, and orders reported
    /// by the exchange that this process never placed.
    pub fn get_untracked_active_orders(&self) -> Vec<Order> {
        let ledger = self.ledger();
        let tracked: HashSet<u64> = ledger.by_client.values().copied().collect();
        ledger
            .active
            .values()
            .filter(|order| order.status.is_open() && !tracked.contains(&order.exchange_id))
            .cloned()
            .collect()
    }

    /// Adds exchange-reported open orders unknown to the ledger to the
    /// working set, without a client id. Returns how many were added.
    pub fn track_exchange_orders(&self, reported: &[OrderResult]) -> usize {
        let mut ledger = self.ledger();
        let mut added = 0;
        for result in reported {
            if ledger.order(result.id).is_some() {
                continue;
            }
            warn!(
                order_id = result.id,
                pair = result.pair,
                "Found order placed outside this session"
            );
            ledger.active.insert(result.id, Order::from_result(result, None));
            added += 1;
        }
        added
    }

    /// Applies a trade confirmation to order `exchange_id`.
    ///
    /// Returns the new position summary, or `None` when the order is unknown
    /// or the trade was already applied to it.
    pub fn on_execute(&self, exchange_id: u64, trade: &TradeExecution) -> Option<PositionSummary> {
        let spec = self.spec;
        let mut ledger = self.ledger();
        let Some(order) = ledger.order_mut(exchange_id) else {
            debug!(order_id = exchange_id, trade_id = trade.id, "Trade for unknown order");
            return None;
        };
        if order.trades.contains_key(&trade.id) {
            debug!(order_id = exchange_id, trade_id = trade.id, "Duplicate trade ignored");
            return None;
        }

        order.trades.insert(trade.id, trade.clone());
        let executed: Decimal = order.trades.values().map(|t| t.amount).sum();
        let notional: Decimal = order.trades.values().map(|t| t.amount * t.rate).sum();
        order.executed_amount = spec.round_amount(executed);
        order.average_fill_price = notional
            .checked_div(executed)
            .map(|avg| spec.round_price(avg))
            .unwrap_or_default();
        order.remaining_amount = spec.round_amount(order.requested_amount - order.executed_amount);
        if order.status.is_open() && order.executed_amount >= order.requested_amount {
            order.status = OrderStatus::Filled;
        }
        info!(
            client_id = order.client_id.as_deref().unwrap_or("-"),
            order_id = exchange_id,
            status = %order.status,
            side = %order.side,
            average_price = %order.average_fill_price,
            executed = %order.executed_amount,
            requested = %order.requested_amount,
            "EXE"
        );

        let summary = ledger.position.add(trade);
        info!(
            size = %summary.position_size,
            average_price = %summary.average_price,
            pnl = %summary.unrealized_pnl,
            "POSITION"
        );
        Some(summary)
    }

    /// Applies account fills in trade-id order. Fills for unknown orders are
    /// skipped. Returns how many fills changed the ledger.
    pub fn apply_fills(&self, mut fills: Vec<Fill>) -> usize {
        fills.sort_by_key(|fill| fill.trade.id);
        fills
            .iter()
            .filter(|fill| self.on_execute(fill.order_id, &fill.trade).is_some())
            .count()
    }

    /// Moves an open order to `cancelled`. Returns `false` if the order is
    /// unknown or already terminal.
    pub fn mark_cancelled(&self, exchange_id: u64) -> bool {
        let mut ledger = self.ledger();
        match ledger.order_mut(exchange_id) {
            Some(order) if order.status.is_open() => {
                order.status = OrderStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// Moves every non-open order from the working set into the archive.
    /// Returns `(active, archived)` counts after the pass.
    pub fn sweep(&self) -> (usize, usize) {
        let mut ledger = self.ledger();
        let (open, closed): (HashMap<_, _>, HashMap<_, _>) = std::mem::take(&mut ledger.active)
            .into_iter()
            .partition(|(_, order)| order.status.is_open());
        ledger.active = open;
        ledger.archive.extend(closed);
        (ledger.active.len(), ledger.archive.len())
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `stop` turns true.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
            let (active, archived) = self.sweep();
            info!(active, archived, "Swept non-active orders");
        }
    }

    pub fn summary(&self) -> PositionSummary {
        self.ledger().position.summary()
    }

    pub fn position(&self) -> PositionSnapshot {
        let ledger = self.ledger();
        PositionSnapshot {
            lots: ledger.position.lots(),
            summary: ledger.position.summary(),
        }
    }

    /// Number of orders in the working set and in the archive.
    pub fn counts(&self) -> (usize, usize) {
        let ledger = self.ledger();
        (ledger.active.len(), ledger.archive.len())
    }
}
