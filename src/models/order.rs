//! Order models shared by the ledger and the exchange collaborator.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::trade::{Side, TradeExecution};

/// Lifecycle state of a tracked order. `Filled` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Open)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Open => "open",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        })
    }
}

/// Result of a successful placement, or an entry of the exchange's
/// open-order listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderResult {
    pub id: u64,
    pub pair: String,
    pub side: Side,
    /// Limit price; `None` for market orders.
    pub rate: Option<Decimal>,
    pub amount: Decimal,
    pub stop_rate: Option<Decimal>,
}

/// An account trade confirmation attributed to one of our orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub order_id: u64,
    pub trade: TradeExecution,
}

/// An order tracked by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub exchange_id: u64,
    /// Caller-assigned id; `None` for orders discovered on the exchange.
    pub client_id: Option<String>,
    pub pair: String,
    pub side: Side,
    pub rate: Option<Decimal>,
    pub requested_amount: Decimal,
    pub executed_amount: Decimal,
    pub remaining_amount: Decimal,
    pub average_fill_price: Decimal,
    pub status: OrderStatus,
    /// Trades already applied, keyed by trade id.
    pub trades: BTreeMap<u64, TradeExecution>,
}

impl Order {
    /// Creates an open, unfilled order from a placement result.
    #[must_use]
    pub fn from_result(result: &OrderResult, client_id: Option<String>) -> Self {
        Self {
            exchange_id: result.id,
            client_id,
            pair: result.pair.clone(),
            side: result.side,
            rate: result.rate,
            requested_amount: result.amount,
            executed_amount: Decimal::ZERO,
            remaining_amount: result.amount,
            average_fill_price: Decimal::ZERO,
            status: OrderStatus::Open,
            trades: BTreeMap::new(),
        }
    }

    /// Returns `true` when re-issuing with these parameters would change nothing.
    pub fn matches(&self, rate: Option<Decimal>, amount: Decimal) -> bool {
        self.rate == rate && self.requested_amount == amount
    }
}
