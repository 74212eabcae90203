//! Order book models.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price level. A size of zero in a diff removes the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot or incremental update for a single trading pair,
/// in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevels {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl BookLevels {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        Self { bids, asks }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

/// A book record as delivered to a book endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookUpdate {
    /// Full state; replaces the book.
    Snapshot(BookLevels),
    /// Incremental levels; merged into the book in arrival order.
    Diff(BookLevels),
}
