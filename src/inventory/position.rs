//! FIFO lot netting.
//!
//! Each executed trade is appended as a lot on the right. While the oldest
//! (left) and newest (right) lots face opposite directions they offset each
//! other; partially consumed lots keep their original entry rate.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{PairSpec, Side, TradeExecution};

/// One open slice of the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Lot {
    pub side: Side,
    pub amount: Decimal,
    pub rate: Decimal,
}

impl Lot {
    pub fn new(side: Side, amount: Decimal, rate: Decimal) -> Self {
        Self { side, amount, rate }
    }
}

impl From<&TradeExecution> for Lot {
    fn from(trade: &TradeExecution) -> Self {
        Self::new(trade.side, trade.amount, trade.rate)
    }
}

/// Aggregates derived from the remaining lots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PositionSummary {
    pub long_size: Decimal,
    pub short_size: Decimal,
    /// `long_size - short_size`.
    pub position_size: Decimal,
    /// Amount-weighted mean rate over all remaining lots, both sides.
    pub average_price: Decimal,
    /// `(latest trade rate - average_price) * position_size`.
    pub unrealized_pnl: Decimal,
}

/// Ordered lots, oldest first, plus their summary.
#[derive(Debug, Clone)]
pub struct Position {
    spec: PairSpec,
    lots: VecDeque<Lot>,
    latest_rate: Decimal,
    summary: PositionSummary,
}

impl Position {
    pub fn new(spec: PairSpec) -> Self {
        Self {
            spec,
            lots: VecDeque::new(),
            latest_rate: Decimal::ZERO,
            summary: PositionSummary::default(),
        }
    }

    /// Appends `trade` as a new lot, nets it against the oldest lots and
    /// returns the recomputed summary.
    pub fn add(&mut self, trade: &TradeExecution) -> PositionSummary {
        self.latest_rate = trade.rate;
        self.lots.push_back(Lot::from(trade));
        self.net();
        self.summary = self.compute_summary();
        self.summary
    }

    fn net(&mut self) {
        while self.lots.len() >= 2 {
            let (Some(mut right), Some(mut left)) = (self.lots.pop_back(), self.lots.pop_front())
            else {
                break;
            };

            if right.side == left.side {
                self.lots.push_back(right);
                self.lots.push_front(left);
                break;
            }

            if left.amount >= right.amount {
                left.amount = self.spec.round_amount(left.amount - right.amount);
                if left.amount > Decimal::ZERO {
                    self.lots.push_front(left);
                }
            } else {
                right.amount = self.spec.round_amount(right.amount - left.amount);
                if right.amount > Decimal::ZERO {
                    self.lots.push_back(right);
                }
            }
        }
    }

    fn compute_summary(&self) -> PositionSummary {
        if self.lots.is_empty() {
            return PositionSummary::default();
        }

        let side_total = |side: Side| -> Decimal {
            self.lots
                .iter()
                .filter(|lot| lot.side == side)
                .map(|lot| lot.amount)
                .sum()
        };
        let long_size = self.spec.round_amount(side_total(Side::Buy));
        let short_size = self.spec.round_amount(side_total(Side::Sell));
        let position_size = long_size - short_size;

        // Known approximation: mixes both sides into one cost basis.
        let notional: Decimal = self.lots.iter().map(|lot| lot.rate * lot.amount).sum();
        let average_price = notional
            .checked_div(long_size + short_size)
            .map(|avg| self.spec.round_price(avg))
            .unwrap_or_default();

        PositionSummary {
            long_size,
            short_size,
            position_size,
            average_price,
            unrealized_pnl: (self.latest_rate - average_price) * position_size,
        }
    }

    pub fn summary(&self) -> PositionSummary {
        self.summary
    }

    /// Remaining lots, oldest first.
    pub fn lots(&self) -> Vec<Lot> {
        self.lots.iter().copied().collect()
    }

    pub fn is_flat(&self) -> bool {
        self.lots.is_empty()
    }
}
