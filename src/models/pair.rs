//! Per-pair rounding rules.
//!
//! Every arithmetic reduction in the ledger (fill sums, netting, average
//! prices) is rounded with the traded pair's rules so repeated small fills
//! cannot accumulate drift.

use rust_decimal::{Decimal, RoundingStrategy};

/// Price and amount precision of a traded pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSpec {
    /// Decimal places kept on prices (truncated toward zero).
    pub price_dp: u32,
    /// Decimal places kept on amounts (rounded half-to-even).
    pub amount_dp: u32,
}

impl PairSpec {
    #[must_use]
    pub const fn new(price_dp: u32, amount_dp: u32) -> Self {
        Self {
            price_dp,
            amount_dp,
        }
    }

    /// Looks up the built-in rules for a pair such as `btc_jpy`.
    pub fn for_pair(pair: &str) -> Option<Self> {
        match pair {
            "btc_jpy" => Some(Self::new(0, 8)),
            _ => None,
        }
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        price.round_dp_with_strategy(self.price_dp, RoundingStrategy::ToZero)
    }

    pub fn round_amount(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.amount_dp, RoundingStrategy::MidpointNearestEven)
    }
}
