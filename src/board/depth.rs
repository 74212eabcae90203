//! Depth queries over one materialized side of the book.
//!
//! Every function takes levels best-first (bids descending, asks ascending),
//! as returned by [`Board::materialize`](super::Board::materialize), and
//! never mutates them.

use rust_decimal::Decimal;

use crate::models::PriceLevel;

/// Price of the level at which cumulative size first reaches `depth`.
///
/// If the side is shallower than `depth`, the price of the last level is
/// returned. `None` only for an empty side.
pub fn price_at_depth(levels: &[PriceLevel], depth: Decimal) -> Option<Decimal> {
    let mut cumulative = Decimal::ZERO;
    for level in levels {
        cumulative += level.size;
        if cumulative >= depth {
            return Some(level.price);
        }
    }
    levels.last().map(|level| level.price)
}

/// Cumulative size from the best level up to and including the first level
/// at least `distance` away from the best price.
pub fn depth_within_distance(levels: &[PriceLevel], distance: Decimal) -> Decimal {
    let Some(best) = levels.first() else {
        return Decimal::ZERO;
    };
    let mut cumulative = Decimal::ZERO;
    for level in levels {
        cumulative += level.size;
        if (best.price - level.price).abs() >= distance {
            break;
        }
    }
    cumulative
}

/// Levels whose size is at least `min_size`.
pub fn filter_by_size(levels: &[PriceLevel], min_size: Decimal) -> Vec<PriceLevel> {
    levels
        .iter()
        .filter(|level| level.size >= min_size)
        .copied()
        .collect()
}

/// Size-weighted mean price of a bucket, or `None` if it holds no size.
fn weighted_level<F>(bucket: &[PriceLevel], round: &F) -> Option<PriceLevel>
where
    F: Fn(Decimal) -> Decimal,
{
    let total: Decimal = bucket.iter().map(|level| level.size).sum();
    if total.is_zero() {
        return None;
    }
    let notional: Decimal = bucket.iter().map(|level| level.price * level.size).sum();
    Some(PriceLevel::new(round(notional / total), total))
}

/// Groups consecutive levels into buckets of at least `size` cumulative
/// size. Each bucket becomes one level at its size-weighted mean price,
/// passed through `round`. The final bucket may be smaller.
pub fn bin_by_size<F>(levels: &[PriceLevel], size: Decimal, round: F) -> Vec<PriceLevel>
where
    F: Fn(Decimal) -> Decimal,
{
    let mut binned = Vec::new();
    let mut bucket = Vec::new();
    let mut total = Decimal::ZERO;

    for level in levels {
        bucket.push(*level);
        total += level.size;
        if total >= size {
            binned.extend(weighted_level(&bucket, &round));
            bucket.clear();
            total = Decimal::ZERO;
        }
    }
    binned.extend(weighted_level(&bucket, &round));
    binned
}

/// Groups levels that fall on the same `step`-wide price rung
/// (`floor(price / step)`). Each rung becomes one level at its size-weighted
/// mean price, passed through `round`.
///
/// A non-positive `step` returns the levels unchanged.
pub fn bin_by_price_ladder<F>(levels: &[PriceLevel], step: Decimal, round: F) -> Vec<PriceLevel>
where
    F: Fn(Decimal) -> Decimal,
{
    if step <= Decimal::ZERO {
        return levels.to_vec();
    }

    let rung = |price: Decimal| (price / step).floor();
    let mut binned = Vec::new();
    let mut bucket: Vec<PriceLevel> = Vec::new();
    let mut current = None;

    for level in levels {
        let this = rung(level.price);
        if current.is_some_and(|c| c != this) {
            binned.extend(weighted_level(&bucket, &round));
            bucket.clear();
        }
        current = Some(this);
        bucket.push(*level);
    }
    binned.extend(weighted_level(&bucket, &round));
    binned
}
