//! Order book reconstruction tests.

mod common;

use std::sync::Arc;
use std::time::Duration;

use coinfeed::board::{Board, depth};
use coinfeed::models::{BookLevels, FeedPayload, FeedRecord, PriceLevel};
use coinfeed::streaming::Streaming;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use common::{ScriptedSource, StaticExchange};

fn level(price: Decimal, size: Decimal) -> PriceLevel {
    PriceLevel::new(price, size)
}

fn snapshot() -> BookLevels {
    BookLevels::new(
        vec![
            level(dec!(99), dec!(1)),
            level(dec!(101), dec!(0.5)),
            level(dec!(100), dec!(2)),
        ],
        vec![
            level(dec!(104), dec!(1)),
            level(dec!(102), dec!(0.3)),
            level(dec!(103), dec!(0.7)),
        ],
    )
}

fn assert_canonical(bids: &[PriceLevel], asks: &[PriceLevel]) {
    assert!(bids.windows(2).all(|w| w[0].price > w[1].price), "bids not descending: {bids:?}");
    assert!(asks.windows(2).all(|w| w[0].price < w[1].price), "asks not ascending: {asks:?}");
    assert!(bids.iter().chain(asks).all(|l| l.size > Decimal::ZERO));
}

#[test]
fn test_sync_then_materialize_reproduces_snapshot_sorted() {
    let board = Board::new("btc_jpy");
    board.sync(&snapshot());
    let view = board.materialize();

    assert_eq!(
        view.bids,
        vec![
            level(dec!(101), dec!(0.5)),
            level(dec!(100), dec!(2)),
            level(dec!(99), dec!(1)),
        ]
    );
    assert_eq!(
        view.asks,
        vec![
            level(dec!(102), dec!(0.3)),
            level(dec!(103), dec!(0.7)),
            level(dec!(104), dec!(1)),
        ]
    );
}

#[test]
fn test_diff_batch_yields_sorted_pruned_book() {
    let board = Board::new("btc_jpy");
    board.sync(&snapshot());

    // Several diffs in one dirty batch, in arbitrary price order.
    board.apply(&BookLevels::new(
        vec![level(dec!(100), dec!(0)), level(dec!(98.5), dec!(3))],
        vec![level(dec!(102), dec!(0))],
    ));
    board.apply(&BookLevels::new(
        vec![level(dec!(101.5), dec!(0.1))],
        vec![level(dec!(110), dec!(4)), level(dec!(102.5), dec!(0.2))],
    ));
    board.apply(&BookLevels::new(vec![level(dec!(99), dec!(1.5))], vec![]));

    let view = board.materialize();
    assert_canonical(&view.bids, &view.asks);
    assert_eq!(
        view.bids,
        vec![
            level(dec!(101.5), dec!(0.1)),
            level(dec!(101), dec!(0.5)),
            level(dec!(99), dec!(1.5)),
            level(dec!(98.5), dec!(3)),
        ]
    );
    assert_eq!(view.best_ask(), Some(level(dec!(102.5), dec!(0.2))));
    assert_eq!(view.asks.len(), 4);
}

#[test]
fn test_zero_diff_for_absent_prices_is_noop() {
    let board = Board::new("btc_jpy");
    board.sync(&snapshot());
    let before = board.materialize();

    board.apply(&BookLevels::new(
        vec![level(dec!(50), dec!(0))],
        vec![level(dec!(500), dec!(0))],
    ));
    assert_eq!(board.materialize(), before);
}

#[test]
fn test_out_of_order_batches_leave_stale_level() {
    let insert = BookLevels::new(vec![level(dec!(100.5), dec!(1))], vec![]);
    let remove = BookLevels::new(vec![level(dec!(100.5), dec!(0))], vec![]);

    let in_order = Board::new("btc_jpy");
    in_order.apply(&insert);
    in_order.apply(&remove);
    assert!(in_order.materialize().bids.is_empty());

    // Reordered batches resurrect a level the exchange already removed.
    let reordered = Board::new("btc_jpy");
    reordered.apply(&remove);
    reordered.materialize();
    reordered.apply(&insert);
    assert_eq!(reordered.materialize().bids, vec![level(dec!(100.5), dec!(1))]);
}

#[test]
fn test_depth_helpers_do_not_mutate_book() {
    let board = Board::new("btc_jpy");
    board.sync(&snapshot());
    let view = board.materialize();

    assert_eq!(depth::price_at_depth(&view.bids, dec!(2)), Some(dec!(100)));
    assert_eq!(depth::depth_within_distance(&view.asks, dec!(1)), dec!(1.0));
    assert_eq!(depth::filter_by_size(&view.bids, dec!(1)).len(), 2);
    assert_eq!(depth::bin_by_size(&view.asks, dec!(1), |p| p.trunc()).len(), 2);
    assert_eq!(board.materialize(), view);
}

#[tokio::test]
async fn test_attach_syncs_snapshot_on_connect_and_applies_diffs() {
    let diff = FeedRecord::new(
        "btc_jpy-orderbook",
        FeedPayload::OrderBookDiff(BookLevels::new(vec![level(dec!(101), dec!(0))], vec![])),
    );
    let source = Arc::new(ScriptedSource::new(vec![vec![diff]]));
    let streaming = Arc::new(Streaming::new(source));
    let exchange = Arc::new(StaticExchange::with_book(snapshot()));
    let board = Arc::new(Board::new("btc_jpy"));
    Board::attach(&board, &streaming, exchange).await.unwrap();

    let task = tokio::spawn({
        let streaming = streaming.clone();
        async move { streaming.start().await }
    });

    // Snapshot sync, then the diff removing the best bid.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while board.best_bid() != Some(level(dec!(100), dec!(2))) {
        assert!(tokio::time::Instant::now() < deadline, "diff never applied");
        board.wait_for_update().await;
    }
    assert_eq!(board.best_ask(), Some(level(dec!(102), dec!(0.3))));

    streaming.stop().await;
    task.await.unwrap();
    assert!(board.is_closed());
}
