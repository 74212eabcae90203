//! Shared models for the normalized exchange feed.
//!
//! Contains channel naming, the normalized record shapes every transport
//! variant produces (trades and order-book snapshots/diffs), and the
//! subscription frames of the raw WebSocket protocol.

pub mod book;
pub mod order;
pub mod pair;
pub mod trade;

use serde::Serialize;

pub use book::{BookLevels, BookUpdate, PriceLevel};
pub use order::{Fill, Order, OrderResult, OrderStatus};
pub use pair::PairSpec;
pub use trade::{Side, TradeExecution};

/// Logical topics published per trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Individual public trades (wire suffix: `"-trades"`).
    Trades,
    /// Batched public trades from the event protocol (wire suffix: `"-trades-v2"`).
    TradesV2,
    /// Incremental order-book updates (wire suffix: `"-orderbook"`).
    OrderBook,
}

impl Channel {
    /// Returns the suffix appended to the pair to form the channel key.
    pub fn suffix(&self) -> &'static str {
        match self {
            Channel::Trades => "-trades",
            Channel::TradesV2 => "-trades-v2",
            Channel::OrderBook => "-orderbook",
        }
    }

    /// Builds the channel key for a trading pair, e.g. `btc_jpy-trades`.
    pub fn key(&self, pair: &str) -> String {
        format!("{pair}{}", self.suffix())
    }
}

/// Payload of a normalized feed record.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPayload {
    Trade(TradeExecution),
    TradeBatch(Vec<TradeExecution>),
    OrderBookSnapshot(BookLevels),
    OrderBookDiff(BookLevels),
}

impl FeedPayload {
    /// Returns the record kind name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            FeedPayload::Trade(_) => "trade",
            FeedPayload::TradeBatch(_) => "trade_batch",
            FeedPayload::OrderBookSnapshot(_) => "orderbook_snapshot",
            FeedPayload::OrderBookDiff(_) => "orderbook_diff",
        }
    }
}

/// A wire message normalized by a transport source, tagged with its
/// destination channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub channel: String,
    pub payload: FeedPayload,
}

impl FeedRecord {
    pub fn new(channel: impl Into<String>, payload: FeedPayload) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }
}

/// A `subscribe` or `unsubscribe` frame of the raw WebSocket protocol.
#[derive(Debug, Serialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub tpe: &'static str,
    pub channel: String,
}

impl SubscriptionRequest {
    pub fn subscribe(channel: &str) -> Self {
        Self {
            tpe: "subscribe",
            channel: channel.to_string(),
        }
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self {
            tpe: "unsubscribe",
            channel: channel.to_string(),
        }
    }
}
