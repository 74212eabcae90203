//! Order placement, cancellation and account queries against the exchange.
//!
//! The feed and ledger only see the [`Exchange`] trait; [`RestExchange`] is
//! the signed HTTP implementation.

pub mod auth;
mod rest;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{BookLevels, Fill, OrderResult, Side};

pub use rest::RestExchange;

/// Result alias for exchange calls.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Failure reported by, or while talking to, the exchange.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The exchange answered with `success: false`.
    #[error("{reason} in {context}")]
    Rejected { reason: String, context: String },

    /// The HTTP request failed or returned an error status.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// A private endpoint was called without API credentials.
    #[error("{0} requires API credentials")]
    MissingCredentials(&'static str),

    /// The request could not be signed.
    #[error("signing error: {0}")]
    Signing(String),
}

/// Parameters of a new order. `rate: None` places a market order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub pair: String,
    pub side: Side,
    pub amount: Decimal,
    pub rate: Option<Decimal>,
    pub stop_rate: Option<Decimal>,
}

impl OrderRequest {
    pub fn limit(pair: impl Into<String>, side: Side, amount: Decimal, rate: Decimal) -> Self {
        Self {
            pair: pair.into(),
            side,
            amount,
            rate: Some(rate),
            stop_rate: None,
        }
    }

    pub fn market(pair: impl Into<String>, side: Side, amount: Decimal) -> Self {
        Self {
            pair: pair.into(),
            side,
            amount,
            rate: None,
            stop_rate: None,
        }
    }

    /// Attaches a stop-loss trigger rate.
    #[must_use]
    pub fn with_stop(mut self, stop_rate: Decimal) -> Self {
        self.stop_rate = Some(stop_rate);
        self
    }
}

/// Order-management collaborator of the ledger and trading loop.
///
/// Every error is treated as non-fatal by callers: it is logged and the
/// ledger is left untouched.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Places an order and returns the exchange's acknowledgement.
    async fn place(&self, request: &OrderRequest) -> ExchangeResult<OrderResult>;

    /// Cancels an open order by exchange id.
    async fn cancel(&self, order_id: u64) -> ExchangeResult<()>;

    /// Lists open orders, optionally restricted to one pair.
    async fn list_open(&self, pair: Option<&str>) -> ExchangeResult<Vec<OrderResult>>;

    /// Fetches account fills for `pair` newer than trade id `since`.
    async fn fetch_trades(&self, pair: &str, since: Option<u64>) -> ExchangeResult<Vec<Fill>>;

    /// Fetches a full order-book snapshot.
    async fn order_book(&self, pair: &str) -> ExchangeResult<BookLevels>;

    /// Returns `false` when private endpoints are unavailable.
    fn can_trade(&self) -> bool {
        true
    }
}
