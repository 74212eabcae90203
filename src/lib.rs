//! Streaming market-data layer for a spot crypto exchange.
//!
//! A transport [`Source`](websocket::Source) keeps a reconnecting feed
//! connection and normalizes wire messages into trade and order-book
//! records. [`Streaming`](streaming::Streaming) multiplexes those records
//! onto bounded [`Endpoint`](endpoint::Endpoint)s and the [`Board`](board::Board).
//! The [`Inventory`](inventory::Inventory) ledger tracks orders and nets the
//! position, and [`Trader`](trader::Trader) drives user trading logic on top.

pub mod board;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod inventory;
pub mod models;
pub mod streaming;
pub mod trader;
pub mod websocket;

pub use error::{CoinfeedError, Result};
