//! Crate-level error types.
//!
//! [`CoinfeedError`] unifies the error sources of the streaming layer
//! (configuration, WebSocket, JSON, record shape) behind a single enum so
//! callers can match on the variant they care about while still using the
//! `?` operator. Exchange-reported failures keep their own typed
//! [`ExchangeError`](crate::exchange::ExchangeError) and convert into it.

use crate::exchange::ExchangeError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoinfeedError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum CoinfeedError {
    /// An environment variable held an invalid or inconsistent value.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (connect, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A wire frame did not have the shape the protocol promises.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A channel callback received a record kind it cannot consume.
    #[error("unexpected {kind} record on channel {channel}")]
    UnexpectedRecord { channel: String, kind: &'static str },

    /// The exchange rejected a request or could not be reached.
    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}
