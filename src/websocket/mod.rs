//! Transport sources for the exchange's public feed.
//!
//! This module is organized by concern:
//! - [`connection`] - Shared writer half and connected flag
//! - [`normalize`] - Wire message decoding into [`FeedRecord`](crate::models::FeedRecord)s
//! - [`raw`] - Plain JSON-over-WebSocket protocol
//! - [`socketio`] - Event-multiplexed (Engine.IO / Socket.IO) protocol
//!
//! Every protocol implements [`Source`], so new ones plug into the
//! [`Streaming`](crate::streaming::Streaming) multiplexer unchanged.

mod connection;
pub mod normalize;
mod raw;
mod socketio;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;
use tungstenite::Message;

use crate::Result;
use crate::streaming::FeedSink;

pub use connection::Connection;
pub use raw::WebsocketSource;
pub use socketio::SocketIoSource;

/// Write half of a WebSocket connection.
pub type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Read half of a WebSocket connection.
pub type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Establishes a WebSocket connection to the given URL.
///
/// # Errors
///
/// Returns a [`CoinfeedError`](crate::CoinfeedError) if the connection or TLS handshake fails.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader)> {
    let (ws_stream, _) = connect_async(url).await?;
    info!("WebSocket handshake completed");

    Ok(ws_stream.split())
}

/// A connection driver for one wire protocol.
///
/// `subscribe` and `unsubscribe` only take effect while connected; calls made
/// while disconnected are dropped and replayed by the multiplexer's
/// on-connect hook.
#[async_trait]
pub trait Source: Send + Sync {
    /// Requests delivery of `channel`.
    async fn subscribe(&self, channel: &str) -> Result<()>;

    /// Stops delivery of `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    /// Connects, calls [`FeedSink::on_connect`], then forwards normalized
    /// records until the connection closes (`Ok`) or fails (`Err`).
    async fn run_loop(&self, sink: &dyn FeedSink) -> Result<()>;

    /// Closes the current connection, if any.
    async fn disconnect(&self) -> Result<()>;

    fn is_connected(&self) -> bool;
}
