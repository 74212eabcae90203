//! Plain JSON-over-WebSocket protocol.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use tungstenite::Message;

use super::normalize::parse_raw_frame;
use super::{Connection, Source, WsReader, connect};
use crate::Result;
use crate::models::SubscriptionRequest;
use crate::streaming::FeedSink;

/// Source speaking the raw protocol: `{"type":"subscribe","channel":C}`
/// frames out, bare JSON arrays in.
pub struct WebsocketSource {
    url: String,
    conn: Connection,
}

impl WebsocketSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: Connection::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn send_request(&self, request: &SubscriptionRequest) -> Result<()> {
        let frame = serde_json::to_string(request)?;
        debug!(frame, "Sending subscription request");
        self.conn.send_text(frame).await
    }

    async fn read_frames(&self, read: &mut WsReader, sink: &dyn FeedSink) -> Result<()> {
        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => match parse_raw_frame(&text) {
                    Ok(Some(record)) => sink.on_record(record).await,
                    Ok(None) => debug!(frame = text.as_str(), "Ignoring frame"),
                    Err(e) => warn!(error = %e, frame = text.as_str(), "Skipping malformed frame"),
                },
                Message::Close(frame) => {
                    info!(?frame, "Server closed connection");
                    return Ok(());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Source for WebsocketSource {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.send_request(&SubscriptionRequest::subscribe(channel))
            .await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.send_request(&SubscriptionRequest::unsubscribe(channel))
            .await
    }

    async fn run_loop(&self, sink: &dyn FeedSink) -> Result<()> {
        info!(url = self.url, "Connecting");
        let (writer, mut reader) = connect(&self.url).await?;
        self.conn.attach(writer).await;
        self.conn.mark_connected();
        sink.on_connect().await;

        let result = self.read_frames(&mut reader, sink).await;
        self.conn.detach().await;
        result
    }

    async fn disconnect(&self) -> Result<()> {
        self.conn.close().await
    }

    fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }
}
