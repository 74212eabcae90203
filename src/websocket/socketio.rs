//! Event-multiplexed protocol: Socket.IO v5 over Engine.IO v4 WebSocket
//! transport.
//!
//! The session is established in two steps. The server opens the transport
//! (`0`), the client connects the default namespace (`40`) and the server
//! confirms (`40`). Only then is the source reported as connected and the
//! sink notified. Heartbeats (`2`) are answered with `3`.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use tungstenite::Message;

use super::normalize::{
    CONNECT_FRAME, EnginePacket, PONG_FRAME, encode_event, parse_engine_packet, parse_event,
};
use super::{Connection, Source, WsReader, connect};
use crate::streaming::FeedSink;
use crate::{CoinfeedError, Result};

/// Source speaking the event protocol.
pub struct SocketIoSource {
    url: String,
    conn: Connection,
}

impl SocketIoSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: Connection::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn emit(&self, event: &str, channel: &str) -> Result<()> {
        let frame = encode_event(event, &Value::String(channel.to_string()))?;
        debug!(frame, "Emitting event");
        self.conn.send_text(frame).await
    }

    /// Handles one packet. Returns `false` when the session has ended.
    async fn handle_packet(&self, packet: EnginePacket, sink: &dyn FeedSink) -> Result<bool> {
        match packet {
            EnginePacket::Open => {
                debug!("Transport open; connecting namespace");
                self.conn.send_raw(CONNECT_FRAME.to_string()).await?;
            }
            EnginePacket::Connect => {
                info!("Namespace connected");
                self.conn.mark_connected();
                sink.on_connect().await;
            }
            EnginePacket::Ping => self.conn.send_raw(PONG_FRAME.to_string()).await?,
            EnginePacket::Event { name, data } => match parse_event(&name, &data) {
                Ok(Some(record)) => sink.on_record(record).await,
                Ok(None) => debug!(event = name, "Ignoring event"),
                Err(e) => warn!(event = name, error = %e, "Skipping malformed event"),
            },
            EnginePacket::Disconnect | EnginePacket::Close => {
                info!("Server ended session");
                return Ok(false);
            }
            EnginePacket::ConnectError(reason) => {
                return Err(CoinfeedError::MalformedMessage(format!(
                    "namespace connect refused: {reason}"
                )));
            }
            EnginePacket::Pong | EnginePacket::Other(_) => {}
        }
        Ok(true)
    }

    async fn read_frames(&self, read: &mut WsReader, sink: &dyn FeedSink) -> Result<()> {
        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => {
                    let packet = match parse_engine_packet(&text) {
                        Ok(packet) => packet,
                        Err(e) => {
                            warn!(error = %e, frame = text.as_str(), "Skipping malformed packet");
                            continue;
                        }
                    };
                    if !self.handle_packet(packet, sink).await? {
                        return Ok(());
                    }
                }
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
impl Source for SocketIoSource {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.emit("subscribe", channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.emit("unsubscribe", channel).await
    }

    async fn run_loop(&self, sink: &dyn FeedSink) -> Result<()> {
        info!(url = self.url, "Connecting");
        let (writer, mut reader) = connect(&self.url).await?;
        self.conn.attach(writer).await;

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
