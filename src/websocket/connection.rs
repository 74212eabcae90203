//! Writer half and connection state shared between a source's run loop and
//! the tasks that subscribe or disconnect it.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::SinkExt;
use tracing::debug;
use tungstenite::Message;

use super::WsWriter;
use crate::Result;

/// Holds the writer of the live connection, or `None` while disconnected.
#[derive(Default)]
pub struct Connection {
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    connected: AtomicBool,
}

impl Connection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the writer of a freshly opened socket. The connection is not
    /// reported as connected until [`mark_connected`](Self::mark_connected).
    pub async fn attach(&self, writer: WsWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Marks the protocol-level session as established.
    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Drops the writer and marks the connection as disconnected.
    pub async fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.writer.lock().await.take();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sends a text frame if connected; otherwise drops it.
    ///
    /// # Errors
    ///
    /// Returns a [`CoinfeedError`](crate::CoinfeedError) if sending fails.
    pub async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            debug!(frame = text, "Not connected; dropping frame");
            return Ok(());
        }
        self.send_raw(text).await
    }

    /// Sends a text frame whenever a socket is open, even before the
    /// protocol session is established (handshake replies).
    ///
    /// # Errors
    ///
    /// Returns a [`CoinfeedError`](crate::CoinfeedError) if sending fails.
    pub async fn send_raw(&self, text: String) -> Result<()> {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            writer.send(Message::Text(text.into())).await?;
        }
        Ok(())
    }

    /// Sends a close frame on the current socket, if any.
    ///
    /// # Errors
    ///
    /// Returns a [`CoinfeedError`](crate::CoinfeedError) if closing fails.
    pub async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            writer.close().await?;
        }
        Ok(())
    }
}
