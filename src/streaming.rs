//! Channel multiplexer between a transport [`Source`] and its consumers.
//!
//! [`Streaming`] owns the per-channel callback lists. A channel is
//! subscribed on the transport exactly while at least one callback is
//! registered for it, and every registered channel is re-subscribed each
//! time the source (re)connects. Records are fanned out to callbacks in
//! registration order; a failing callback is logged and skipped without
//! affecting the others or the source's run loop.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::Result;
use crate::endpoint::Endpoint;
use crate::models::{BookUpdate, Channel, FeedPayload, FeedRecord, TradeExecution};
use crate::websocket::Source;

/// Constant delay between reconnection attempts.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Consumer of the records published on a channel.
pub trait ChannelCallback: Send + Sync {
    /// Handles one record. Errors are logged by the multiplexer.
    ///
    /// # Errors
    ///
    /// Returns [`CoinfeedError::UnexpectedRecord`](crate::CoinfeedError::UnexpectedRecord)
    /// (or any other error) when the record cannot be consumed.
    fn on_record(&self, channel: &str, payload: &FeedPayload) -> Result<()>;

    /// Releases any task blocked on this consumer. Called once on stop.
    fn shutdown(&self) {}
}

/// Work to run every time the source connects, before channels are
/// re-subscribed.
///
/// Hooks run while the channel table is locked and must not subscribe or
/// unsubscribe channels themselves.
#[async_trait]
pub trait ConnectHook: Send + Sync {
    async fn on_connect(&self) -> Result<()>;
}

/// Receiver of connection events and normalized records from a [`Source`].
#[async_trait]
pub trait FeedSink: Send + Sync {
    /// The source just connected; invoked before any record is delivered.
    async fn on_connect(&self);

    /// A wire message was normalized into a record.
    async fn on_record(&self, record: FeedRecord);
}

type Callbacks = Vec<Arc<dyn ChannelCallback>>;

/// Reference-counted channel subscriptions fanned out to callbacks.
pub struct Streaming {
    source: Arc<dyn Source>,
    channels: tokio::sync::Mutex<HashMap<String, Callbacks>>,
    endpoints: Mutex<Callbacks>,
    hooks: Mutex<Vec<Arc<dyn ConnectHook>>>,
    running: AtomicBool,
    /// Set once the connect hooks and re-subscription of the current
    /// connection have finished; cleared when the connection ends.
    synced: AtomicBool,
    stop_tx: watch::Sender<bool>,
    retry_delay: Duration,
}

impl Streaming {
    #[must_use]
    pub fn new(source: Arc<dyn Source>) -> Self {
        Self::with_retry_delay(source, RETRY_DELAY)
    }

    /// Creates a multiplexer with a custom reconnect delay.
    #[must_use]
    pub fn with_retry_delay(source: Arc<dyn Source>, retry_delay: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            source,
            channels: tokio::sync::Mutex::new(HashMap::new()),
            endpoints: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            stop_tx,
            retry_delay,
        }
    }

    /// Returns `true` while the transport reports an open connection.
    pub fn is_connected(&self) -> bool {
        self.source.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers a hook that runs on every connect.
    pub fn add_connect_hook(&self, hook: Arc<dyn ConnectHook>) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Registers `callback` on `channel`, subscribing the transport if it is
    /// the channel's first callback.
    ///
    /// Before the current connection has been re-subscribed the transport
    /// call is left to [`FeedSink::on_connect`], so each channel is
    /// subscribed once per connection.
    pub async fn subscribe_channel(&self, channel: &str, callback: Arc<dyn ChannelCallback>) {
        let mut channels = self.channels.lock().await;
        let callbacks = channels.entry(channel.to_string()).or_default();
        callbacks.push(callback);

        if callbacks.len() == 1 && self.synced.load(Ordering::SeqCst) {
            info!(channel, "Subscribing channel");
            if let Err(e) = self.source.subscribe(channel).await {
                warn!(channel, error = %e, "Transport subscribe failed; will retry on reconnect");
            }
        }
    }

    /// Removes `callback` from `channel`, unsubscribing the transport when
    /// no callbacks remain. Returns `false` if it was not registered.
    pub async fn unsubscribe_channel(
        &self,
        channel: &str,
        callback: &Arc<dyn ChannelCallback>,
    ) -> bool {
        let mut channels = self.channels.lock().await;
        let Some(callbacks) = channels.get_mut(channel) else {
            return false;
        };
        let Some(pos) = callbacks
            .iter()
            .position(|cb| std::ptr::addr_eq(Arc::as_ptr(cb), Arc::as_ptr(callback)))
        else {
            return false;
        };
        callbacks.remove(pos);

        if callbacks.is_empty() {
            channels.remove(channel);
            info!(channel, "Unsubscribing channel");
            if self.synced.load(Ordering::SeqCst)
                && let Err(e) = self.source.unsubscribe(channel).await
            {
                warn!(channel, error = %e, "Transport unsubscribe failed");
            }
        }
        true
    }

    /// Names of the channels that currently have at least one callback.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Subscribes `endpoint` to `channel` and remembers it so that
    /// [`stop`](Self::stop) shuts it down.
    pub async fn add_endpoint<C>(&self, channel: &str, endpoint: Arc<C>) -> Arc<C>
    where
        C: ChannelCallback + 'static,
    {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(endpoint.clone());
        self.subscribe_channel(channel, endpoint.clone()).await;
        endpoint
    }

    /// Buffered endpoint on `<pair>-trades`.
    pub async fn trades_endpoint(
        &self,
        pair: &str,
        capacity: usize,
    ) -> Arc<Endpoint<TradeExecution>> {
        let endpoint = Arc::new(Endpoint::buffered(capacity));
        self.add_endpoint(&Channel::Trades.key(pair), endpoint).await
    }

    /// Buffered endpoint on `<pair>-trades-v2` (batched trades).
    pub async fn trades_v2_endpoint(
        &self,
        pair: &str,
        capacity: usize,
    ) -> Arc<Endpoint<TradeExecution>> {
        let endpoint = Arc::new(Endpoint::buffered(capacity));
        self.add_endpoint(&Channel::TradesV2.key(pair), endpoint).await
    }

    /// Buffered endpoint on `<pair>-orderbook`.
    pub async fn orderbook_endpoint(
        &self,
        pair: &str,
        capacity: usize,
    ) -> Arc<Endpoint<BookUpdate>> {
        let endpoint = Arc::new(Endpoint::buffered(capacity));
        self.add_endpoint(&Channel::OrderBook.key(pair), endpoint).await
    }

    /// Drives the source until [`stop`](Self::stop) is called, reconnecting
    /// after a constant delay whenever the connection ends or fails.
    ///
    /// Stopping is terminal: once [`stop`](Self::stop) has been called this
    /// returns immediately.
    pub async fn start(&self) {
        if self.is_stopped() {
            debug!("Streaming already stopped");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Streaming already running");
            return;
        }
        let mut stop_rx = self.stop_tx.subscribe();
        info!("Start streaming");

        loop {
            tokio::select! {
                result = self.source.run_loop(self) => match result {
                    Ok(()) => info!("Source connection closed"),
                    Err(e) => warn!(error = %e, "Source connection failed"),
                },
                () = stopped(&mut stop_rx) => break,
            }
            self.synced.store(false, Ordering::SeqCst);

            info!(retry_secs = self.retry_delay.as_secs_f64(), "Reconnecting after delay");
            tokio::select! {
                () = tokio::time::sleep(self.retry_delay) => {}
                () = stopped(&mut stop_rx) => break,
            }
        }

        self.synced.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        info!("Stop streaming");
    }

    /// Stops the run loop, disconnects the source and shuts down every
    /// endpoint added through [`add_endpoint`](Self::add_endpoint).
    ///
    /// Takes effect even before [`start`](Self::start) has run.
    pub async fn stop(&self) {
        if self.stop_tx.send_replace(true) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.synced.store(false, Ordering::SeqCst);

        if let Err(e) = self.source.disconnect().await {
            warn!(error = %e, "Source disconnect failed");
        }

        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for endpoint in endpoints {
            endpoint.shutdown();
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    async fn resubscribe_all(&self, channels: &HashMap<String, Callbacks>) {
        for channel in channels.keys() {
            debug!(channel = channel.as_str(), "Re-subscribing channel");
            if let Err(e) = self.source.subscribe(channel).await {
                warn!(channel = channel.as_str(), error = %e, "Re-subscribe failed");
            }
        }
        info!(count = channels.len(), "Channels re-subscribed");
    }
}

#[async_trait]
impl FeedSink for Streaming {
    async fn on_connect(&self) {
        // Held until re-subscription is done so concurrent subscribe calls
        // either land in this pass or see `synced`.
        let channels = self.channels.lock().await;
        self.synced.store(false, Ordering::SeqCst);

        let hooks = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            if let Err(e) = hook.on_connect().await {
                warn!(error = %e, "Connect hook failed");
            }
        }
        self.resubscribe_all(&channels).await;
        self.synced.store(true, Ordering::SeqCst);
    }

    async fn on_record(&self, record: FeedRecord) {
        let callbacks = self.channels.lock().await.get(&record.channel).cloned();
        let Some(callbacks) = callbacks else {
            debug!(
                channel = record.channel,
                kind = record.payload.kind(),
                "No subscribers for record"
            );
            return;
        };

        for callback in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                callback.on_record(&record.channel, &record.payload)
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(
                    channel = record.channel,
                    kind = record.payload.kind(),
                    error = %e,
                    "Channel callback failed"
                ),
                Err(_) => error!(
                    channel = record.channel,
                    kind = record.payload.kind(),
                    "Channel callback panicked"
                ),
            }
        }
    }
}

/// Resolves once the stop flag is set (or its sender is gone).
async fn stopped(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
