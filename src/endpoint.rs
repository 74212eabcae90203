//! Bounded consumer-facing buffers with wait/suspend flow control.
//!
//! An [`Endpoint`] sits between the multiplexer (single producer) and any
//! number of consumer tasks. The producer never blocks: a buffered endpoint
//! silently discards its oldest entry when full. Consumers block in
//! [`Endpoint::wait`] until data has arrived, and may pause their own wake-ups
//! with [`Endpoint::suspend`] without the transport being touched.
//!
//! All state lives behind one mutex; every mutation notifies waiters, and
//! waiters re-check the predicate under the lock after each wake-up.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use crate::models::book::BookUpdate;
use crate::models::{FeedPayload, TradeExecution};
use crate::streaming::ChannelCallback;
use crate::{CoinfeedError, Result};

/// Why a waiter was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// New data is available and the endpoint is not suspended.
    Updated,
    /// The endpoint was shut down; every later wait returns immediately.
    Closed,
}

/// Blocks until `ready` yields a [`Wake`].
///
/// The `Notified` future is enabled before the predicate is checked, so a
/// notification racing with the check cannot be lost.
pub(crate) async fn wait_until<F>(notify: &Notify, mut ready: F) -> Wake
where
    F: FnMut() -> Option<Wake>,
{
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(wake) = ready() {
            return wake;
        }
        notified.await;
    }
}

/// Storage strategy of an endpoint.
enum Slot<T> {
    /// Single slot, overwritten by every update.
    Latest(Option<T>),
    /// Fixed-capacity ring, oldest entry evicted when full.
    Buffered { ring: VecDeque<T>, capacity: usize },
}

impl<T> Slot<T> {
    /// Stores an item, returning `true` if an older entry was evicted.
    fn push(&mut self, item: T) -> bool {
        match self {
            Slot::Latest(slot) => slot.replace(item).is_some(),
            Slot::Buffered { ring, capacity } => {
                let evicted = ring.len() >= *capacity;
                if evicted {
                    ring.pop_front();
                }
                ring.push_back(item);
                evicted
            }
        }
    }

    fn take(&mut self) -> Vec<T> {
        match self {
            Slot::Latest(slot) => slot.take().into_iter().collect(),
            Slot::Buffered { ring, .. } => ring.drain(..).collect(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Slot::Latest(slot) => usize::from(slot.is_some()),
            Slot::Buffered { ring, .. } => ring.len(),
        }
    }
}

struct State<T> {
    slot: Slot<T>,
    updated: bool,
    closed: bool,
    suspend_count: usize,
    dropped: u64,
}

impl<T> State<T> {
    fn ready(&self) -> Option<Wake> {
        if self.closed {
            Some(Wake::Closed)
        } else if self.suspend_count == 0 && self.updated {
            Some(Wake::Updated)
        } else {
            None
        }
    }
}

/// A bounded single-producer/multi-consumer buffer.
pub struct Endpoint<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> Endpoint<T> {
    fn with_slot(slot: Slot<T>) -> Self {
        Self {
            state: Mutex::new(State {
                slot,
                updated: false,
                closed: false,
                suspend_count: 0,
                dropped: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Creates an endpoint that only keeps the most recent value.
    #[must_use]
    pub fn latest() -> Self {
        Self::with_slot(Slot::Latest(None))
    }

    /// Creates an endpoint that keeps up to `capacity` values (at least one).
    #[must_use]
    pub fn buffered(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self::with_slot(Slot::Buffered {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a value and marks the endpoint updated. Ignored once closed.
    pub fn update(&self, item: T) {
        self.update_many(std::iter::once(item));
    }

    /// Stores several values under a single lock and notification.
    pub fn update_many<I>(&self, items: I)
    where
        I: IntoIterator<Item = T>,
    {
        {
            let mut state = self.state();
            if state.closed {
                return;
            }
            let mut evicted = 0u64;
            for item in items {
                if state.slot.push(item) {
                    evicted += 1;
                }
            }
            if evicted > 0 {
                state.dropped += evicted;
                debug!(evicted, total = state.dropped, "Endpoint overwrote unread data");
            }
            state.updated = true;
        }
        self.notify.notify_waiters();
    }

    /// Waits until new data has arrived while not suspended, or until the
    /// endpoint is closed.
    ///
    /// Waiting does not consume the update; [`get_data`](Self::get_data) does.
    pub async fn wait(&self) -> Wake {
        wait_until(&self.notify, || self.state().ready()).await
    }

    /// Returns the buffered values and clears the buffer and the updated flag.
    ///
    /// With `blocking`, first waits as [`wait`](Self::wait) does.
    pub async fn get_data(&self, blocking: bool) -> Vec<T> {
        if blocking {
            self.wait().await;
        }
        let mut state = self.state();
        state.updated = false;
        state.slot.take()
    }

    /// Increments (`true`) or decrements (`false`) the suspend counter.
    ///
    /// While the counter is positive, [`wait`](Self::wait) stays blocked even
    /// if data arrives. Dropping back to zero releases pending waiters if an
    /// update is already waiting.
    pub fn suspend(&self, flag: bool) {
        let release = {
            let mut state = self.state();
            if flag {
                state.suspend_count += 1;
                false
            } else {
                state.suspend_count = state.suspend_count.saturating_sub(1);
                state.suspend_count == 0
            }
        };
        if release {
            self.notify.notify_waiters();
        }
    }

    /// Equivalent to `suspend(false)`.
    pub fn resume(&self) {
        self.suspend(false);
    }

    /// Closes the endpoint permanently and releases every waiter.
    pub fn shutdown(&self) {
        self.state().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn is_suspended(&self) -> bool {
        self.state().suspend_count > 0
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.state().slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total values discarded by ring overwrite since creation.
    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }
}

impl ChannelCallback for Endpoint<TradeExecution> {
    fn on_record(&self, channel: &str, payload: &FeedPayload) -> Result<()> {
        match payload {
            FeedPayload::Trade(trade) => self.update(trade.clone()),
            FeedPayload::TradeBatch(trades) => self.update_many(trades.iter().cloned()),
            other => {
                return Err(CoinfeedError::UnexpectedRecord {
                    channel: channel.to_string(),
                    kind: other.kind(),
                });
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        Endpoint::shutdown(self);
    }
}

impl ChannelCallback for Endpoint<BookUpdate> {
    fn on_record(&self, channel: &str, payload: &FeedPayload) -> Result<()> {
        match payload {
            FeedPayload::OrderBookSnapshot(levels) => {
                self.update(BookUpdate::Snapshot(levels.clone()));
            }
            FeedPayload::OrderBookDiff(levels) => self.update(BookUpdate::Diff(levels.clone())),
            other => {
                return Err(CoinfeedError::UnexpectedRecord {
                    channel: channel.to_string(),
                    kind: other.kind(),
                });
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        Endpoint::shutdown(self);
    }
}
