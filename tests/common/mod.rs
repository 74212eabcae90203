//! Shared test utilities: endpoint constants and in-memory exchange doubles.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use coinfeed::Result;
use coinfeed::exchange::{Exchange, ExchangeResult, OrderRequest};
use coinfeed::models::{
    BookLevels, FeedPayload, FeedRecord, Fill, OrderResult, Side, TradeExecution,
};
use coinfeed::streaming::FeedSink;
use coinfeed::websocket::Source;
use rust_decimal::Decimal;

/// Coincheck public WebSocket endpoint URL.
pub const COINCHECK_WS_URL: &str = "wss://ws-api.coincheck.com/";

/// Coincheck REST API base URL.
pub const COINCHECK_REST_URL: &str = "https://coincheck.com";

pub fn trade(id: u64, side: Side, amount: Decimal, rate: Decimal) -> TradeExecution {
    TradeExecution {
        id,
        pair: "btc_jpy".to_string(),
        rate,
        amount,
        side,
    }
}

pub fn trade_record(trade: TradeExecution) -> FeedRecord {
    FeedRecord::new(format!("{}-trades", trade.pair), FeedPayload::Trade(trade))
}

/// A [`Source`] that replays scripted connection sessions.
///
/// Each call to `run_loop` consumes one session: it connects, fires the
/// on-connect hook, delivers the session's records and then drops the
/// connection. Once the script is exhausted the last connection stays up
/// until `disconnect`. Transport calls made while connected are recorded;
/// calls made while disconnected are dropped.
#[derive(Default)]
pub struct ScriptedSource {
    sessions: Mutex<VecDeque<Vec<FeedRecord>>>,
    calls: Mutex<Vec<String>>,
    connected: AtomicBool,
    closed: Notify,
}

impl ScriptedSource {
    pub fn new(sessions: Vec<Vec<FeedRecord>>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into()),
            ..Self::default()
        }
    }

    /// Recorded transport calls: `connect`, `subscribe:<channel>`,
    /// `unsubscribe:<channel>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Recorded calls split per connection, each sorted.
    pub fn calls_per_connection(&self) -> Vec<Vec<String>> {
        let mut sessions: Vec<Vec<String>> = Vec::new();
        for call in self.calls() {
            if call == "connect" {
                sessions.push(Vec::new());
            } else if let Some(current) = sessions.last_mut() {
                current.push(call);
            }
        }
        for session in &mut sessions {
            session.sort();
        }
        sessions
    }

    fn record(&self, call: String) {
        if self.connected.load(Ordering::SeqCst) {
            self.calls.lock().unwrap().push(call);
        }
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.record(format!("subscribe:{channel}"));
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.record(format!("unsubscribe:{channel}"));
        Ok(())
    }

    async fn run_loop(&self, sink: &dyn FeedSink) -> Result<()> {
        let next = self.sessions.lock().unwrap().pop_front();
        let last = self.sessions.lock().unwrap().is_empty();

        self.connected.store(true, Ordering::SeqCst);
        self.calls.lock().unwrap().push("connect".to_string());
        sink.on_connect().await;

        for record in next.unwrap_or_default() {
            sink.on_record(record).await;
        }

        if last {
            self.closed.notified().await;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.closed.notify_waiters();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// An [`Exchange`] that acknowledges every order and serves a fixed book.
#[derive(Default)]
pub struct StaticExchange {
    pub book: Mutex<BookLevels>,
    pub fills: Mutex<Vec<Fill>>,
    pub cancelled: Mutex<Vec<u64>>,
    next_id: Mutex<u64>,
}

impl StaticExchange {
    pub fn with_book(book: BookLevels) -> Self {
        Self {
            book: Mutex::new(book),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Exchange for StaticExchange {
    async fn place(&self, request: &OrderRequest) -> ExchangeResult<OrderResult> {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(OrderResult {
            id: *id,
            pair: request.pair.clone(),
            side: request.side,
            rate: request.rate,
            amount: request.amount,
            stop_rate: request.stop_rate,
        })
    }

    async fn cancel(&self, order_id: u64) -> ExchangeResult<()> {
        self.cancelled.lock().unwrap().push(order_id);
        Ok(())
    }

    async fn list_open(&self, _pair: Option<&str>) -> ExchangeResult<Vec<OrderResult>> {
        Ok(Vec::new())
    }

    async fn fetch_trades(&self, _pair: &str, since: Option<u64>) -> ExchangeResult<Vec<Fill>> {
        Ok(self
            .fills
            .lock()
            .unwrap()
            .iter()
            .filter(|f| since.is_none_or(|s| f.trade.id > s))
            .cloned()
            .collect())
    }

    async fn order_book(&self, _pair: &str) -> ExchangeResult<BookLevels> {
        Ok(self.book.lock().unwrap().clone())
    }
}
