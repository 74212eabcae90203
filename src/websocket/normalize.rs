//! Decoding of exchange wire messages into normalized feed records.
//!
//! Both protocols carry the same payloads:
//! - a trade as `[id, pair, rate, amount, side]` (a leading timestamp and
//!   trailing order ids are tolerated),
//! - a batch of trades as an array of such arrays,
//! - an order-book diff as `[pair, {"bids": [[price, size], ...], "asks": [...]}]`.
//!
//! Numbers may arrive either as JSON strings or JSON numbers.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::models::{BookLevels, Channel, FeedPayload, FeedRecord, PriceLevel, Side, TradeExecution};
use crate::{CoinfeedError, Result};

fn malformed(what: impl Into<String>) -> CoinfeedError {
    CoinfeedError::MalformedMessage(what.into())
}

/// Parses a decimal from a JSON string or number.
pub fn decimal(value: &Value) -> Result<Decimal> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(malformed(format!("expected decimal, got {other}"))),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| malformed(format!("invalid decimal {text:?}: {e}")))
}

/// Parses an unsigned id from a JSON string or number.
pub fn integer(value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| malformed(format!("expected unsigned id, got {n}"))),
        Value::String(s) => s
            .parse()
            .map_err(|e| malformed(format!("invalid id {s:?}: {e}"))),
        other => Err(malformed(format!("expected id, got {other}"))),
    }
}

fn text(value: &Value) -> Result<&str> {
    value
        .as_str()
        .ok_or_else(|| malformed(format!("expected string, got {value}")))
}

/// Returns `true` if `value` looks like a pair name rather than a number.
fn is_pair(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.contains('_') && s.parse::<f64>().is_err())
}

/// Parses one trade array.
pub fn parse_trade(fields: &[Value]) -> Result<TradeExecution> {
    // Newer frames prefix a timestamp: [ts, id, pair, rate, amount, side, ...].
    let fields = match fields {
        [_, _, pair, ..] if fields.len() >= 6 && is_pair(pair) => &fields[1..],
        _ => fields,
    };
    let [id, pair, rate, amount, side, ..] = fields else {
        return Err(malformed(format!("trade has {} fields", fields.len())));
    };
    let side_name = text(side)?;
    let side = Side::parse(side_name)
        .ok_or_else(|| malformed(format!("unknown trade side {side_name:?}")))?;

    Ok(TradeExecution {
        id: integer(id)?,
        pair: text(pair)?.to_string(),
        rate: decimal(rate)?,
        amount: decimal(amount)?,
        side,
    })
}

fn parse_levels(value: Option<&Value>) -> Result<Vec<PriceLevel>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let entries = value
        .as_array()
        .ok_or_else(|| malformed("book side is not an array"))?;
    entries
        .iter()
        .map(|entry| match entry.as_array().map(Vec::as_slice) {
            Some([price, size, ..]) => Ok(PriceLevel::new(decimal(price)?, decimal(size)?)),
            _ => Err(malformed(format!("invalid book level {entry}"))),
        })
        .collect()
}

/// Parses a `{"bids": [...], "asks": [...]}` object. Missing sides are empty.
pub fn parse_book(value: &Value) -> Result<BookLevels> {
    if !value.is_object() {
        return Err(malformed("book payload is not an object"));
    }
    Ok(BookLevels::new(
        parse_levels(value.get("bids"))?,
        parse_levels(value.get("asks"))?,
    ))
}

/// Normalizes an order-book message `[pair, {bids, asks}]` into a diff.
pub fn parse_orderbook_message(value: &Value) -> Result<FeedRecord> {
    match value.as_array().map(Vec::as_slice) {
        Some([pair, book]) => Ok(FeedRecord::new(
            Channel::OrderBook.key(text(pair)?),
            FeedPayload::OrderBookDiff(parse_book(book)?),
        )),
        _ => Err(malformed("orderbook message is not [pair, book]")),
    }
}

/// Parses a non-empty array of trade arrays.
fn parse_trade_batch(items: &[Value]) -> Result<Vec<TradeExecution>> {
    items
        .iter()
        .map(|item| {
            item.as_array()
                .ok_or_else(|| malformed("trade batch entry is not an array"))
                .and_then(|fields| parse_trade(fields))
        })
        .collect()
}

/// Normalizes a trade message into either a single trade or a batch,
/// routing batches to `batch_channel`.
pub fn parse_trades_message(value: &Value, batch_channel: Channel) -> Result<FeedRecord> {
    let items = value
        .as_array()
        .ok_or_else(|| malformed("trade message is not an array"))?;

    if items.first().is_some_and(Value::is_array) {
        let trades = parse_trade_batch(items)?;
        let pair = trades[0].pair.clone();
        return Ok(FeedRecord::new(
            batch_channel.key(&pair),
            FeedPayload::TradeBatch(trades),
        ));
    }

    let trade = parse_trade(items)?;
    Ok(FeedRecord::new(
        Channel::Trades.key(&trade.pair),
        FeedPayload::Trade(trade),
    ))
}

/// Normalizes a frame of the raw WebSocket protocol.
///
/// Returns `Ok(None)` for frames that carry no feed data.
pub fn parse_raw_frame(text: &str) -> Result<Option<FeedRecord>> {
    let value: Value = serde_json::from_str(text)?;
    let Some(items) = value.as_array() else {
        return Ok(None);
    };

    match items.as_slice() {
        [] => Ok(None),
        [_, book] if book.is_object() => parse_orderbook_message(&value).map(Some),
        _ => parse_trades_message(&value, Channel::Trades).map(Some),
    }
}

/// Normalizes a Socket.IO event emitted by the event protocol.
///
/// Returns `Ok(None)` for events that carry no feed data.
pub fn parse_event(name: &str, data: &Value) -> Result<Option<FeedRecord>> {
    match name {
        "trades" => parse_trades_message(data, Channel::TradesV2).map(Some),
        "orderbook" => parse_orderbook_message(data).map(Some),
        _ => Ok(None),
    }
}

/// An Engine.IO v4 packet carrying a Socket.IO v5 packet where applicable.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Transport handshake (`0{...}`); the client must connect the namespace.
    Open,
    /// Transport close (`1`).
    Close,
    /// Server heartbeat (`2`); must be answered with a pong.
    Ping,
    /// Heartbeat answer (`3`).
    Pong,
    /// Namespace connected (`40`).
    Connect,
    /// Namespace disconnected by the server (`41`).
    Disconnect,
    /// Event (`42["name", data]`).
    Event { name: String, data: Value },
    /// Namespace connection refused (`44`).
    ConnectError(String),
    /// Anything else (upgrades, acks, binary placeholders).
    Other(String),
}

/// Engine.IO pong frame.
pub const PONG_FRAME: &str = "3";

/// Socket.IO namespace connect frame.
pub const CONNECT_FRAME: &str = "40";

/// Encodes a Socket.IO event frame, e.g. `42["subscribe","btc_jpy-trades"]`.
///
/// # Errors
///
/// Returns [`CoinfeedError::Json`] if `data` cannot be serialized.
pub fn encode_event(name: &str, data: &Value) -> Result<String> {
    let payload = serde_json::to_string(&serde_json::json!([name, data]))?;
    Ok(format!("42{payload}"))
}

/// Decodes an Engine.IO text frame.
///
/// # Errors
///
/// Returns [`CoinfeedError::MalformedMessage`] for empty frames and events
/// whose payload is not `["name", ...]`.
pub fn parse_engine_packet(frame: &str) -> Result<EnginePacket> {
    let mut chars = frame.chars();
    let Some(engine_type) = chars.next() else {
        return Err(malformed("empty engine.io frame"));
    };

    let packet = match engine_type {
        '0' => EnginePacket::Open,
        '1' => EnginePacket::Close,
        '2' => EnginePacket::Ping,
        '3' => EnginePacket::Pong,
        '4' => {
            let body = chars.as_str();
            match body.chars().next() {
                Some('0') => EnginePacket::Connect,
                Some('1') => EnginePacket::Disconnect,
                Some('2') => parse_event_body(&body[1..])?,
                Some('4') => EnginePacket::ConnectError(body[1..].to_string()),
                _ => EnginePacket::Other(frame.to_string()),
            }
        }
        _ => EnginePacket::Other(frame.to_string()),
    };
    Ok(packet)
}

/// Parses `[/namespace,][ack id]["name", data]`.
fn parse_event_body(body: &str) -> Result<EnginePacket> {
    let start = body
        .find('[')
        .ok_or_else(|| malformed(format!("event without payload: {body}")))?;
    let payload: Value = serde_json::from_str(&body[start..])?;

    match payload.as_array().map(Vec::as_slice) {
        Some([Value::String(name), data, ..]) => Ok(EnginePacket::Event {
            name: name.clone(),
            data: data.clone(),
        }),
        Some([Value::String(name)]) => Ok(EnginePacket::Event {
            name: name.clone(),
            data: Value::Null,
        }),
        _ => Err(malformed(format!("event payload is not [name, data]: {payload}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn raw_trade_frame_becomes_single_trade() {
        let record = parse_raw_frame(r#"[2357062, "btc_jpy", "148638.0", "5.0", "buy"]"#)
            .unwrap()
            .unwrap();

        assert_eq!(record.channel, "btc_jpy-trades");
        let FeedPayload::Trade(trade) = record.payload else {
            panic!("expected trade, got {record:?}");
        };
        assert_eq!(trade.id, 2357062);
        assert_eq!(trade.rate, dec!(148638.0));
        assert_eq!(trade.amount, dec!(5.0));
        assert_eq!(trade.side, Side::Buy);
    }

    #[test]
    fn raw_batch_with_timestamp_prefix_becomes_batch() {
        let frame = r#"[
            ["1663318663", "2357062", "btc_jpy", "2820896.0", "5.0", "sell", "1193401", "2078767"],
            ["1663318663", "2357063", "btc_jpy", "2820895.0", "0.17", "sell", "1193401", "2078767"]
        ]"#;
        let record = parse_raw_frame(frame).unwrap().unwrap();

        assert_eq!(record.channel, "btc_jpy-trades");
        let FeedPayload::TradeBatch(trades) = record.payload else {
            panic!("expected batch");
        };
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].id, 2357063);
        assert_eq!(trades[1].amount, dec!(0.17));
        assert_eq!(trades[1].side, Side::Sell);
    }

    #[test]
    fn raw_orderbook_frame_becomes_diff() {
        let frame = concat!(
            r#"["btc_jpy", {"bids": [["148634.0", "0"], ["148633.0", "0.0235"]], "#,
            r#""asks": [["148642.0", "1.5"]]}]"#,
        );
        let record = parse_raw_frame(frame).unwrap().unwrap();

        assert_eq!(record.channel, "btc_jpy-orderbook");
        assert_eq!(
            record.payload,
            FeedPayload::OrderBookDiff(BookLevels::new(
                vec![
                    PriceLevel::new(dec!(148634.0), dec!(0)),
                    PriceLevel::new(dec!(148633.0), dec!(0.0235)),
                ],
                vec![PriceLevel::new(dec!(148642.0), dec!(1.5))],
            ))
        );
    }

    #[test]
    fn non_array_frames_are_ignored() {
        assert!(parse_raw_frame(r#"{"type": "heartbeat"}"#).unwrap().is_none());
        assert!(parse_raw_frame("[]").unwrap().is_none());
    }

    #[test]
    fn malformed_trade_is_an_error() {
        let err = parse_raw_frame(r#"[1, "btc_jpy", "abc", "1", "buy"]"#).unwrap_err();
        assert!(matches!(err, CoinfeedError::MalformedMessage(_)));

        let err = parse_raw_frame(r#"[1, "btc_jpy", "1", "1", "hold"]"#).unwrap_err();
        assert!(err.to_string().contains("hold"));
    }

    #[test]
    fn event_batch_routes_to_v2_channel() {
        let data = json!([[1, "eth_jpy", "300000", "0.5", "buy"]]);
        let record = parse_event("trades", &data).unwrap().unwrap();
        assert_eq!(record.channel, "eth_jpy-trades-v2");

        let single = json!([2, "eth_jpy", 300001, 0.25, "sell"]);
        let record = parse_event("trades", &single).unwrap().unwrap();
        assert_eq!(record.channel, "eth_jpy-trades");
    }

    #[test]
    fn unknown_events_are_ignored() {
        assert!(parse_event("ticker", &json!({})).unwrap().is_none());
    }

    #[test]
    fn engine_packets_decode() {
        assert_eq!(
            parse_engine_packet(r#"0{"sid":"x","pingInterval":25000}"#).unwrap(),
            EnginePacket::Open
        );
        assert_eq!(parse_engine_packet("2").unwrap(), EnginePacket::Ping);
        assert_eq!(parse_engine_packet(r#"40{"sid":"y"}"#).unwrap(), EnginePacket::Connect);
        assert_eq!(parse_engine_packet("41").unwrap(), EnginePacket::Disconnect);
        assert_eq!(
            parse_engine_packet(r#"42["orderbook",["btc_jpy",{"bids":[],"asks":[]}]]"#).unwrap(),
            EnginePacket::Event {
                name: "orderbook".to_string(),
                data: json!(["btc_jpy", {"bids": [], "asks": []}]),
            }
        );
        assert!(matches!(parse_engine_packet("6").unwrap(), EnginePacket::Other(_)));
        assert!(parse_engine_packet("").is_err());
    }

    #[test]
    fn subscribe_event_encodes() {
        let frame = encode_event("subscribe", &json!("btc_jpy-trades")).unwrap();
        assert_eq!(frame, r#"42["subscribe","btc_jpy-trades"]"#);
    }
}
