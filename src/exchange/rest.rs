//! Signed REST client for the exchange's order and account endpoints.

use async_trait::async_trait;
use reqwest::{Method, Url};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::auth::{next_nonce, sign};
use super::{Exchange, ExchangeError, ExchangeResult, OrderRequest};
use crate::models::{BookLevels, Fill, OrderResult, PairSpec, Side, TradeExecution};
use crate::websocket::normalize;

const ORDER_BOOKS_PATH: &str = "/api/order_books";
const ORDERS_PATH: &str = "/api/exchange/orders";
const OPEN_ORDERS_PATH: &str = "/api/exchange/orders/opens";
const TRANSACTIONS_PATH: &str = "/api/exchange/orders/transactions_pagination";

/// Page size requested from the transactions endpoint.
const TRANSACTIONS_LIMIT: u32 = 100;

struct Credentials {
    key: String,
    secret: String,
}

/// HTTP implementation of [`Exchange`].
pub struct RestExchange {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl RestExchange {
    /// Creates a client for public endpoints only.
    ///
    /// # Errors
    ///
    /// Returns [`ExchangeError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> ExchangeResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("coinfeed/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: None,
        })
    }

    /// Enables private endpoints.
    #[must_use]
    pub fn with_credentials(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            key: key.into(),
            secret: secret.into(),
        });
        self
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> ExchangeResult<Url> {
        let raw = format!("{}{path}", self.base_url);
        let url = if query.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, query)
        };
        url.map_err(|e| ExchangeError::Decode(format!("invalid url {raw}: {e}")))
    }

    async fn public_get(&self, path: &str, query: &[(&str, String)]) -> ExchangeResult<Value> {
        let url = self.url(path, query)?;
        debug!(%url, "GET");
        Ok(self.client.get(url).send().await?.json().await?)
    }

    async fn private(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
        operation: &'static str,
    ) -> ExchangeResult<Value> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(ExchangeError::MissingCredentials(operation))?;
        let url = self.url(path, query)?;
        let body = body.map(|b| b.to_string()).unwrap_or_default();

        let nonce = next_nonce().to_string();
        let signature = sign(&credentials.secret, &format!("{nonce}{url}{body}"))?;
        debug!(%method, %url, operation, "Signed request");

        let mut request = self
            .client
            .request(method, url)
            .header("ACCESS-KEY", &credentials.key)
            .header("ACCESS-NONCE", nonce)
            .header("ACCESS-SIGNATURE", signature);
        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }
        Ok(request.send().await?.json().await?)
    }
}

/// Unwraps the `{"success": bool, "error": ...}` envelope.
fn check_success(body: Value, context: impl FnOnce() -> String) -> ExchangeResult<Value> {
    if body.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(body);
    }
    let reason = match body.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "unknown error".to_string(),
    };
    Err(ExchangeError::Rejected {
        reason,
        context: context(),
    })
}

fn decode<T>(result: crate::Result<T>) -> ExchangeResult<T> {
    result.map_err(|e| ExchangeError::Decode(e.to_string()))
}

fn field<'a>(value: &'a Value, name: &str) -> ExchangeResult<&'a Value> {
    value
        .get(name)
        .ok_or_else(|| ExchangeError::Decode(format!("missing field {name} in {value}")))
}

fn optional_decimal(value: &Value, name: &str) -> ExchangeResult<Option<Decimal>> {
    match value.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => decode(normalize::decimal(v)).map(Some),
    }
}

fn text<'a>(value: &'a Value, name: &str) -> ExchangeResult<&'a str> {
    field(value, name)?
        .as_str()
        .ok_or_else(|| ExchangeError::Decode(format!("field {name} is not a string")))
}

/// Parses `buy`, `sell`, `market_buy` or `market_sell`.
fn order_side(order_type: &str) -> ExchangeResult<Side> {
    let side = order_type.strip_prefix("market_").unwrap_or(order_type);
    Side::parse(side)
        .ok_or_else(|| ExchangeError::Decode(format!("unknown order type {order_type}")))
}

/// Decodes a placement acknowledgement or an open-order entry.
fn order_result(value: &Value) -> ExchangeResult<OrderResult> {
    let amount = ["amount", "pending_amount", "market_buy_amount", "pending_market_buy_amount"]
        .into_iter()
        .find_map(|name| optional_decimal(value, name).transpose())
        .transpose()?
        .unwrap_or_default();

    Ok(OrderResult {
        id: decode(normalize::integer(field(value, "id")?))?,
        pair: text(value, "pair")?.to_string(),
        side: order_side(text(value, "order_type")?)?,
        rate: optional_decimal(value, "rate")?,
        amount,
        stop_rate: optional_decimal(value, "stop_loss_rate")?,
    })
}

/// Decodes an account transaction. The executed amount is the absolute
/// change of the base currency balance.
fn fill(value: &Value) -> ExchangeResult<Fill> {
    let pair = text(value, "pair")?;
    let base = pair.split('_').next().unwrap_or(pair);
    let funds = field(field(value, "funds")?, base)?;

    Ok(Fill {
        order_id: decode(normalize::integer(field(value, "order_id")?))?,
        trade: TradeExecution {
            id: decode(normalize::integer(field(value, "id")?))?,
            pair: pair.to_string(),
            rate: decode(normalize::decimal(field(value, "rate")?))?,
            amount: decode(normalize::decimal(funds))?.abs(),
            side: order_side(text(value, "side")?)?,
        },
    })
}

fn list<'a>(body: &'a Value, name: &str) -> ExchangeResult<&'a Vec<Value>> {
    field(body, name)?
        .as_array()
        .ok_or_else(|| ExchangeError::Decode(format!("field {name} is not an array")))
}

/// Builds the order body, rounding with the pair's rules when known.
fn order_body(request: &OrderRequest) -> Value {
    let spec = PairSpec::for_pair(&request.pair);
    let price = |p: Decimal| spec.map_or(p, |s| s.round_price(p)).to_string();
    let amount = spec
        .map_or(request.amount, |s| s.round_amount(request.amount))
        .to_string();

    let mut body = json!({ "pair": request.pair });
    match request.rate {
        Some(rate) => {
            body["order_type"] = json!(request.side.as_str());
            body["rate"] = json!(price(rate));
            body["amount"] = json!(amount);
        }
        None => {
            body["order_type"] = json!(format!("market_{}", request.side.as_str()));
            match request.side {
                Side::Buy => body["market_buy_amount"] = json!(amount),
                Side::Sell => body["amount"] = json!(amount),
            }
        }
    }
    if let Some(stop) = request.stop_rate {
        body["stop_loss_rate"] = json!(price(stop));
    }
    body
}

#[async_trait]
impl Exchange for RestExchange {
    async fn place(&self, request: &OrderRequest) -> ExchangeResult<OrderResult> {
        let body = order_body(request);
        let response = self
            .private(Method::POST, ORDERS_PATH, &[], Some(body), "place")
            .await?;
        let response = check_success(response, || {
            format!(
                "orders with {} {} {} {:?} {:?}",
                request.pair, request.side, request.amount, request.rate, request.stop_rate
            )
        })?;

        let mut result = order_result(&response)?;
        if result.amount.is_zero() {
            result.amount = request.amount;
        }
        info!(order_id = result.id, pair = result.pair, side = %result.side, "Order placed");
        Ok(result)
    }

    async fn cancel(&self, order_id: u64) -> ExchangeResult<()> {
        let path = format!("{ORDERS_PATH}/{order_id}");
        let response = self
            .private(Method::DELETE, &path, &[], None, "cancel")
            .await?;
        check_success(response, || format!("cancel with {order_id}"))?;
        info!(order_id, "Order cancelled");
        Ok(())
    }

    async fn list_open(&self, pair: Option<&str>) -> ExchangeResult<Vec<OrderResult>> {
        let response = self
            .private(Method::GET, OPEN_ORDERS_PATH, &[], None, "list_open")
            .await?;
        let response = check_success(response, || "orders_opens".to_string())?;

        let orders = list(&response, "orders")?
            .iter()
            .map(order_result)
            .collect::<ExchangeResult<Vec<_>>>()?;
        Ok(orders
            .into_iter()
            .filter(|o| pair.is_none_or(|p| o.pair == p))
            .collect())
    }

    async fn fetch_trades(&self, pair: &str, since: Option<u64>) -> ExchangeResult<Vec<Fill>> {
        let mut query = vec![("limit", TRANSACTIONS_LIMIT.to_string())];
        if let Some(since) = since {
            query.push(("ending_before", since.to_string()));
        }
        let response = self
            .private(Method::GET, TRANSACTIONS_PATH, &query, None, "fetch_trades")
            .await?;
        let response = check_success(response, || "transactions".to_string())?;

        let mut fills = Vec::new();
        for entry in list(&response, "data")? {
            if entry.get("pair").and_then(Value::as_str) == Some(pair) {
                fills.push(fill(entry)?);
            }
        }
        Ok(fills)
    }

    async fn order_book(&self, pair: &str) -> ExchangeResult<BookLevels> {
        let body = self
            .public_get(ORDER_BOOKS_PATH, &[("pair", pair.to_string())])
            .await?;
        decode(normalize::parse_book(&body))
    }

    fn can_trade(&self) -> bool {
        self.credentials.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejected_envelope_carries_reason_and_context() {
        let body = json!({"success": false, "error": "Amount is too small"});
        let err = check_success(body, || "orders with btc_jpy".to_string()).unwrap_err();
        assert_eq!(err.to_string(), "Amount is too small in orders with btc_jpy");
    }

    #[test]
    fn decodes_placement_response() {
        let body = json!({
            "success": true, "id": 12345, "rate": "30010.0", "amount": "1.3",
            "order_type": "sell", "stop_loss_rate": null, "pair": "btc_jpy"
        });
        let result = order_result(&body).unwrap();
        assert_eq!(result.id, 12345);
        assert_eq!(result.side, Side::Sell);
        assert_eq!(result.rate, Some(dec!(30010.0)));
        assert_eq!(result.amount, dec!(1.3));
        assert_eq!(result.stop_rate, None);
    }

    #[test]
    fn decodes_open_market_order() {
        let body = json!({
            "id": 202836, "order_type": "market_buy", "rate": null, "pair": "btc_jpy",
            "pending_amount": null, "pending_market_buy_amount": "1000"
        });
        let result = order_result(&body).unwrap();
        assert_eq!(result.side, Side::Buy);
        assert_eq!(result.rate, None);
        assert_eq!(result.amount, dec!(1000));
    }

    #[test]
    fn fill_amount_is_absolute_base_funds() {
        let body = json!({
            "id": 38, "order_id": 49, "pair": "btc_jpy", "rate": "40900.0",
            "funds": {"btc": "-0.1", "jpy": "4096.135"}, "side": "sell"
        });
        let fill = fill(&body).unwrap();
        assert_eq!(fill.order_id, 49);
        assert_eq!(fill.trade.id, 38);
        assert_eq!(fill.trade.amount, dec!(0.1));
        assert_eq!(fill.trade.side, Side::Sell);
    }

    #[test]
    fn market_buy_body_uses_market_buy_amount() {
        let body = order_body(&OrderRequest::market("btc_jpy", Side::Buy, dec!(0.123456789)));
        assert_eq!(body["order_type"], "market_buy");
        assert_eq!(body["market_buy_amount"], "0.12345679");
        assert!(body.get("rate").is_none());
    }

    #[test]
    fn limit_body_truncates_price() {
        let request = OrderRequest::limit("btc_jpy", Side::Sell, dec!(0.01), dec!(4500000.7))
            .with_stop(dec!(4400000.9));
        let body = order_body(&request);
        assert_eq!(body["order_type"], "sell");
        assert_eq!(body["rate"], "4500000");
        assert_eq!(body["stop_loss_rate"], "4400000");
        assert_eq!(body["amount"], "0.01");
    }

    #[tokio::test]
    async fn private_call_without_credentials_fails_fast() {
        let exchange = RestExchange::new("https://coincheck.com").unwrap();
        assert!(!exchange.can_trade());
        let err = exchange.cancel(1).await.unwrap_err();
        assert!(matches!(err, ExchangeError::MissingCredentials("cancel")));
    }
}
