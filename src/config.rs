//! Application configuration loaded from environment variables.
//!
//! Every variable is optional:
//! - `COINFEED_WEBSOCKET_URL` - raw WebSocket feed endpoint
//! - `COINFEED_SOCKETIO_URL` - Socket.IO feed endpoint
//! - `COINFEED_REST_URL` - REST API base URL
//! - `COINFEED_API_KEY` / `COINFEED_API_SECRET` - private API credentials,
//!   set both or neither
//! - `COINFEED_PAIR` - traded pair (`btc_jpy`)
//! - `COINFEED_PROTOCOL` - `websocket` or `socketio`
//! - `COINFEED_INTERVAL_SECS` - decision tick interval, `0` ticks on every
//!   trade update
//! - `COINFEED_MINIMUM_INTERVAL_SECS` - minimum spacing of logic entries,
//!   `0` disables
//! - `COINFEED_TRADES_CAPACITY` - trade endpoint ring size
//! - `COINFEED_ENABLE_BOARD` - attach an order book (`true`/`false`)

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::CoinfeedError;
use crate::models::PairSpec;

/// Default raw WebSocket endpoint.
pub const DEFAULT_WEBSOCKET_URL: &str = "wss://ws-api.coincheck.com/";

/// Default Socket.IO endpoint (Engine.IO v4, WebSocket transport).
pub const DEFAULT_SOCKETIO_URL: &str =
    "wss://ws.coincheck.com/socket.io/?EIO=4&transport=websocket";

/// Default REST API base URL.
pub const DEFAULT_REST_URL: &str = "https://coincheck.com";

pub const DEFAULT_PAIR: &str = "btc_jpy";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TRADES_CAPACITY: usize = 5000;

/// Feed wire protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    WebSocket,
    SocketIo,
}

impl FromStr for Protocol {
    type Err = CoinfeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Protocol::WebSocket),
            "socketio" | "socket.io" => Ok(Protocol::SocketIo),
            other => Err(CoinfeedError::Config(format!(
                "COINFEED_PROTOCOL must be websocket or socketio, got {other:?}"
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::WebSocket => "websocket",
            Protocol::SocketIo => "socketio",
        })
    }
}

/// Top-level application configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub coincheck: CoincheckConfig,
    pub trading: TradingConfig,
}

/// Exchange endpoints and credentials.
#[derive(Debug)]
pub struct CoincheckConfig {
    pub websocket_url: String,
    pub socketio_url: String,
    pub rest_url: String,
    pub protocol: Protocol,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
}

impl CoincheckConfig {
    /// URL of the feed for the configured protocol.
    pub fn feed_url(&self) -> &str {
        match self.protocol {
            Protocol::WebSocket => &self.websocket_url,
            Protocol::SocketIo => &self.socketio_url,
        }
    }

    /// Returns `(key, secret)` when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((self.api_key.as_deref()?, self.api_secret.as_deref()?))
    }
}

/// Trading loop settings.
#[derive(Debug)]
pub struct TradingConfig {
    pub pair: String,
    pub spec: PairSpec,
    pub interval: Duration,
    /// Entries are skipped until a new bucket of this width starts.
    pub minimum_interval: Option<Duration>,
    pub trades_capacity: usize,
    pub enable_board: bool,
}

/// Loads the application configuration from environment variables.
///
/// # Errors
///
/// Returns [`CoinfeedError::Config`] if only one of the two credential
/// variables is set, if a numeric, boolean or protocol value does not
/// parse, or if the pair has no known rounding rules.
pub fn fetch_config() -> crate::Result<AppConfig> {
    let api_key = non_empty_var("COINFEED_API_KEY");
    let api_secret = non_empty_var("COINFEED_API_SECRET");

    match (&api_key, &api_secret) {
        (Some(_), None) => {
            return Err(CoinfeedError::Config(
                "COINFEED_API_KEY is set but COINFEED_API_SECRET is missing".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(CoinfeedError::Config(
                "COINFEED_API_SECRET is set but COINFEED_API_KEY is missing".to_string(),
            ));
        }
        _ => {}
    }

    let protocol: Protocol = non_empty_var("COINFEED_PROTOCOL")
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or_default();

    let pair = non_empty_var("COINFEED_PAIR")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_PAIR.to_string());
    let spec = PairSpec::for_pair(&pair).ok_or_else(|| {
        CoinfeedError::Config(format!("no rounding rules known for pair {pair:?}"))
    })?;

    let interval_secs = parsed_var("COINFEED_INTERVAL_SECS")?.unwrap_or(DEFAULT_INTERVAL_SECS);
    let minimum_interval = parsed_var("COINFEED_MINIMUM_INTERVAL_SECS")?
        .filter(|secs: &u64| *secs > 0)
        .map(Duration::from_secs);
    let trades_capacity =
        parsed_var("COINFEED_TRADES_CAPACITY")?.unwrap_or(DEFAULT_TRADES_CAPACITY);
    if trades_capacity == 0 {
        return Err(CoinfeedError::Config(
            "COINFEED_TRADES_CAPACITY must be positive".to_string(),
        ));
    }
    let enable_board = parsed_var("COINFEED_ENABLE_BOARD")?.unwrap_or(false);

    Ok(AppConfig {
        coincheck: CoincheckConfig {
            websocket_url: non_empty_var("COINFEED_WEBSOCKET_URL")
                .unwrap_or_else(|| DEFAULT_WEBSOCKET_URL.to_string()),
            socketio_url: non_empty_var("COINFEED_SOCKETIO_URL")
                .unwrap_or_else(|| DEFAULT_SOCKETIO_URL.to_string()),
            rest_url: non_empty_var("COINFEED_REST_URL")
                .unwrap_or_else(|| DEFAULT_REST_URL.to_string()),
            protocol,
            api_key,
            api_secret,
        },
        trading: TradingConfig {
            pair,
            spec,
            interval: Duration::from_secs(interval_secs),
            minimum_interval,
            trades_capacity,
            enable_board,
        },
    })
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T>(name: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    non_empty_var(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| CoinfeedError::Config(format!("invalid {name} {raw:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "COINFEED_WEBSOCKET_URL",
        "COINFEED_SOCKETIO_URL",
        "COINFEED_REST_URL",
        "COINFEED_API_KEY",
        "COINFEED_API_SECRET",
        "COINFEED_PAIR",
        "COINFEED_PROTOCOL",
        "COINFEED_INTERVAL_SECS",
        "COINFEED_MINIMUM_INTERVAL_SECS",
        "COINFEED_TRADES_CAPACITY",
        "COINFEED_ENABLE_BOARD",
    ];

    /// Helper that clears every `COINFEED_*` variable, applies `vars`, runs
    /// `f`, then restores the originals.
    fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let originals: Vec<(&str, Option<String>)> = ALL_VARS
            .iter()
            .map(|k| (*k, std::env::var(k).ok()))
            .collect();

        // SAFETY: every env mutation in this binary holds ENV_LOCK.
        unsafe {
            for k in ALL_VARS {
                std::env::remove_var(k);
            }
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
        }

        f();

        for (k, original) in originals {
            // SAFETY: restoring original values under the same lock.
            unsafe {
                match original {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn defaults_without_env_vars() {
        with_env(&[], || {
            let config = fetch_config().unwrap();
            assert_eq!(config.coincheck.feed_url(), DEFAULT_WEBSOCKET_URL);
            assert_eq!(config.coincheck.rest_url, DEFAULT_REST_URL);
            assert!(config.coincheck.credentials().is_none());
            assert_eq!(config.trading.pair, "btc_jpy");
            assert_eq!(config.trading.interval, Duration::from_secs(60));
            assert_eq!(config.trading.trades_capacity, 5000);
            assert!(!config.trading.enable_board);
        });
    }

    #[test]
    fn socketio_protocol_selects_socketio_url() {
        with_env(&[("COINFEED_PROTOCOL", "SocketIO")], || {
            let config = fetch_config().unwrap();
            assert_eq!(config.coincheck.protocol, Protocol::SocketIo);
            assert_eq!(config.coincheck.feed_url(), DEFAULT_SOCKETIO_URL);
        });
    }

    #[test]
    fn rejects_key_without_secret() {
        with_env(&[("COINFEED_API_KEY", "key-only")], || {
            let err = fetch_config().unwrap_err();
            assert!(err.to_string().contains("COINFEED_API_SECRET is missing"));
        });
    }

    #[test]
    fn rejects_unparsable_interval() {
        with_env(&[("COINFEED_INTERVAL_SECS", "soon")], || {
            let err = fetch_config().unwrap_err();
            assert!(err.to_string().contains("COINFEED_INTERVAL_SECS"));
        });
    }

    #[test]
    fn rejects_unknown_pair() {
        with_env(&[("COINFEED_PAIR", "doge_usd")], || {
            assert!(matches!(fetch_config(), Err(CoinfeedError::Config(_))));
        });
    }
}
