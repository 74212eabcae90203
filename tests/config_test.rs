//! Configuration loading tests.

use std::sync::Mutex;
use std::time::Duration;

use coinfeed::CoinfeedError;
use coinfeed::config::{DEFAULT_SOCKETIO_URL, Protocol, fetch_config};
use coinfeed::models::PairSpec;

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

/// Runs `f` with exactly `vars` set among the `COINFEED_*` variables.
fn with_env<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
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
    // SAFETY: as above.
    unsafe {
        for k in ALL_VARS {
            std::env::remove_var(k);
        }
    }
}

#[test]
fn test_full_environment_is_loaded() {
    with_env(
        &[
            ("COINFEED_SOCKETIO_URL", "wss://example.test/socket.io/?EIO=4&transport=websocket"),
            ("COINFEED_REST_URL", "https://example.test"),
            ("COINFEED_PROTOCOL", "socketio"),
            ("COINFEED_API_KEY", "key"),
            ("COINFEED_API_SECRET", "secret"),
            ("COINFEED_PAIR", "BTC_JPY"),
            ("COINFEED_INTERVAL_SECS", "0"),
            ("COINFEED_MINIMUM_INTERVAL_SECS", "5"),
            ("COINFEED_TRADES_CAPACITY", "100"),
            ("COINFEED_ENABLE_BOARD", "true"),
        ],
        || {
            let config = fetch_config().unwrap();
            assert_eq!(config.coincheck.protocol, Protocol::SocketIo);
            assert_eq!(
                config.coincheck.feed_url(),
                "wss://example.test/socket.io/?EIO=4&transport=websocket"
            );
            assert_eq!(config.coincheck.rest_url, "https://example.test");
            assert_eq!(config.coincheck.credentials(), Some(("key", "secret")));
            assert_eq!(config.trading.pair, "btc_jpy");
            assert_eq!(config.trading.spec, PairSpec::new(0, 8));
            assert_eq!(config.trading.interval, Duration::ZERO);
            assert_eq!(config.trading.minimum_interval, Some(Duration::from_secs(5)));
            assert_eq!(config.trading.trades_capacity, 100);
            assert!(config.trading.enable_board);
        },
    );
}

#[test]
fn test_empty_values_fall_back_to_defaults() {
    with_env(
        &[
            ("COINFEED_PROTOCOL", "socket.io"),
            ("COINFEED_SOCKETIO_URL", ""),
            ("COINFEED_API_KEY", ""),
            ("COINFEED_MINIMUM_INTERVAL_SECS", "0"),
        ],
        || {
            let config = fetch_config().unwrap();
            assert_eq!(config.coincheck.feed_url(), DEFAULT_SOCKETIO_URL);
            assert!(config.coincheck.credentials().is_none());
            assert!(config.trading.minimum_interval.is_none());
        },
    );
}

#[test]
fn test_secret_without_key_is_rejected() {
    with_env(&[("COINFEED_API_SECRET", "secret-only")], || {
        let err = fetch_config().unwrap_err();
        assert!(err.to_string().contains("COINFEED_API_KEY is missing"));
    });
}

#[test]
fn test_zero_capacity_is_rejected() {
    with_env(&[("COINFEED_TRADES_CAPACITY", "0")], || {
        assert!(matches!(fetch_config(), Err(CoinfeedError::Config(_))));
    });
}

#[test]
fn test_pairs_without_rounding_rules_are_rejected() {
    for pair in ["eth_jpy", "doge_usd"] {
        with_env(&[("COINFEED_PAIR", pair)], || {
            assert!(matches!(fetch_config(), Err(CoinfeedError::Config(_))));
        });
    }
}

#[test]
fn test_invalid_values_are_rejected() {
    for (name, value) in [
        ("COINFEED_ENABLE_BOARD", "yes"),
        ("COINFEED_PROTOCOL", "grpc"),
        ("COINFEED_TRADES_CAPACITY", "-5"),
        ("COINFEED_MINIMUM_INTERVAL_SECS", "1.5"),
    ] {
        with_env(&[(name, value)], || {
            let err = fetch_config().unwrap_err();
            assert!(
                matches!(err, CoinfeedError::Config(_)),
                "{name}={value} gave {err:?}"
            );
        });
    }
}
