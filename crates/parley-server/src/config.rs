//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use parley_shared::constants::DEFAULT_HTTP_PORT;
use parley_shared::token::parse_hex_pubkey;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./parley.db`
    pub database_path: PathBuf,

    /// Ed25519 public key of the access-token issuer (hex-encoded, 64 chars).
    /// Env: `TOKEN_ISSUER_PUBKEY`
    /// Default: all-zeros, which rejects every token (development only).
    pub token_issuer_pubkey: [u8; 32],

    /// Origin allowed by CORS. `None` allows any origin.
    /// Env: `FRONTEND_URL`
    pub frontend_url: Option<String>,

    /// Upper bound on a single store call.
    /// Env: `STORE_TIMEOUT_MS`
    /// Default: 5000
    pub store_timeout: Duration,

    /// Pushes buffered per connection before new ones are dropped.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: 256
    pub outbound_queue_capacity: usize,

    /// Interval between keep-alive pings.
    /// Env: `PING_INTERVAL_SECS`
    /// Default: 30
    pub ping_interval: Duration,

    /// Sustained inbound events per second allowed per connection.
    /// Env: `EVENTS_PER_SEC`
    /// Default: 20
    pub events_per_sec: f64,

    /// Inbound event burst allowed per connection.
    /// Env: `EVENT_BURST`
    /// Default: 40
    pub event_burst: f64,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parley"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./parley.db"),
            token_issuer_pubkey: [0u8; 32],
            frontend_url: None,
            store_timeout: Duration::from_millis(5000),
            outbound_queue_capacity: 256,
            ping_interval: Duration::from_secs(30),
            events_per_sec: 20.0,
            event_burst: 40.0,
            instance_name: "Parley".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(hex_key) = lookup("TOKEN_ISSUER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.token_issuer_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid TOKEN_ISSUER_PUBKEY, using default (rejects all tokens)"
                    );
                }
            }
        }

        if let Some(url) = lookup("FRONTEND_URL") {
            if !url.is_empty() {
                config.frontend_url = Some(url);
            }
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize>(&lookup, "OUTBOUND_QUEUE_CAPACITY") {
            config.outbound_queue_capacity = n.max(1);
        }

        if let Some(secs) = parse_var::<u64>(&lookup, "PING_INTERVAL_SECS") {
            config.ping_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(rate) = parse_var::<f64>(&lookup, "EVENTS_PER_SEC") {
            config.events_per_sec = rate;
        }

        if let Some(burst) = parse_var::<f64>(&lookup, "EVENT_BURST") {
            config.event_burst = burst;
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.token_issuer_pubkey, [0u8; 32]);
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert!(config.frontend_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("TOKEN_ISSUER_PUBKEY", &"ab".repeat(32)),
            ("STORE_TIMEOUT_MS", "250"),
            ("FRONTEND_URL", "http://localhost:5173"),
            ("OUTBOUND_QUEUE_CAPACITY", "0"),
        ]);

        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.token_issuer_pubkey, [0xab; 32]);
        assert_eq!(config.store_timeout, Duration::from_millis(250));
        assert_eq!(config.frontend_url.as_deref(), Some("http://localhost:5173"));
        assert_eq!(config.outbound_queue_capacity, 1);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_from(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("TOKEN_ISSUER_PUBKEY", "abcd"),
            ("EVENTS_PER_SEC", "fast"),
        ]);

        assert_eq!(config.http_addr, ServerConfig::default().http_addr);
        assert_eq!(config.token_issuer_pubkey, [0u8; 32]);
        assert_eq!(config.events_per_sec, 20.0);
    }
}
