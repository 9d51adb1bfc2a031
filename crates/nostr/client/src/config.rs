//! Client configuration.
//!
//! `RelayClientConfig::default()` reads `RELAY_CLIENT_*` environment variables
//! and falls back to built-in values; `RelayClientConfig::new()` never touches
//! the environment.

use std::time::Duration;
use tracing::warn;

/// Default relays for the badge app.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_OK_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(12);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(12);

/// Relay client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayClientConfig {
    /// WebSocket handshake budget
    pub connect_timeout: Duration,
    /// Budget for the OK answering an EVENT
    pub ok_timeout: Duration,
    /// Budget for an AUTH challenge and for the OK answering an AUTH event
    pub auth_timeout: Duration,
    /// Budget for the EVENT/EOSE/CLOSED answering a REQ
    pub query_timeout: Duration,
    /// Drop received events whose id or signature does not verify
    pub verify_events: bool,
    /// Relays used by `publish_to_default`
    pub default_relays: Vec<String>,
}

impl RelayClientConfig {
    /// Built-in defaults, ignoring the environment.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ok_timeout: DEFAULT_OK_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            verify_events: true,
            default_relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Defaults overridden by `RELAY_CLIENT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::new();
        Self {
            connect_timeout: env_duration_ms(
                "RELAY_CLIENT_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            ),
            ok_timeout: env_duration_ms("RELAY_CLIENT_OK_TIMEOUT_MS", defaults.ok_timeout),
            auth_timeout: env_duration_ms("RELAY_CLIENT_AUTH_TIMEOUT_MS", defaults.auth_timeout),
            query_timeout: env_duration_ms(
                "RELAY_CLIENT_QUERY_TIMEOUT_MS",
                defaults.query_timeout,
            ),
            verify_events: std::env::var("RELAY_CLIENT_VERIFY_EVENTS")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.verify_events),
            default_relays: std::env::var("RELAY_CLIENT_RELAYS")
                .ok()
                .map(|v| parse_relay_list(&v))
                .filter(|relays| !relays.is_empty())
                .unwrap_or(defaults.default_relays),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_ok_timeout(mut self, timeout: Duration) -> Self {
        self.ok_timeout = timeout;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_verify_events(mut self, verify: bool) -> Self {
        self.verify_events = verify;
        self
    }

    pub fn with_default_relays(mut self, relays: Vec<String>) -> Self {
        self.default_relays = relays;
        self
    }
}

impl Default for RelayClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_duration_ms(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Ok(value) => match value.trim().parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!("Ignoring invalid {}={:?}", name, value);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_relay_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
