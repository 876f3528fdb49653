//! Relay configuration
//!
//! Read once at startup from environment variables (a `.env` file is
//! honoured). Unset or empty variables fall back to defaults.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use market_data::audit::DEFAULT_AUDIT_CAPACITY;
use market_data::ingestion::{DEFAULT_CHANNEL, DEFAULT_UPSTREAM_URL, IngestConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// HTTP/WebSocket listen address.
    pub bind_addr: SocketAddr,
    /// Upstream exchange WebSocket URL.
    pub upstream_url: String,
    /// Upstream order book channel.
    pub channel: String,
    /// Allowed CORS origin; permissive when unset.
    pub frontend_origin: Option<String>,
    pub audit_capacity: usize,
    /// Bounded wait for the upstream close handshake.
    pub close_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            frontend_origin: None,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let bind_addr = match get("RELAY_BIND_ADDR") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid RELAY_BIND_ADDR: {raw}"))?,
            None => defaults.bind_addr,
        };

        let upstream_url = get("BITSTAMP_WS_URL").unwrap_or(defaults.upstream_url);
        if !(upstream_url.starts_with("ws://") || upstream_url.starts_with("wss://")) {
            bail!("BITSTAMP_WS_URL must be a ws:// or wss:// URL, got {upstream_url}");
        }

        let audit_capacity = match get("AUDIT_LOG_CAPACITY") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid AUDIT_LOG_CAPACITY: {raw}"))?,
            None => defaults.audit_capacity,
        };

        let close_timeout = match get("UPSTREAM_CLOSE_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(
                raw.trim()
                    .parse()
                    .with_context(|| format!("invalid UPSTREAM_CLOSE_TIMEOUT_MS: {raw}"))?,
            ),
            None => defaults.close_timeout,
        };

        Ok(Self {
            bind_addr,
            upstream_url,
            channel: get("BITSTAMP_CHANNEL").unwrap_or(defaults.channel),
            frontend_origin: get("FRONTEND_APP_URL"),
            audit_capacity,
            close_timeout,
        })
    }

    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            url: self.upstream_url.clone(),
            channel: self.channel.clone(),
            close_timeout: self.close_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.upstream_url, "wss://ws.bitstamp.net");
        assert_eq!(config.channel, "order_book_btceur");
        assert_eq!(config.audit_capacity, 50);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("RELAY_BIND_ADDR", "127.0.0.1:9000"),
            ("BITSTAMP_WS_URL", "ws://localhost:7000"),
            ("BITSTAMP_CHANNEL", "order_book_btcusd"),
            ("FRONTEND_APP_URL", "http://localhost:3000"),
            ("AUDIT_LOG_CAPACITY", "10"),
            ("UPSTREAM_CLOSE_TIMEOUT_MS", "250"),
        ]))
        .unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.frontend_origin.as_deref(), Some("http://localhost:3000"));
        assert_eq!(config.audit_capacity, 10);

        let ingest = config.ingest_config();
        assert_eq!(ingest.url, "ws://localhost:7000");
        assert_eq!(ingest.channel, "order_book_btcusd");
        assert_eq!(ingest.close_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_empty_values_fall_back() {
        let config = RelayConfig::from_lookup(lookup(&[("FRONTEND_APP_URL", " ")])).unwrap();
        assert!(config.frontend_origin.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(RelayConfig::from_lookup(lookup(&[("RELAY_BIND_ADDR", "nowhere")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[("AUDIT_LOG_CAPACITY", "-1")])).is_err());
        assert!(RelayConfig::from_lookup(lookup(&[("BITSTAMP_WS_URL", "http://x")])).is_err());
    }
}
