use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Upper bound for a single throttling delay.
pub const MAX_THROTTLE_DELAY_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("connector name is required")]
    MissingName,
    #[error("connector {0}: at least one acceptor is required")]
    NoAcceptors(String),
    #[error("connector {connector}: invalid throttling configuration: {reason}")]
    InvalidThrottling { connector: String, reason: String },
}

/// Process-level settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub connector: ConnectorConfig,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connector: ConnectorConfig::default(),
            debug: false,
        }
    }
}

/// Settings for one listening connector.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConnectorConfig {
    pub name: String,
    pub listen_port: u16,
    pub bind_address: IpAddr,
    pub tcp_keep_alive_enabled: bool,
    pub tcp_no_delay: bool,
    pub reuse_address: bool,
    pub accept_queue_size: u32,
    pub acceptors: usize,
    pub drain_timeout_ms: u64,
    pub throttling: ThrottlingConfig,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            listen_port: 8080,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_keep_alive_enabled: true,
            tcp_no_delay: true,
            reuse_address: true,
            accept_queue_size: 1024,
            acceptors: 1,
            drain_timeout_ms: 5000,
            throttling: ThrottlingConfig::default(),
        }
    }
}

impl ConnectorConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Reject inconsistent settings before any socket is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingName);
        }
        if self.acceptors == 0 {
            return Err(ConfigError::NoAcceptors(self.name.clone()));
        }
        self.throttling
            .validate()
            .map_err(|reason| ConfigError::InvalidThrottling {
                connector: self.name.clone(),
                reason,
            })
    }
}

/// Admission control settings.
///
/// Limits are optional; an enabled throttler needs at least one of
/// `max_connections` or `max_accept_rate`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ThrottlingConfig {
    pub enabled: bool,
    /// High-water mark: the full delay applies at or above this many live connections
    pub max_connections: Option<usize>,
    /// No delay at or below this many live connections
    pub low_water_connections: Option<usize>,
    /// Accepts per second
    pub max_accept_rate: Option<u32>,
    pub max_delay_ms: u64,
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_connections: None,
            low_water_connections: None,
            max_accept_rate: None,
            max_delay_ms: 1000,
        }
    }
}

impl ThrottlingConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Low and high water marks, if connection-count throttling is configured.
    ///
    /// The low-water mark defaults to 90% of the high-water mark.
    pub fn watermarks(&self) -> Option<(usize, usize)> {
        let high = self.max_connections?;
        let low = self.low_water_connections.unwrap_or(high - high / 10);
        Some((low, high))
    }

    fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_connections.is_none() && self.max_accept_rate.is_none() {
            return Err("enabled without max_connections or max_accept_rate".to_string());
        }
        if self.max_delay_ms == 0 || self.max_delay_ms > MAX_THROTTLE_DELAY_MS {
            return Err(format!(
                "max_delay_ms must be within 1..={}, got {}",
                MAX_THROTTLE_DELAY_MS, self.max_delay_ms
            ));
        }
        if self.max_accept_rate == Some(0) {
            return Err("max_accept_rate must be positive".to_string());
        }
        match (self.low_water_connections, self.max_connections) {
            (_, Some(0)) => Err("max_connections must be positive".to_string()),
            (Some(_), None) => Err("low_water_connections requires max_connections".to_string()),
            (Some(low), Some(high)) if low >= high => Err(format!(
                "low_water_connections ({}) must be below max_connections ({})",
                low, high
            )),
            _ => Ok(()),
        }
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Build a [`Config`] from a variable lookup.
///
/// Unparseable values fall back to their defaults.
pub fn load_config_from<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = ConnectorConfig::default();
    let flag = |key: &str, default: bool| {
        lookup(key)
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(default)
    };

    let name = lookup("EDGE_CONNECTOR_NAME").unwrap_or(defaults.name);

    let listen_port = lookup("EDGE_CONNECTOR_LISTEN_PORT")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.listen_port);

    let bind_address = lookup("EDGE_CONNECTOR_BIND_ADDR")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.bind_address);

    let tcp_keep_alive_enabled = flag("EDGE_CONNECTOR_TCP_KEEPALIVE", defaults.tcp_keep_alive_enabled);
    let tcp_no_delay = flag("EDGE_CONNECTOR_TCP_NODELAY", defaults.tcp_no_delay);
    let reuse_address = flag("EDGE_CONNECTOR_REUSE_ADDRESS", defaults.reuse_address);

    let accept_queue_size = lookup("EDGE_CONNECTOR_ACCEPT_QUEUE_SIZE")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.accept_queue_size);

    let acceptors = lookup("EDGE_CONNECTOR_ACCEPTORS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.acceptors);

    let drain_timeout_ms = lookup("EDGE_CONNECTOR_DRAIN_TIMEOUT_MS")
        .and_then(|v| v.parse().ok())
        .unwrap_or(defaults.drain_timeout_ms);

    // Throttling settings
    let throttling_defaults = ThrottlingConfig::default();
    let throttling = ThrottlingConfig {
        enabled: flag("EDGE_CONNECTOR_THROTTLING_ENABLED", false),
        max_connections: lookup("EDGE_CONNECTOR_THROTTLING_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok()),
        low_water_connections: lookup("EDGE_CONNECTOR_THROTTLING_LOW_WATER")
            .and_then(|v| v.parse().ok()),
        max_accept_rate: lookup("EDGE_CONNECTOR_THROTTLING_MAX_ACCEPT_RATE")
            .and_then(|v| v.parse().ok()),
        max_delay_ms: lookup("EDGE_CONNECTOR_THROTTLING_MAX_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(throttling_defaults.max_delay_ms),
    };

    let debug = lookup("DEBUG").is_some();

    let connector = ConnectorConfig {
        name,
        listen_port,
        bind_address,
        tcp_keep_alive_enabled,
        tcp_no_delay,
        reuse_address,
        accept_queue_size,
        acceptors,
        drain_timeout_ms,
        throttling,
    };
    connector.validate()?;

    Ok(Config { connector, debug })
}
