//! Server configuration.
//!
//! Configuration is loaded from:
//! - A TOML file (`convoy.toml`, `/etc/convoy/convoy.toml`, `~/.config/convoy/convoy.toml`)
//! - Environment variables (`CONVOY__PORT`, `CONVOY__HEARTBEAT__TIMEOUT_MS`, ...)
//!
//! Environment variables override file values.

use anyhow::{Context, Result};
use convoy_core::StoreConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Top-level server settings. Every section falls back to its defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub transport: TransportConfig,
    pub limits: LimitsConfig,
    pub heartbeat: HeartbeatConfig,
    pub notifications: NotificationsConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            notifications: NotificationsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Route the WebSocket upgrade is served on.
    pub websocket_path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
        }
    }
}

/// Client liveness. A connection silent for `timeout_ms` is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Ping interval advertised to clients in `connected`.
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Page size when a query gives no limit.
    pub default_page_size: usize,
    /// Largest page a query may ask for.
    pub max_page_size: usize,
    /// Time between expiry sweeps.
    pub sweep_interval_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            sweep_interval_ms: 60_000,
        }
    }
}

/// Prometheus exporter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl HeartbeatConfig {
    /// Inactivity after which a connection is dropped.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl NotificationsConfig {
    /// Paging limits for the notification store.
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
        }
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "convoy.toml",
            "/etc/convoy/convoy.toml",
            "~/.config/convoy/convoy.toml",
        ];

        let file = config_paths
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            builder = builder.add_source(config::File::from(Path::new(path)).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CONVOY")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .with_context(|| match &file {
                Some(path) => format!("Failed to load config file: {}", path),
                None => "Failed to load config from environment".to_string(),
            })
    }

    /// Parse a TOML file without environment overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file is unreadable or not valid configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| toml::from_str(&raw).map_err(anyhow::Error::from))
            .with_context(|| format!("Cannot load {}", path.display()))
    }

    /// Address the listener binds to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}
