//! Server configuration.
//!
//! Configuration is layered:
//! - Built-in defaults
//! - TOML configuration file (`BEACON_CONFIG`, `beacon.toml`, `/etc/beacon/beacon.toml`, `~/.config/beacon/beacon.toml`)
//! - Environment variables (`BEACON_*`, nested keys joined with `__`)

use anyhow::{bail, Context, Result};
use beacon_core::AudienceSpec;
use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Message bus configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// WebSocket endpoint configuration.
    #[serde(default)]
    pub websocket: WebSocketConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Internal producer API.
    #[serde(default)]
    pub api: ApiConfig,
}

/// Which bus implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    /// In-process bus. Presence and messages stay inside this server.
    Memory,
    /// Shared Redis instance.
    Redis,
}

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus implementation.
    #[serde(default = "default_backend")]
    pub backend: BusBackend,

    /// Redis connection URL.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Namespace prefix for every channel and presence key.
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

/// WebSocket endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// URL prefix; the rest of the path is the facility.
    #[serde(default = "default_ws_url")]
    pub url: String,

    /// Message echoed back to the client instead of being published.
    #[serde(default)]
    pub heartbeat: Option<String>,

    /// Audience used when the request query names no known flag.
    #[serde(default = "default_audience")]
    pub default_audience: AudienceSpec,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Internal producer API (`/publish`, `/online`).
///
/// Served on its own listener so it can stay off the public interface.
/// Callers are trusted: they can address any session, user or group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the producer API.
    #[serde(default)]
    pub enabled: bool,

    /// Host to bind the producer API to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Producer API port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_backend() -> BusBackend {
    BusBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_prefix() -> String {
    "ws4redis:".to_string()
}

fn default_ws_url() -> String {
    "/ws/".to_string()
}

fn default_audience() -> AudienceSpec {
    AudienceSpec::from_flags(["subscribe-broadcast", "publish-broadcast"])
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_port() -> u16 {
    8081
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bus: BusConfig::default(),
            websocket: WebSocketConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_api_port(),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            prefix: default_prefix(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: default_ws_url(),
            heartbeat: None,
            default_audience: default_audience(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, overlaid with
    /// `BEACON_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result is invalid.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var("BEACON_CONFIG").ok();
        let config_paths = [
            "beacon.toml",
            "/etc/beacon/beacon.toml",
            "~/.config/beacon/beacon.toml",
        ];

        let mut builder = config::Config::builder();

        let found = explicit
            .iter()
            .map(String::as_str)
            .chain(config_paths)
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());
        if let Some(path) = found {
            builder = builder.add_source(File::new(&path, FileFormat::Toml));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("BEACON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("websocket.default_audience"),
            )
            .build()
            .context("Failed to load configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the server cannot start with.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        let url = &self.websocket.url;
        if !url.starts_with('/') || !url.ends_with('/') {
            bail!("websocket.url must start and end with '/', got {url:?}");
        }
        if self.bus.prefix.is_empty() {
            bail!("bus.prefix must not be empty");
        }
        if self.api.enabled && self.api.host == self.host && self.api.port == self.port {
            bail!("api must not share the public listener {}:{}", self.host, self.port);
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.host, self.port)
    }

    /// Socket address of the producer API listener.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn api_addr(&self) -> Result<SocketAddr> {
        socket_addr(&self.api.host, self.api.port)
    }
}

fn socket_addr(host: &str, port: u16) -> Result<SocketAddr> {
    format!("{host}:{port}")
        .parse()
        .with_context(|| format!("Invalid host:port {host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bus.prefix, "ws4redis:");
        assert_eq!(config.websocket.url, "/ws/");
        assert!(config.websocket.default_audience.subscribe_broadcast);
        assert!(!config.api.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [bus]
            backend = "memory"
            prefix = "ws:"

            [websocket]
            url = "/live/"
            heartbeat = "--heartbeat--"
            default_audience = ["subscribe-user", "subscribe-broadcast", "unknown"]
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.bus.backend, BusBackend::Memory);
        assert_eq!(config.bus.prefix, "ws:");
        assert_eq!(config.websocket.heartbeat.as_deref(), Some("--heartbeat--"));

        let audience = config.websocket.default_audience;
        assert!(audience.subscribe_user && audience.subscribe_broadcast);
        assert!(!audience.publish_broadcast);
        assert_eq!(config.limits.max_message_size, 64 * 1024);
        assert!(!config.api.enabled);
    }

    #[test]
    fn test_api_section() {
        let config: Config = toml::from_str(
            r#"
            [api]
            enabled = true
            port = 7000
        "#,
        )
        .unwrap();
        assert!(config.api.enabled);
        assert_eq!(config.api_addr().unwrap().to_string(), "127.0.0.1:7000");
        assert!(config.validate().is_ok());

        let mut shared = config;
        shared.api.port = shared.port;
        assert!(shared.validate().is_err());
    }

    #[test]
    fn test_validate_websocket_url() {
        let mut config = Config::default();
        config.websocket.url = "/ws".into();
        assert!(config.validate().is_err());

        config.websocket.url = "ws/".into();
        assert!(config.validate().is_err());
    }
}
