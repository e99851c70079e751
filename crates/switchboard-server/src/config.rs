//! Server configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (SWITCHBOARD_*)
//! - TOML configuration file
//! - The `--config <path>` command line argument

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use switchboard_core::HubConfig;
use switchboard_transport::{AllowEntry, AllowList};

/// Environment variable overriding the bind host.
pub const HOST_ENV: &str = "SWITCHBOARD_HOST";

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "SWITCHBOARD_PORT";

/// Environment variable holding extra comma-separated allow-list entries.
pub const ALLOW_LIST_ENV: &str = "SWITCHBOARD_ALLOW_LIST";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Public `ip:port` pairs allowed to connect besides private networks.
    #[serde(default)]
    pub allow_list: Vec<AllowEntry>,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Shutdown behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound line length in bytes.
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,

    /// Lines queued per connection before deliveries to it fail.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// How long open connections get to close after a shutdown signal.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export on the bind host.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    27200
}

fn default_max_line_length() -> usize {
    HubConfig::default().max_line_length
}

fn default_outbox_capacity() -> usize {
    HubConfig::default().outbox_capacity
}

fn default_drain_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_list: Vec::new(),
            limits: LimitsConfig::default(),
            shutdown: ShutdownConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_line_length: default_max_line_length(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or
    /// if an environment override is invalid.
    pub fn load() -> Result<Self> {
        // Try to load from default paths
        let config_paths = [
            "switchboard.toml",
            "/etc/switchboard/switchboard.toml",
            "~/.config/switchboard/switchboard.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref())?.with_env_overrides();
            }
        }

        Self::default().with_env_overrides()
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply `SWITCHBOARD_HOST` and `SWITCHBOARD_PORT` over the loaded
    /// values, and merge the entries of `SWITCHBOARD_ALLOW_LIST`.
    ///
    /// # Errors
    ///
    /// Returns an error if the port is not a number or an allow-list entry
    /// is not an `ip:port` pair.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    fn apply_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = var(HOST_ENV) {
            self.host = host;
        }

        if let Some(port) = var(PORT_ENV) {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {PORT_ENV} value: {port:?}"))?;
        }

        if let Some(list) = var(ALLOW_LIST_ENV) {
            let entries = AllowList::parse_list(&list)
                .with_context(|| format!("Failed to parse {ALLOW_LIST_ENV}"))?;
            self.allow_list.extend(entries);
        }

        Ok(self)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// The allow-list the hub authorizes connections against.
    #[must_use]
    pub fn allow_list(&self) -> AllowList {
        self.allow_list.iter().copied().collect()
    }

    /// Hub settings derived from the limits section.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            outbox_capacity: self.limits.outbox_capacity,
            max_line_length: self.limits.max_line_length,
        }
    }

    /// Address of the Prometheus listener, on the same host as the hub.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not an IP address.
    pub fn metrics_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(self.bind_addr()?.ip(), self.metrics.port))
    }

    /// Grace period for open connections on shutdown.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.allow_list.is_empty());
        assert_eq!(config.limits.max_line_length, 64 * 1024);
        assert_eq!(config.limits.outbox_capacity, 1024);
        assert_eq!(config.shutdown.drain_timeout_ms, 5_000);
        assert_eq!(config.bind_addr().unwrap(), "0.0.0.0:27200".parse().unwrap());
    }

    #[test]
    fn test_config_bind_addr() {
        let toml_str = r#"
            host = "::"
            port = 27300
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let addr = config.bind_addr().unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 27300);

        let config = Config {
            host: "relay.example".to_string(),
            ..config
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 27200
            allow_list = ["62.226.205.78:27015", "127.0.0.1:27115"]

            [limits]
            outbox_capacity = 16

            [shutdown]
            drain_timeout_ms = 250
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 27200);
        assert_eq!(config.allow_list.len(), 2);
        assert_eq!(config.limits.outbox_capacity, 16);
        assert_eq!(config.limits.max_line_length, 64 * 1024);
        assert_eq!(config.drain_timeout(), Duration::from_millis(250));

        let allow = config.allow_list();
        assert!(allow.contains("62.226.205.78".parse().unwrap(), 27015));
        assert!(!allow.contains("62.226.205.78".parse().unwrap(), 27016));
    }

    #[test]
    fn test_invalid_allow_entry_in_file() {
        let toml_str = r#"allow_list = ["62.226.205.78"]"#;
        assert!(toml::from_str::<Config>(toml_str).is_err());
    }

    fn env<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn test_env_allow_list_is_merged() {
        let toml_str = r#"allow_list = ["62.226.205.78:27015"]"#;
        let config: Config = toml::from_str(toml_str).unwrap();

        let config = config
            .apply_env(env(&[(ALLOW_LIST_ENV, "8.8.8.8:1, 62.226.205.78:27015,")]))
            .unwrap();
        let allow = config.allow_list();
        assert_eq!(allow.len(), 2);
        assert!(allow.contains("8.8.8.8".parse().unwrap(), 1));

        let config = config.apply_env(env(&[])).unwrap();
        assert_eq!(config.allow_list().len(), 2);
    }

    #[test]
    fn test_env_allow_list_rejects_garbage() {
        let result =
            Config::default().apply_env(env(&[(ALLOW_LIST_ENV, "8.8.8.8:1,not-an-address")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_host_and_port_override_file() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 27200
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();

        let config = config
            .apply_env(env(&[(HOST_ENV, "127.0.0.1"), (PORT_ENV, " 27300 ")]))
            .unwrap();
        assert_eq!(config.bind_addr().unwrap(), "127.0.0.1:27300".parse().unwrap());
    }

    #[test]
    fn test_env_port_rejects_garbage() {
        for bad in ["not-a-port", "70000", "-1", ""] {
            let result = Config::default().apply_env(env(&[(PORT_ENV, bad)]));
            assert!(result.is_err(), "{bad:?}");
        }
    }

    #[test]
    fn test_metrics_are_opt_in_on_bind_host() {
        let config = Config::default();
        assert!(!config.metrics.enabled);

        let toml_str = r#"
            host = "10.0.0.5"

            [metrics]
            enabled = true
            port = 9191
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics_addr().unwrap(), "10.0.0.5:9191".parse().unwrap());
    }
}
