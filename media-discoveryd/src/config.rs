use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{
    CLIENT_SERVICE_TYPE, DEBOUNCE_MS, DEFAULT_SERVER_PORT, HEARTBEAT_MS, SERVER_SERVICE_TYPE,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_server_service_type")]
    pub service_type: String,
    /// Restrict the transport to one interface; all interfaces when unset
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_port")]
    pub default_port: u16,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_interface_poll_secs")]
    pub interface_poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_probe_path")]
    pub path: String,
}

/// This device's own advertisement
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_client_service_type")]
    pub service_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Address to advertise; local interface addresses when unset
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_server_service_type() -> String {
    SERVER_SERVICE_TYPE.to_string()
}

fn default_client_service_type() -> String {
    CLIENT_SERVICE_TYPE.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SERVER_PORT
}

fn default_debounce_ms() -> u64 {
    DEBOUNCE_MS
}

fn default_heartbeat_secs() -> u64 {
    HEARTBEAT_MS / 1000
}

fn default_interface_poll_secs() -> u64 {
    10
}

fn default_probe_timeout_ms() -> u64 {
    3000
}

fn default_probe_path() -> String {
    "/identity".to_string()
}

fn default_device_port() -> u16 {
    32500
}

fn default_listen() -> String {
    "[::]:8054".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            service_type: default_server_service_type(),
            interface: None,
            default_port: default_port(),
            debounce_ms: default_debounce_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            interface_poll_secs: default_interface_poll_secs(),
        }
    }
}

impl DiscoveryConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn interface_poll(&self) -> Duration {
        Duration::from_secs(self.interface_poll_secs.max(1))
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_probe_timeout_ms(),
            path: default_probe_path(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            service_type: default_client_service_type(),
            name: None,
            port: default_device_port(),
            address: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.discovery.default_port, 32400);
        assert_eq!(config.discovery.debounce(), Duration::from_millis(5000));
        assert_eq!(config.discovery.heartbeat(), Duration::from_secs(300));
        assert_eq!(config.discovery.service_type, SERVER_SERVICE_TYPE);
        assert_eq!(config.probe.path, "/identity");
        assert_eq!(config.api.listen, "[::]:8054");
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::parse(
            r#"
            [discovery]
            interface = "eth0"
            debounce_ms = 250

            [device]
            name = "den-tv"
            "#,
        )
        .unwrap();

        assert_eq!(config.discovery.interface.as_deref(), Some("eth0"));
        assert_eq!(config.discovery.debounce_ms, 250);
        assert_eq!(config.discovery.heartbeat_secs, 300);
        assert_eq!(config.device.name.as_deref(), Some("den-tv"));
        assert_eq!(config.device.service_type, CLIENT_SERVICE_TYPE);
    }

    #[test]
    fn test_rejects_bad_types() {
        assert!(Config::parse("[discovery]\ndefault_port = \"x\"").is_err());
    }
}
