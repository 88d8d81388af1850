//! Configuration loading and validation
//!
//! TOML-backed configuration for one or many named clients. Credentials are
//! never stored inline: config carries the names of environment variables to
//! read them from. Each client may declare a default topic set that is
//! applied once the client first connects.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topic::AddTopicOptions;

const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 30;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Connection settings for one named client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment variable holding the broker username, if auth is needed.
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable holding the broker password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Block `connect` until the session is established.
    #[serde(default)]
    pub wait_for_connection: bool,
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_for_connection_timeout_secs: u64,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Topics registered automatically once the client first connects.
    #[serde(default)]
    pub topics: HashMap<String, AddTopicOptions>,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username_env: None,
            password_env: None,
            wait_for_connection: false,
            wait_for_connection_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            topics: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port must not be zero".to_string()));
        }
        Ok(())
    }
}

/// Top-level configuration: a set of named clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    #[serde(default)]
    pub clients: HashMap<String, ClientConfig>,
}

impl ManagerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, client) in &self.clients {
            client
                .validate()
                .map_err(|e| ConfigError::Validation(format!("client '{name}': {e}")))?;
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_MQTT_PORT
}

fn default_keep_alive_secs() -> u64 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_wait_timeout_secs() -> u64 {
    DEFAULT_WAIT_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::PayloadEncoding;
    use crate::transport::QosLevel;

    #[test]
    fn test_minimal_client_config_uses_defaults() {
        let config = ManagerConfig::from_toml(
            r#"
            [clients.primary]
            host = "broker.local"
            "#,
        )
        .expect("parse");

        let client = &config.clients["primary"];
        assert_eq!(client.port, 1883);
        assert_eq!(client.keep_alive_secs, 60);
        assert!(!client.wait_for_connection);
        assert_eq!(client.wait_for_connection_timeout_secs, 30);
        assert!(client.topics.is_empty());
    }

    #[test]
    fn test_full_client_config_with_topics() {
        let config = ManagerConfig::from_toml(
            r#"
            [clients.sensors]
            host = "broker.local"
            port = 8883
            username_env = "MQTT_USER"
            password_env = "MQTT_PASS"
            wait_for_connection = true
            wait_for_connection_timeout_secs = 10

            [clients.sensors.topics."sensors/+/reading"]
            subscribe = true
            encoding = "latin1"
            subscribe_options = { qos = "exactly_once" }
            "#,
        )
        .expect("parse");

        let client = &config.clients["sensors"];
        assert_eq!(client.port, 8883);
        assert_eq!(client.username_env.as_deref(), Some("MQTT_USER"));
        assert!(client.wait_for_connection);

        let topic = &client.topics["sensors/+/reading"];
        assert!(topic.subscribe);
        assert_eq!(topic.encoding, PayloadEncoding::Latin1);
        assert_eq!(topic.subscribe_options.qos, QosLevel::ExactlyOnce);
    }

    #[test]
    fn test_empty_host_fails_validation() {
        let result = ManagerConfig::from_toml(
            r#"
            [clients.bad]
            host = ""
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_port_fails_validation() {
        let result = ManagerConfig::from_toml(
            r#"
            [clients.bad]
            host = "broker.local"
            port = 0
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let result = ManagerConfig::from_toml("clients = [not toml");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
