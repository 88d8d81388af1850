//! Pure connection state management for the MQTT binding
//!
//! Option building, session state, and the reconnect backoff policy live
//! here so the event-loop supervisor in [`super::binding`] stays focused on
//! I/O.

use std::time::Duration;

use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::MqttOptions;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::transport::QosLevel;

/// Connection state for the MQTT session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Reconnection backoff configuration.
///
/// Reconnection is unbounded: subscription intent is durable across
/// disconnects, so the session keeps trying until it is explicitly closed.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Custom backoff pattern in milliseconds (if empty, uses sustained delay)
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![25, 50, 100, 250], // 25ms, 50ms, 100ms, 250ms pattern
            sustained_delay: 250,                    // Stay at 250ms after pattern exhausted
        }
    }
}

impl ReconnectConfig {
    /// Calculate backoff delay for the given attempt using the pattern,
    /// sustaining at the final delay once the pattern is exhausted.
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        if self.backoff_pattern.is_empty() {
            self.sustained_delay
        } else {
            let index = (attempt.saturating_sub(1)) as usize;
            if index < self.backoff_pattern.len() {
                self.backoff_pattern[index]
            } else {
                self.sustained_delay
            }
        }
    }
}

/// Build MQTT options from client configuration.
///
/// Client IDs get a unique suffix per connection attempt to prevent broker
/// session conflicts when a half-dead previous session still lingers.
pub fn configure_mqtt_options(client_name: &str, config: &ClientConfig) -> MqttOptions {
    let client_id = format!("{client_name}-{}", Uuid::new_v4().simple());
    let mut options = MqttOptions::new(client_id, &config.host, config.port);

    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    // Credentials come through environment-variable indirection so config
    // files never carry secrets.
    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            options.set_credentials(&username, &password);
        }
    }

    options
}

impl From<QosLevel> for QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}
