//! Connection-resilient publish/subscribe client for MQTT brokers
//!
//! Wraps a reconnecting MQTT session with per-topic lifecycle handles that
//! survive outages. Subscription intent is durable: a topic subscribed while
//! offline subscribes when the connection arrives, and an established
//! session that drops re-subscribes everything on reconnect. Publishes wait
//! out a bounded budget for connectivity before giving up.
//!
//! # Example
//!
//! ```no_run
//! use mqtt_queue_client::{AddTopicOptions, ClientConfig, QueueClient};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = QueueClient::connect("sensors", ClientConfig::new("broker.local", 1883)).await?;
//!
//! let topic = client.topics().add_topic(
//!     "sensors/kitchen/temp",
//!     &AddTopicOptions {
//!         subscribe: true,
//!         ..AddTopicOptions::default()
//!     },
//! );
//! topic.on_text_message(|text| println!("reading: {text}"));
//! topic.publish("21.5").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod testing;
pub mod topic;
pub mod transport;

pub use client::QueueClient;
pub use config::{ClientConfig, ConfigError, ManagerConfig};
pub use error::{QueueError, QueueResult};
pub use manager::ClientManager;
pub use topic::{
    AddTopicOptions, ListenerId, PayloadEncoding, SubscriptionResult, SubscriptionStatus, Topic,
    TopicRegistry,
};
pub use transport::mqtt::MqttBinding;
pub use transport::{
    BindingError, InboundMessage, LastError, PublishOptions, PublishReceipt, QosLevel,
    SubscribeOptions, SubscribeReceipt, TransportBinding, UnsubscribeReceipt,
};
