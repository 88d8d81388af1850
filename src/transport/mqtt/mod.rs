//! MQTT implementation of the transport binding
//!
//! Split into two focused sub-modules:
//!
//! - [`connection`] - pure connection state, option building, and the
//!   reconnect backoff policy
//! - [`binding`] - the impure side: the rumqttc event-loop supervisor and
//!   the [`crate::transport::TransportBinding`] implementation

pub mod binding;
pub mod connection;

pub use binding::MqttBinding;
pub use connection::{ConnectionState, ReconnectConfig};
