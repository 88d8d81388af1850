//! Transport layer for broker communication
//!
//! This module defines the seam between the topic layer and a concrete
//! broker implementation. The core never speaks a wire protocol itself: it
//! calls an injected [`TransportBinding`] for publish/subscribe/unsubscribe,
//! observes connectivity through a watch channel, and receives raw payloads
//! back over a message channel keyed by topic path.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub mod mqtt;

/// Quality-of-service level for publishes and subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QosLevel {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// Delivery options for a single publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    #[serde(default)]
    pub qos: QosLevel,
    #[serde(default)]
    pub retain: bool,
}

/// Options for a subscription request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    #[serde(default)]
    pub qos: QosLevel,
}

/// Outcome of an accepted publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub published: bool,
}

/// Outcome of an accepted subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeReceipt {
    pub subscribed: bool,
    /// QoS the broker granted, when the transport reports one.
    pub granted_qos: Option<QosLevel>,
}

/// Outcome of an accepted unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeReceipt {
    pub unsubscribed: bool,
}

/// Raw message pushed up from the transport.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic_path: String,
    pub payload: Bytes,
}

/// Most recent asynchronous transport error. Recorded on the connection and
/// queryable rather than thrown, since it may arrive with no pending caller.
#[derive(Debug, Clone)]
pub struct LastError {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Transport-level failures reported by a binding.
#[derive(Debug, Error)]
pub enum BindingError {
    #[error("publish to {topic_path} rejected")]
    PublishRejected {
        topic_path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("subscribe to {topic_path} rejected")]
    SubscribeRejected {
        topic_path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("unsubscribe from {topic_path} rejected")]
    UnsubscribeRejected {
        topic_path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("transport is closed")]
    Closed,
}

/// Contract a broker transport must honor to sit under the topic layer.
///
/// All three operations are asynchronous and may fail with a transport-level
/// rejection. Connectivity may flip at any time independent of caller
/// actions; a caller's `is_connected` check and its subsequent operation are
/// not atomic, which is exactly why the topic layer retries.
#[async_trait::async_trait]
pub trait TransportBinding: Send + Sync {
    async fn publish(
        &self,
        topic_path: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<PublishReceipt, BindingError>;

    async fn subscribe(
        &self,
        topic_path: &str,
        options: &SubscribeOptions,
    ) -> Result<SubscribeReceipt, BindingError>;

    async fn unsubscribe(&self, topic_path: &str) -> Result<UnsubscribeReceipt, BindingError>;

    /// Live transport connectivity.
    fn is_connected(&self) -> bool;

    /// Watch channel that tracks connectivity. Retry loops await it with
    /// their polling interval as a ceiling so they wake on flips immediately.
    fn connectivity(&self) -> watch::Receiver<bool>;

    /// Register the channel inbound raw messages are forwarded on.
    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);

    /// Most recent asynchronous error observed on the session, if any.
    fn last_error(&self) -> Option<LastError>;

    /// Terminate the session. Idempotent; `is_connected` reads false after.
    async fn close(&self) -> Result<(), BindingError>;
}
