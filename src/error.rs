//! Caller-facing error types for queue client operations
//!
//! Only two failure classes surface to callers as errors: readiness waits
//! that time out and publishes that exhaust their retry budget while
//! disconnected. Transport-level rejections pass through unretried, and
//! subscription failures become topic state plus an event instead of an
//! error (subscribe is fire-and-forget by design).

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::BindingError;

/// Main error type for queue client operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Connectivity was never reached within the caller's readiness timeout.
    #[error("unable to connect to {host}:{port}")]
    ConnectionTimeout { host: String, port: u16 },

    /// A publish waited out its full retry budget without connectivity.
    #[error("publish to {topic_path} failed: not connected")]
    PublishNotConnected { topic_path: String },

    /// The transport rejected an operation while connected. Never retried:
    /// retries only address disconnection, not broker-level denial.
    #[error("transport error")]
    Transport(#[from] BindingError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for queue client operations.
pub type QueueResult<T> = Result<T, QueueError>;
