//! Connection-aware queue client
//!
//! A [`QueueClient`] wraps one transport binding with readiness waiting, a
//! topic registry, and an inbound routing task. Dropping the connection does
//! not invalidate the client: the binding reconnects underneath and topic
//! intent is reapplied, so handles stay usable across outages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{QueueError, QueueResult};
use crate::topic::TopicRegistry;
use crate::transport::mqtt::MqttBinding;
use crate::transport::{InboundMessage, LastError, TransportBinding};

/// Ceiling between connectivity re-checks while waiting for readiness.
pub const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default readiness wait in seconds.
pub const DEFAULT_WAIT_FOR_CONNECTION_SECS: u64 = 30;

const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// One named connection to a broker plus its topics.
pub struct QueueClient {
    name: String,
    host: String,
    port: u16,
    binding: Arc<dyn TransportBinding>,
    registry: Arc<TopicRegistry>,
    router: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueClient")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl QueueClient {
    /// Connect over MQTT. Optionally blocks until the session is established
    /// and schedules the configured default topics.
    pub async fn connect(name: &str, config: ClientConfig) -> QueueResult<Arc<Self>> {
        config.validate().map_err(QueueError::Config)?;

        let binding = MqttBinding::connect(name, &config);
        let client = Self::with_binding(name, &config.host, config.port, binding);

        if config.wait_for_connection {
            if let Err(error) = client
                .wait_for_connection(config.wait_for_connection_timeout_secs)
                .await
            {
                let _ = client.close().await;
                return Err(error);
            }
        }

        client.registry.apply_default_topics(config.topics);
        Ok(client)
    }

    /// Build a client over an already-constructed transport binding. This is
    /// the seam tests use to supply a mock transport.
    pub fn with_binding(
        name: &str,
        host: &str,
        port: u16,
        binding: Arc<dyn TransportBinding>,
    ) -> Arc<Self> {
        let registry = TopicRegistry::new(binding.clone());

        let (sender, mut receiver) = mpsc::channel::<InboundMessage>(INBOUND_CHANNEL_CAPACITY);
        binding.set_message_sender(sender);

        let router_registry = registry.clone();
        let router = tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                router_registry.dispatch(message);
            }
        });

        Arc::new(Self {
            name: name.to_string(),
            host: host.to_string(),
            port,
            binding,
            registry,
            router: Mutex::new(Some(router)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_connected(&self) -> bool {
        self.binding.is_connected()
    }

    /// Topic registry for this client.
    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    /// Most recent asynchronous transport error, if any.
    pub fn last_error(&self) -> Option<LastError> {
        self.binding.last_error()
    }

    pub fn last_error_message(&self) -> Option<String> {
        self.binding.last_error().map(|e| e.message)
    }

    /// Wait up to `timeout_secs` for the session to report connected.
    ///
    /// Wakes immediately on connectivity flips; otherwise re-checks every
    /// second. Returns [`QueueError::ConnectionTimeout`] naming the endpoint
    /// when the budget runs out.
    pub async fn wait_for_connection(&self, timeout_secs: u64) -> QueueResult<()> {
        let mut connectivity = self.binding.connectivity();
        if *connectivity.borrow() {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(QueueError::ConnectionTimeout {
                    host: self.host.clone(),
                    port: self.port,
                });
            }
            // The timeout is a wall-clock deadline: wakeups from flapping
            // connectivity re-check the flag but never shorten the wait.
            let ceiling = deadline.min(now + CONNECTION_POLL_INTERVAL);
            if let Ok(Err(_)) = tokio::time::timeout_at(ceiling, connectivity.changed()).await {
                return Err(QueueError::ConnectionTimeout {
                    host: self.host.clone(),
                    port: self.port,
                });
            }
            if *connectivity.borrow() {
                return Ok(());
            }
        }
    }

    /// Close the client: cancel every pending topic attempt and the inbound
    /// router, then terminate the transport session. Idempotent.
    pub async fn close(&self) -> QueueResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.registry.cancel_all();
        if let Some(router) = self
            .router
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            router.abort();
        }
        self.binding.close().await?;

        info!(client = %self.name, "queue client closed");
        Ok(())
    }
}
