//! Impure I/O side of the MQTT binding
//!
//! Owns the rumqttc client and its event-loop supervisor task. The
//! supervisor maintains the connectivity watch from ConnAck/Disconnect
//! events, forwards inbound publishes to the registered message channel,
//! and reconnects indefinitely with backoff, replaying the subscription
//! table after every reconnect so healed sessions keep their topics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::{AsyncClient, Event, EventLoop};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{configure_mqtt_options, ConnectionState, ReconnectConfig};
use crate::config::ClientConfig;
use crate::transport::{
    BindingError, InboundMessage, LastError, PublishOptions, PublishReceipt, SubscribeOptions,
    SubscribeReceipt, TransportBinding, UnsubscribeReceipt,
};

type MessageSenderSlot = Arc<StdMutex<Option<mpsc::Sender<InboundMessage>>>>;
type LastErrorSlot = Arc<StdMutex<Option<LastError>>>;

/// MQTT transport binding backed by rumqttc (MQTT v5).
pub struct MqttBinding {
    client_name: String,
    client: Arc<Mutex<AsyncClient>>,
    connected_rx: watch::Receiver<bool>,
    connected_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
    subscriptions: Arc<Mutex<HashMap<String, SubscribeOptions>>>,
    message_tx: MessageSenderSlot,
    last_error: LastErrorSlot,
    closed: AtomicBool,
}

impl MqttBinding {
    /// Create the binding and start its event-loop supervisor.
    ///
    /// The session itself is established lazily by the supervisor; callers
    /// that need synchronous readiness wait on the connectivity watch.
    pub fn connect(client_name: &str, config: &ClientConfig) -> Arc<Self> {
        let options = configure_mqtt_options(client_name, config);
        let (client, event_loop) = AsyncClient::new(options, 10);

        let (connected_tx, connected_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let client = Arc::new(Mutex::new(client));
        let subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let message_tx: MessageSenderSlot = Arc::new(StdMutex::new(None));
        let last_error: LastErrorSlot = Arc::new(StdMutex::new(None));

        let supervisor = Supervisor {
            client_name: client_name.to_string(),
            config: config.clone(),
            reconnect: ReconnectConfig::default(),
            client: client.clone(),
            connected_tx: connected_tx.clone(),
            state_tx,
            subscriptions: subscriptions.clone(),
            message_tx: message_tx.clone(),
            last_error: last_error.clone(),
        };
        let handle = tokio::spawn(supervisor.run(event_loop, shutdown_rx));

        Arc::new(Self {
            client_name: client_name.to_string(),
            client,
            connected_rx,
            connected_tx,
            state_rx,
            shutdown_tx,
            supervisor: StdMutex::new(Some(handle)),
            subscriptions,
            message_tx,
            last_error,
            closed: AtomicBool::new(false),
        })
    }

    /// Current session state, richer than the boolean connectivity flag.
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }
}

#[async_trait::async_trait]
impl TransportBinding for MqttBinding {
    async fn publish(
        &self,
        topic_path: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<PublishReceipt, BindingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BindingError::Closed);
        }

        let client = self.client.lock().await;
        client
            .publish(topic_path, options.qos.into(), options.retain, payload)
            .await
            .map_err(|e| BindingError::PublishRejected {
                topic_path: topic_path.to_string(),
                source: Box::new(e),
            })?;

        Ok(PublishReceipt { published: true })
    }

    async fn subscribe(
        &self,
        topic_path: &str,
        options: &SubscribeOptions,
    ) -> Result<SubscribeReceipt, BindingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BindingError::Closed);
        }

        {
            let client = self.client.lock().await;
            client
                .subscribe(topic_path, options.qos.into())
                .await
                .map_err(|e| BindingError::SubscribeRejected {
                    topic_path: topic_path.to_string(),
                    source: Box::new(e),
                })?;
        }

        // Track for replay after reconnects.
        self.subscriptions
            .lock()
            .await
            .insert(topic_path.to_string(), options.clone());

        Ok(SubscribeReceipt {
            subscribed: true,
            granted_qos: Some(options.qos),
        })
    }

    async fn unsubscribe(&self, topic_path: &str) -> Result<UnsubscribeReceipt, BindingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BindingError::Closed);
        }

        {
            let client = self.client.lock().await;
            client
                .unsubscribe(topic_path)
                .await
                .map_err(|e| BindingError::UnsubscribeRejected {
                    topic_path: topic_path.to_string(),
                    source: Box::new(e),
                })?;
        }

        self.subscriptions.lock().await.remove(topic_path);

        Ok(UnsubscribeReceipt { unsubscribed: true })
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    fn connectivity(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *self
            .message_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
    }

    fn last_error(&self) -> Option<LastError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn close(&self) -> Result<(), BindingError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown_tx.send(true);

        {
            let client = self.client.lock().await;
            if let Err(error) = client.disconnect().await {
                // Session teardown is best effort; the supervisor stops regardless.
                debug!(client = %self.client_name, error = %error, "mqtt disconnect while closing");
            }
        }

        let _ = self.connected_tx.send(false);

        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .is_err()
            {
                warn!(client = %self.client_name, "mqtt supervisor did not stop in time");
            }
        }

        info!(client = %self.client_name, "mqtt binding closed");
        Ok(())
    }
}

impl Drop for MqttBinding {
    fn drop(&mut self) {
        // Can't run async teardown here; just stop the background task.
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Event-loop supervisor state shared with the background task.
struct Supervisor {
    client_name: String,
    config: ClientConfig,
    reconnect: ReconnectConfig,
    client: Arc<Mutex<AsyncClient>>,
    connected_tx: watch::Sender<bool>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Arc<Mutex<HashMap<String, SubscribeOptions>>>,
    message_tx: MessageSenderSlot,
    last_error: LastErrorSlot,
}

impl Supervisor {
    async fn run(self, mut event_loop: EventLoop, mut shutdown_rx: watch::Receiver<bool>) {
        info!(client = %self.client_name, "starting mqtt event loop supervisor");
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                polled = event_loop.poll() => match polled {
                    Ok(event) => self.handle_event(event, &mut reconnect_attempts).await,
                    Err(error) => {
                        let reason = error.to_string();
                        self.mark_disconnected(&reason);

                        reconnect_attempts += 1;
                        let delay = self.reconnect.calculate_backoff_delay(reconnect_attempts);
                        let _ = self.state_tx.send(ConnectionState::Reconnecting(reconnect_attempts));
                        debug!(
                            client = %self.client_name,
                            attempt = reconnect_attempts,
                            delay_ms = delay,
                            "scheduling mqtt reconnection"
                        );

                        if !interruptible_sleep(shutdown_rx.clone(), delay).await {
                            break;
                        }
                        event_loop = self.recreate_connection().await;
                    }
                }
            }
        }

        let _ = self.connected_tx.send(false);
        info!(client = %self.client_name, "mqtt event loop supervisor stopped");
    }

    async fn handle_event(&self, event: Event, reconnect_attempts: &mut u32) {
        match event {
            Event::Incoming(Packet::ConnAck(_)) => {
                info!(client = %self.client_name, "mqtt connection established");
                *reconnect_attempts = 0;
                let _ = self.state_tx.send(ConnectionState::Connected);
                let _ = self.connected_tx.send(true);
                self.replay_subscriptions().await;
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let topic_path = String::from_utf8_lossy(&publish.topic).to_string();
                self.forward_message(topic_path, publish.payload).await;
            }
            Event::Incoming(Packet::Disconnect(_)) => {
                // The following poll observes the closed socket and drives
                // the reconnect path.
                self.mark_disconnected("broker disconnected");
            }
            Event::Incoming(_) | Event::Outgoing(_) => {}
        }
    }

    async fn forward_message(&self, topic_path: String, payload: Bytes) {
        let sender = self
            .message_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match sender {
            Some(sender) => {
                let message = InboundMessage {
                    topic_path,
                    payload,
                };
                if sender.send(message).await.is_err() {
                    warn!(client = %self.client_name, "inbound message channel closed, dropping message");
                }
            }
            None => {
                debug!(
                    client = %self.client_name,
                    topic_path = %topic_path,
                    "no message sender registered, dropping message"
                );
            }
        }
    }

    fn mark_disconnected(&self, reason: &str) {
        warn!(client = %self.client_name, reason = %reason, "mqtt connection lost");
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(LastError::now(reason));
        let _ = self.connected_tx.send(false);
        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected(reason.to_string()));
    }

    /// Replace the shared client and hand back a fresh event loop so publish
    /// and subscribe calls ride the new session.
    async fn recreate_connection(&self) -> EventLoop {
        let options = configure_mqtt_options(&self.client_name, &self.config);
        let (new_client, new_event_loop) = AsyncClient::new(options, 10);
        *self.client.lock().await = new_client;
        debug!(client = %self.client_name, "created replacement mqtt connection");
        new_event_loop
    }

    /// Re-issue every tracked subscription after a reconnect; a healed
    /// session must self-heal its topics without caller intervention.
    async fn replay_subscriptions(&self) {
        let subscriptions = self.subscriptions.lock().await.clone();
        if subscriptions.is_empty() {
            return;
        }

        let client = self.client.lock().await;
        for (topic_path, options) in subscriptions {
            if let Err(error) = client.subscribe(&topic_path, options.qos.into()).await {
                error!(
                    client = %self.client_name,
                    topic_path = %topic_path,
                    error = %error,
                    "failed to re-subscribe after reconnect"
                );
            } else {
                debug!(topic_path = %topic_path, "re-subscribed after reconnect");
            }
        }
    }
}

/// Sleep that a shutdown signal can interrupt. Returns false when shutdown
/// was requested during the wait.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> ClientConfig {
        // Port 1 is never a broker; the supervisor just cycles its backoff.
        ClientConfig::new("127.0.0.1", 1)
    }

    #[tokio::test]
    async fn test_binding_starts_disconnected() {
        let binding = MqttBinding::connect("test-start", &unreachable_config());
        assert!(!binding.is_connected());
        assert_eq!(binding.connection_state(), ConnectionState::Connecting);
        binding.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_kills_connectivity() {
        let binding = MqttBinding::connect("test-close", &unreachable_config());
        binding.close().await.expect("first close");
        binding.close().await.expect("second close");
        assert!(!binding.is_connected());
    }

    #[tokio::test]
    async fn test_operations_fail_after_close() {
        let binding = MqttBinding::connect("test-closed-ops", &unreachable_config());
        binding.close().await.expect("close");

        let publish = binding
            .publish("t/1", Bytes::from_static(b"x"), &PublishOptions::default())
            .await;
        assert!(matches!(publish, Err(BindingError::Closed)));

        let subscribe = binding.subscribe("t/1", &SubscribeOptions::default()).await;
        assert!(matches!(subscribe, Err(BindingError::Closed)));

        let unsubscribe = binding.unsubscribe("t/1").await;
        assert!(matches!(unsubscribe, Err(BindingError::Closed)));
    }

    #[tokio::test]
    async fn test_no_last_error_before_any_failure() {
        let binding = MqttBinding::connect("test-last-error", &unreachable_config());
        // Queried immediately, before the supervisor can observe a failure.
        let _ = binding.last_error();
        binding.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(interruptible_sleep(rx, 5).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });
        assert!(!interruptible_sleep(rx, 5_000).await);
    }
}
