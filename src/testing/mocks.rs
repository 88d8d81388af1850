//! Mock transport binding
//!
//! In-memory [`TransportBinding`] with scriptable connectivity and failure
//! injection. Records every broker call for assertions. Loopback mode echoes
//! published payloads back through the message channel so end-to-end paths
//! can run without a broker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::transport::{
    BindingError, InboundMessage, LastError, PublishOptions, PublishReceipt, SubscribeOptions,
    SubscribeReceipt, TransportBinding, UnsubscribeReceipt,
};

/// One recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub topic_path: String,
    pub payload: Bytes,
    pub options: PublishOptions,
}

pub struct MockBinding {
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    message_tx: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    published: Mutex<Vec<PublishRecord>>,
    subscribes: Mutex<Vec<String>>,
    unsubscribes: Mutex<Vec<String>>,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
    loopback: bool,
    closed: AtomicBool,
    last_error: Mutex<Option<LastError>>,
}

impl MockBinding {
    fn with_state(connected: bool, loopback: bool) -> Arc<Self> {
        let (connected_tx, connected_rx) = watch::channel(connected);
        Arc::new(Self {
            connected_tx,
            connected_rx,
            message_tx: Mutex::new(None),
            published: Mutex::new(Vec::new()),
            subscribes: Mutex::new(Vec::new()),
            unsubscribes: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            loopback,
            closed: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    pub fn connected() -> Arc<Self> {
        Self::with_state(true, false)
    }

    pub fn disconnected() -> Arc<Self> {
        Self::with_state(false, false)
    }

    /// Connected binding that echoes publishes back as inbound messages.
    pub fn with_loopback() -> Arc<Self> {
        Self::with_state(true, true)
    }

    pub fn set_connected(&self, connected: bool) {
        let _ = self.connected_tx.send(connected);
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub fn set_unsubscribe_failure(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::SeqCst);
    }

    pub fn record_error(&self, message: &str) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(LastError::now(message));
    }

    /// Push an inbound message as if the broker delivered it.
    pub async fn inject_message(&self, topic_path: &str, payload: impl Into<Bytes>) {
        let sender = self
            .message_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(sender) = sender {
            let _ = sender
                .send(InboundMessage {
                    topic_path: topic_path.to_string(),
                    payload: payload.into(),
                })
                .await;
        }
    }

    pub fn published_records(&self) -> Vec<PublishRecord> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribed_paths(&self) -> Vec<String> {
        self.subscribes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn unsubscribed_paths(&self) -> Vec<String> {
        self.unsubscribes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn rejection(message: &str) -> Box<dyn std::error::Error + Send + Sync> {
        Box::new(std::io::Error::other(message))
    }
}

#[async_trait::async_trait]
impl TransportBinding for MockBinding {
    async fn publish(
        &self,
        topic_path: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> Result<PublishReceipt, BindingError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BindingError::PublishRejected {
                topic_path: topic_path.to_string(),
                source: Self::rejection("injected publish failure"),
            });
        }

        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PublishRecord {
                topic_path: topic_path.to_string(),
                payload: payload.clone(),
                options: options.clone(),
            });

        if self.loopback {
            self.inject_message(topic_path, payload).await;
        }
        Ok(PublishReceipt { published: true })
    }

    async fn subscribe(
        &self,
        topic_path: &str,
        options: &SubscribeOptions,
    ) -> Result<SubscribeReceipt, BindingError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BindingError::SubscribeRejected {
                topic_path: topic_path.to_string(),
                source: Self::rejection("injected subscribe failure"),
            });
        }

        self.subscribes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic_path.to_string());

        Ok(SubscribeReceipt {
            subscribed: true,
            granted_qos: Some(options.qos),
        })
    }

    async fn unsubscribe(&self, topic_path: &str) -> Result<UnsubscribeReceipt, BindingError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(BindingError::UnsubscribeRejected {
                topic_path: topic_path.to_string(),
                source: Self::rejection("injected unsubscribe failure"),
            });
        }

        self.unsubscribes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(topic_path.to_string());

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
        self.closed.store(true, Ordering::SeqCst);
        self.set_connected(false);
        Ok(())
    }
}
