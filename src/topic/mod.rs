//! Topic lifecycle, retry engine, and message fan-out
//!
//! A [`Topic`] is the caller-facing handle for one broker topic path. It
//! tracks durable subscription intent separately from observed status,
//! retries operations around connectivity gaps, and fans inbound payloads
//! out to raw, text, and JSON listeners.
//!
//! Retry discipline differs per operation:
//!
//! - publish waits out a bounded budget for connectivity, then attempts the
//!   broker call exactly once
//! - subscribe is fire-and-forget and waits for connectivity without bound;
//!   the attempt settles as status plus a subscription-result event
//! - unsubscribe drops the subscription locally at once and performs the
//!   broker call as background cleanup, swallowing failures
//!
//! Each new subscribe/unsubscribe call supersedes any still-pending one: the
//! most recent intent wins, enforced by a generation counter and task abort.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{QueueError, QueueResult};
use crate::transport::{PublishOptions, PublishReceipt, SubscribeOptions, TransportBinding};

pub mod events;
pub mod registry;

pub use events::{ListenerId, ListenerSet, SubscriptionResult};
pub use registry::{AddTopicOptions, TopicRegistry};

/// Gap between connectivity re-checks while a publish waits.
pub const PUBLISH_RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// Default publish retry budget in seconds.
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 5;
/// Gap between connectivity re-checks while a subscribe waits.
pub const SUBSCRIBE_RETRY_INTERVAL: Duration = Duration::from_millis(200);
/// Gap between connectivity re-checks while an unsubscribe waits.
pub const UNSUBSCRIBE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Observed subscription status, distinct from the caller's durable intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Unsubscribed,
    /// Intent registered; waiting on connectivity or broker acceptance.
    Subscribing,
    Subscribed,
    /// The broker rejected the subscription while connected.
    SubscriptionFailed(String),
}

/// How inbound payload bytes become text for the text and JSON listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    #[default]
    Utf8,
    Latin1,
}

impl PayloadEncoding {
    /// Decode bytes to text. Lossy by design: message fan-out never fails,
    /// malformed input degrades to replacement characters.
    pub fn decode(&self, payload: &[u8]) -> String {
        match self {
            PayloadEncoding::Utf8 => String::from_utf8_lossy(payload).into_owned(),
            PayloadEncoding::Latin1 => payload.iter().map(|&b| b as char).collect(),
        }
    }
}

struct TopicState {
    intent_subscribed: bool,
    status: SubscriptionStatus,
    published: u64,
    received: u64,
    /// Bumped on every subscribe/unsubscribe and on cancellation. A pending
    /// task compares its captured generation before committing any outcome.
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

/// Handle for one topic path on one client.
pub struct Topic {
    topic_path: String,
    encoding: PayloadEncoding,
    binding: Arc<dyn TransportBinding>,
    state: Mutex<TopicState>,
    raw_listeners: ListenerSet<Bytes>,
    text_listeners: ListenerSet<String>,
    json_listeners: ListenerSet<serde_json::Value>,
    subscription_listeners: ListenerSet<SubscriptionResult>,
}

impl Topic {
    pub fn new(
        topic_path: impl Into<String>,
        encoding: PayloadEncoding,
        binding: Arc<dyn TransportBinding>,
    ) -> Arc<Self> {
        Arc::new(Self {
            topic_path: topic_path.into(),
            encoding,
            binding,
            state: Mutex::new(TopicState {
                intent_subscribed: false,
                status: SubscriptionStatus::Unsubscribed,
                published: 0,
                received: 0,
                generation: 0,
                pending: None,
            }),
            raw_listeners: ListenerSet::default(),
            text_listeners: ListenerSet::default(),
            json_listeners: ListenerSet::default(),
            subscription_listeners: ListenerSet::default(),
        })
    }

    pub fn topic_path(&self) -> &str {
        &self.topic_path
    }

    pub fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.lock_state().status.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock_state().status == SubscriptionStatus::Subscribed
    }

    pub fn is_subscribing(&self) -> bool {
        self.lock_state().status == SubscriptionStatus::Subscribing
    }

    pub fn subscription_failed_reason(&self) -> Option<String> {
        match &self.lock_state().status {
            SubscriptionStatus::SubscriptionFailed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Count of payloads the broker accepted from this topic handle.
    pub fn published_messages(&self) -> u64 {
        self.lock_state().published
    }

    /// Count of inbound payloads fanned out to listeners.
    pub fn received_messages(&self) -> u64 {
        self.lock_state().received
    }

    // Listener registration. Each returns a handle scoped to its event kind.

    pub fn on_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.raw_listeners.add(callback)
    }

    pub fn on_text_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.text_listeners.add(callback)
    }

    pub fn on_json_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.json_listeners.add(callback)
    }

    pub fn on_subscription_result<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SubscriptionResult) + Send + Sync + 'static,
    {
        self.subscription_listeners.add(callback)
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        self.raw_listeners.remove(id)
    }

    pub fn remove_text_message_listener(&self, id: ListenerId) -> bool {
        self.text_listeners.remove(id)
    }

    pub fn remove_json_message_listener(&self, id: ListenerId) -> bool {
        self.json_listeners.remove(id)
    }

    pub fn remove_subscription_result_listener(&self, id: ListenerId) -> bool {
        self.subscription_listeners.remove(id)
    }

    /// Publish with default delivery options and the default retry budget.
    pub async fn publish(&self, payload: impl Into<Bytes>) -> QueueResult<PublishReceipt> {
        self.publish_with_options(
            payload,
            &PublishOptions::default(),
            DEFAULT_PUBLISH_TIMEOUT_SECS,
        )
        .await
    }

    /// Publish, waiting up to `timeout_secs` for connectivity first.
    ///
    /// The budget covers only the wait for connectivity. Once connected the
    /// broker call happens exactly once and a broker rejection propagates
    /// unretried. A zero budget publishes only when already connected.
    pub async fn publish_with_options(
        &self,
        payload: impl Into<Bytes>,
        options: &PublishOptions,
        timeout_secs: u64,
    ) -> QueueResult<PublishReceipt> {
        let payload = payload.into();
        let mut connectivity = self.binding.connectivity();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);

        while !*connectivity.borrow() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                warn!(
                    topic_path = %self.topic_path,
                    timeout_secs,
                    "publish abandoned: no connection within retry budget"
                );
                return Err(QueueError::PublishNotConnected {
                    topic_path: self.topic_path.clone(),
                });
            }
            // Wakes immediately on a connectivity flip, re-checks at the
            // retry interval otherwise. The budget is a wall-clock deadline,
            // so wakeups from flapping connectivity never consume it.
            let ceiling = deadline.min(now + PUBLISH_RETRY_INTERVAL);
            if let Ok(Err(_)) = tokio::time::timeout_at(ceiling, connectivity.changed()).await {
                // Transport gone; connectivity can never come back.
                return Err(QueueError::PublishNotConnected {
                    topic_path: self.topic_path.clone(),
                });
            }
        }

        let receipt = self
            .binding
            .publish(&self.topic_path, payload, options)
            .await?;
        if receipt.published {
            self.lock_state().published += 1;
        }
        Ok(receipt)
    }

    /// Register subscription intent and return immediately.
    ///
    /// The attempt runs in the background: it waits for connectivity without
    /// bound, issues the broker call once, and settles as status plus a
    /// subscription-result event. Calling again while an attempt is pending
    /// supersedes that attempt.
    pub fn subscribe(self: &Arc<Self>, options: SubscribeOptions) {
        let generation = {
            let mut state = self.lock_state();
            state.intent_subscribed = true;
            state.status = SubscriptionStatus::Subscribing;
            state.generation += 1;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            state.generation
        };

        debug!(topic_path = %self.topic_path, "subscription intent registered");
        let topic = self.clone();
        let handle = tokio::spawn(async move {
            topic.run_subscribe(generation, options).await;
        });
        self.store_pending(generation, handle);
    }

    /// Drop the subscription. Takes local effect immediately: status reads
    /// `Unsubscribed` and inbound payloads stop fanning out, including any
    /// that arrive while the broker-side unsubscribe is still in flight.
    /// That cleanup runs in the background and its failure is swallowed,
    /// because local intent already changed and a reconnect will not replay
    /// a subscription the caller revoked.
    pub fn unsubscribe(self: &Arc<Self>) {
        let (generation, needs_broker) = {
            let mut state = self.lock_state();
            state.intent_subscribed = false;
            state.generation += 1;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
            let needs_broker = state.status == SubscriptionStatus::Subscribed;
            state.status = SubscriptionStatus::Unsubscribed;
            (state.generation, needs_broker)
        };

        debug!(topic_path = %self.topic_path, "subscription intent revoked");
        if !needs_broker {
            // Never reached the broker, nothing to clean up there.
            return;
        }

        let topic = self.clone();
        let handle = tokio::spawn(async move {
            topic.run_unsubscribe(generation).await;
        });
        self.store_pending(generation, handle);
    }

    /// Fan one inbound payload out to listeners. Payloads arriving while the
    /// topic is not subscribing or subscribed are dropped uncounted.
    pub(crate) fn dispatch(&self, payload: Bytes) {
        {
            let mut state = self.lock_state();
            match state.status {
                SubscriptionStatus::Subscribing | SubscriptionStatus::Subscribed => {
                    state.received += 1;
                }
                _ => {
                    trace!(
                        topic_path = %self.topic_path,
                        "dropping payload for inactive subscription"
                    );
                    return;
                }
            }
        }

        self.raw_listeners.emit(&payload);

        if self.text_listeners.is_empty() && self.json_listeners.is_empty() {
            return;
        }
        let text = self.encoding.decode(&payload);
        self.text_listeners.emit(&text);

        if !self.json_listeners.is_empty() {
            let value = serde_json::from_str(&text)
                .unwrap_or_else(|_| serde_json::json!({ "invalidJson": true }));
            self.json_listeners.emit(&value);
        }
    }

    /// Abort any pending background attempt and invalidate its outcome.
    pub(crate) fn cancel_pending(&self) {
        let mut state = self.lock_state();
        state.generation += 1;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
    }

    async fn run_subscribe(self: Arc<Self>, generation: u64, options: SubscribeOptions) {
        if !self
            .wait_until_connected(generation, SUBSCRIBE_RETRY_INTERVAL)
            .await
        {
            return;
        }

        let result = self.binding.subscribe(&self.topic_path, &options).await;

        {
            let mut state = self.lock_state();
            if state.generation != generation {
                // Superseded while the broker call was in flight.
                return;
            }
            state.status = match &result {
                Ok(_) => SubscriptionStatus::Subscribed,
                Err(error) => SubscriptionStatus::SubscriptionFailed(error.to_string()),
            };
            state.pending = None;
        }

        match result {
            Ok(_) => {
                debug!(topic_path = %self.topic_path, "subscribed");
                self.subscription_listeners.emit(&SubscriptionResult::success());
            }
            Err(error) => {
                warn!(topic_path = %self.topic_path, error = %error, "subscription rejected");
                self.subscription_listeners
                    .emit(&SubscriptionResult::failure(error.to_string()));
            }
        }
    }

    async fn run_unsubscribe(self: Arc<Self>, generation: u64) {
        if !self
            .wait_until_connected(generation, UNSUBSCRIBE_RETRY_INTERVAL)
            .await
        {
            return;
        }

        match self.binding.unsubscribe(&self.topic_path).await {
            Ok(_) => debug!(topic_path = %self.topic_path, "unsubscribed at broker"),
            Err(error) => {
                // Local state already reads Unsubscribed; the broker-side
                // cleanup failing changes nothing for the caller.
                warn!(
                    topic_path = %self.topic_path,
                    error = %error,
                    "broker unsubscribe failed, subscription already dropped locally"
                );
            }
        }

        let mut state = self.lock_state();
        if state.generation == generation {
            state.pending = None;
        }
    }

    /// Wait until the transport reports connected, waking on flips and
    /// re-checking at `interval` otherwise. Returns false when this attempt
    /// was superseded or the transport went away.
    async fn wait_until_connected(&self, generation: u64, interval: Duration) -> bool {
        let mut connectivity = self.binding.connectivity();
        loop {
            if self.lock_state().generation != generation {
                return false;
            }
            if *connectivity.borrow() {
                return true;
            }
            if let Ok(Err(_)) = tokio::time::timeout(interval, connectivity.changed()).await {
                return false;
            }
        }
    }

    fn store_pending(&self, generation: u64, handle: JoinHandle<()>) {
        let mut state = self.lock_state();
        if state.generation == generation {
            state.pending = Some(handle);
        } else {
            handle.abort();
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TopicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockBinding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_topic_starts_unsubscribed_with_zero_counters() {
        let binding = MockBinding::connected();
        let topic = Topic::new("sensors/1", PayloadEncoding::Utf8, binding);
        assert_eq!(topic.status(), SubscriptionStatus::Unsubscribed);
        assert_eq!(topic.published_messages(), 0);
        assert_eq!(topic.received_messages(), 0);
        assert!(!topic.is_subscribed());
        assert!(!topic.is_subscribing());
    }

    #[test]
    fn test_payload_encoding_decode() {
        assert_eq!(PayloadEncoding::Utf8.decode(b"hello"), "hello");
        // 0xE9 is e-acute in Latin-1 but invalid standalone UTF-8.
        assert_eq!(PayloadEncoding::Latin1.decode(&[0xE9]), "\u{e9}");
        assert_eq!(PayloadEncoding::Utf8.decode(&[0xE9]), "\u{fffd}");
    }

    #[tokio::test]
    async fn test_dispatch_drops_payloads_when_unsubscribed() {
        let binding = MockBinding::connected();
        let topic = Topic::new("sensors/1", PayloadEncoding::Utf8, binding);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        topic.on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        topic.dispatch(Bytes::from_static(b"dropped"));
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(topic.received_messages(), 0);
    }

    #[tokio::test]
    async fn test_invalid_json_payload_yields_sentinel() {
        let binding = MockBinding::connected();
        let topic = Topic::new("sensors/1", PayloadEncoding::Utf8, binding);
        topic.subscribe(SubscribeOptions::default());

        let values = Arc::new(Mutex::new(Vec::new()));
        let sink = values.clone();
        topic.on_json_message(move |value: &serde_json::Value| {
            sink.lock().unwrap().push(value.clone());
        });

        topic.dispatch(Bytes::from_static(b"{not json"));
        topic.dispatch(Bytes::from_static(b"{\"a\": 1}"));

        let values = values.lock().unwrap();
        assert_eq!(values[0], serde_json::json!({ "invalidJson": true }));
        assert_eq!(values[1]["a"], 1);
    }

    #[tokio::test]
    async fn test_publish_increments_counter_on_acceptance() {
        let binding = MockBinding::connected();
        let topic = Topic::new("sensors/1", PayloadEncoding::Utf8, binding.clone());

        topic.publish("reading").await.expect("publish");
        assert_eq!(topic.published_messages(), 1);
        assert_eq!(binding.published_records().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_rejection_propagates_without_counting() {
        let binding = MockBinding::connected();
        binding.set_publish_failure(true);
        let topic = Topic::new("sensors/1", PayloadEncoding::Utf8, binding);

        let result = topic.publish("reading").await;
        assert!(matches!(result, Err(QueueError::Transport(_))));
        assert_eq!(topic.published_messages(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_with_zero_budget_fails_fast_when_disconnected() {
        let binding = MockBinding::disconnected();
        let topic = Topic::new("sensors/1", PayloadEncoding::Utf8, binding);

        let result = topic
            .publish_with_options("reading", &PublishOptions::default(), 0)
            .await;
        assert!(matches!(result, Err(QueueError::PublishNotConnected { .. })));
    }
}
