//! Per-client topic registry and default-topic bootstrap
//!
//! The registry owns every [`Topic`] handle for one client, keyed by topic
//! path, and routes inbound payloads to them. It also carries the
//! default-topic bootstrap: a configured topic set applied at most once,
//! deferred until the transport first reports connected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::topic::{PayloadEncoding, Topic};
use crate::transport::{InboundMessage, SubscribeOptions, TransportBinding};

/// Ceiling between connectivity re-checks while the bootstrap waits.
pub const BOOTSTRAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Options for registering a topic, usable directly or from config files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddTopicOptions {
    /// Subscribe immediately after registration.
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub subscribe_options: SubscribeOptions,
    #[serde(default)]
    pub encoding: PayloadEncoding,
}

/// Bootstrap progression. Moves strictly forward; `Applied` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapState {
    Pending,
    Applying,
    Applied,
}

/// Registry of topic handles for one client.
pub struct TopicRegistry {
    binding: Arc<dyn TransportBinding>,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    bootstrap: Mutex<BootstrapState>,
    bootstrap_task: Mutex<Option<JoinHandle<()>>>,
}

impl TopicRegistry {
    pub fn new(binding: Arc<dyn TransportBinding>) -> Arc<Self> {
        Arc::new(Self {
            binding,
            topics: Mutex::new(HashMap::new()),
            bootstrap: Mutex::new(BootstrapState::Pending),
            bootstrap_task: Mutex::new(None),
        })
    }

    /// Register a topic, returning the existing handle when the path is
    /// already present (its options are left untouched). A new handle
    /// subscribes immediately when the options ask for it.
    pub fn add_topic(&self, topic_path: &str, options: &AddTopicOptions) -> Arc<Topic> {
        let topic = {
            let mut topics = self.lock_topics();
            if let Some(existing) = topics.get(topic_path) {
                debug!(topic_path = %topic_path, "topic already registered, reusing handle");
                return existing.clone();
            }
            let topic = Topic::new(topic_path, options.encoding, self.binding.clone());
            topics.insert(topic_path.to_string(), topic.clone());
            topic
        };

        if options.subscribe {
            topic.subscribe(options.subscribe_options.clone());
        }
        topic
    }

    pub fn get(&self, topic_path: &str) -> Option<Arc<Topic>> {
        self.lock_topics().get(topic_path).cloned()
    }

    pub fn has_topic(&self, topic_path: &str) -> bool {
        self.lock_topics().contains_key(topic_path)
    }

    pub fn topic_paths(&self) -> Vec<String> {
        self.lock_topics().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock_topics().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_topics().is_empty()
    }

    /// Remove a topic and drop its subscription. Returns false when the path
    /// was never registered.
    pub fn remove_topic(&self, topic_path: &str) -> bool {
        let removed = self.lock_topics().remove(topic_path);
        match removed {
            Some(topic) => {
                topic.unsubscribe();
                true
            }
            None => false,
        }
    }

    /// Route one inbound payload to its topic handle. Payloads for unknown
    /// paths are dropped silently; wildcard broker subscriptions can deliver
    /// paths nothing registered.
    pub fn dispatch(&self, message: InboundMessage) {
        let topic = self.lock_topics().get(&message.topic_path).cloned();
        match topic {
            Some(topic) => topic.dispatch(message.payload),
            None => {
                trace!(topic_path = %message.topic_path, "dropping payload for unknown topic")
            }
        }
    }

    /// Schedule the configured default topics to apply once the transport
    /// first reports connected. At most one application ever happens per
    /// registry, no matter how connectivity flaps or how often this is
    /// called. An empty set completes the bootstrap immediately.
    pub fn apply_default_topics(self: &Arc<Self>, defaults: HashMap<String, AddTopicOptions>) {
        {
            let mut bootstrap = self.lock_bootstrap();
            if *bootstrap != BootstrapState::Pending {
                return;
            }
            if defaults.is_empty() {
                *bootstrap = BootstrapState::Applied;
                return;
            }
        }

        let mut task = self.lock_bootstrap_task();
        if task.is_some() {
            return;
        }
        let registry = self.clone();
        *task = Some(tokio::spawn(async move {
            registry.run_bootstrap(defaults).await;
        }));
    }

    pub fn is_bootstrap_applied(&self) -> bool {
        *self.lock_bootstrap() == BootstrapState::Applied
    }

    /// Abort the bootstrap task and every topic's pending attempt. Called on
    /// client close so no background task outlives its transport.
    pub(crate) fn cancel_all(&self) {
        if let Some(task) = self.lock_bootstrap_task().take() {
            task.abort();
        }
        for topic in self.lock_topics().values() {
            topic.cancel_pending();
        }
    }

    async fn run_bootstrap(self: Arc<Self>, defaults: HashMap<String, AddTopicOptions>) {
        let mut connectivity = self.binding.connectivity();
        while !*connectivity.borrow() {
            if *self.lock_bootstrap() != BootstrapState::Pending {
                return;
            }
            if let Ok(Err(_)) =
                tokio::time::timeout(BOOTSTRAP_POLL_INTERVAL, connectivity.changed()).await
            {
                // Transport gone; the bootstrap can never apply.
                return;
            }
        }

        {
            let mut bootstrap = self.lock_bootstrap();
            if *bootstrap != BootstrapState::Pending {
                return;
            }
            *bootstrap = BootstrapState::Applying;
        }

        for (topic_path, options) in &defaults {
            self.add_topic(topic_path, options);
        }

        *self.lock_bootstrap() = BootstrapState::Applied;
        info!(topics = defaults.len(), "default topics applied");
    }

    fn lock_topics(&self) -> MutexGuard<'_, HashMap<String, Arc<Topic>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bootstrap(&self) -> MutexGuard<'_, BootstrapState> {
        self.bootstrap.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_bootstrap_task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.bootstrap_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
