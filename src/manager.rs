//! Named-client registry and process shutdown hook
//!
//! Holds one [`QueueClient`] per name. Lookups are create-if-absent so
//! independent call sites asking for the same name share one connection.
//! Removal closes the client; the shutdown hook closes everything on
//! SIGINT/SIGTERM.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::QueueClient;
use crate::config::{ClientConfig, ManagerConfig};
use crate::error::{QueueError, QueueResult};

/// Registry of named clients.
#[derive(Default)]
pub struct ClientManager {
    clients: Mutex<HashMap<String, Arc<QueueClient>>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect every client a [`ManagerConfig`] declares, concurrently.
    ///
    /// All-or-nothing: when any connect fails the already-connected clients
    /// are closed and the first error is returned.
    pub async fn build(config: ManagerConfig) -> QueueResult<Arc<Self>> {
        let connects = config.clients.into_iter().map(|(name, client_config)| {
            async move {
                let client = QueueClient::connect(&name, client_config).await?;
                Ok::<_, QueueError>((name, client))
            }
        });
        let results = futures::future::join_all(connects).await;

        let mut connected = Vec::new();
        let mut failure = None;
        for result in results {
            match result {
                Ok(pair) => connected.push(pair),
                Err(error) => {
                    if failure.is_none() {
                        failure = Some(error);
                    }
                }
            }
        }

        if let Some(error) = failure {
            for (_, client) in connected {
                let _ = client.close().await;
            }
            return Err(error);
        }

        let manager = Arc::new(Self::new());
        {
            let mut clients = manager.clients.lock().await;
            for (name, client) in connected {
                clients.insert(name, client);
            }
        }
        Ok(manager)
    }

    /// Get the named client, connecting it if absent. The registry lock is
    /// held across the connect so concurrent callers for one name never
    /// produce two connections.
    pub async fn add_client(
        &self,
        name: &str,
        config: ClientConfig,
    ) -> QueueResult<Arc<QueueClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(name) {
            debug!(client = %name, "client already registered, reusing");
            return Ok(existing.clone());
        }

        let client = QueueClient::connect(name, config).await?;
        clients.insert(name.to_string(), client.clone());
        info!(client = %name, "client registered");
        Ok(client)
    }

    /// Register an externally built client under its own name, returning the
    /// existing one when the name is taken.
    pub async fn adopt(&self, client: Arc<QueueClient>) -> Arc<QueueClient> {
        let mut clients = self.clients.lock().await;
        if let Some(existing) = clients.get(client.name()) {
            return existing.clone();
        }
        clients.insert(client.name().to_string(), client.clone());
        client
    }

    pub async fn get(&self, name: &str) -> Option<Arc<QueueClient>> {
        self.clients.lock().await.get(name).cloned()
    }

    pub async fn has_client(&self, name: &str) -> bool {
        self.clients.lock().await.contains_key(name)
    }

    pub async fn client_names(&self) -> Vec<String> {
        self.clients.lock().await.keys().cloned().collect()
    }

    /// Remove and close the named client. Returns false when the name was
    /// never registered.
    pub async fn remove_client(&self, name: &str) -> QueueResult<bool> {
        let removed = self.clients.lock().await.remove(name);
        match removed {
            Some(client) => {
                client.close().await?;
                info!(client = %name, "client removed and closed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every registered client, continuing past individual failures.
    pub async fn close_all(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (name, client) in clients {
            if let Err(error) = client.close().await {
                warn!(client = %name, error = %error, "error closing client");
            }
        }
    }

    /// Close every client when the process receives a shutdown signal.
    pub fn spawn_shutdown_hook(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received, closing all clients");
            manager.close_all().await;
        })
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => debug!("received SIGINT"),
                _ = sigterm.recv() => debug!("received SIGTERM"),
            }
        }
        _ => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
