use std::{collections::HashMap, sync::Arc, time::Duration};

use storage::Storage;
use tokio::sync::RwLock;
use tracing::info;

use crate::{
    error::RegistryError,
    transport::{HttpThreadTransport, ThreadTransport},
};

struct ServerConnection {
    storage: Storage,
    client: Option<Arc<dyn ThreadTransport>>,
}

/// Server url → local store and transport client.
///
/// Entries are added and removed by whoever owns session lifecycle; the fetch
/// and realtime paths only look them up.
#[derive(Default)]
pub struct ServerConnectionRegistry {
    connections: RwLock<HashMap<String, ServerConnection>>,
}

fn registry_key(server_url: &str) -> String {
    server_url.trim().trim_end_matches('/').to_string()
}

impl ServerConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the store for a server. A previous entry for the same url is
    /// replaced, and its client is dropped with it.
    pub async fn register(&self, server_url: &str, storage: Storage) {
        let key = registry_key(server_url);
        info!(server_url = %key, "registry: server connection registered");
        self.connections.write().await.insert(
            key,
            ServerConnection {
                storage,
                client: None,
            },
        );
    }

    pub async fn unregister(&self, server_url: &str) -> bool {
        let removed = self
            .connections
            .write()
            .await
            .remove(&registry_key(server_url))
            .is_some();
        if removed {
            info!(server_url, "registry: server connection removed");
        }
        removed
    }

    pub async fn attach_client(
        &self,
        server_url: &str,
        client: Arc<dyn ThreadTransport>,
    ) -> Result<(), RegistryError> {
        let mut connections = self.connections.write().await;
        let connection = connections
            .get_mut(&registry_key(server_url))
            .ok_or_else(|| RegistryError::ServerNotFound {
                server_url: server_url.to_string(),
            })?;
        connection.client = Some(client);
        Ok(())
    }

    /// Builds an HTTP transport for the server and attaches it.
    pub async fn attach_http_client(
        &self,
        server_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<(), RegistryError> {
        let transport = HttpThreadTransport::new(server_url, token, timeout)?;
        self.attach_client(server_url, Arc::new(transport)).await
    }

    pub async fn detach_client(&self, server_url: &str) {
        if let Some(connection) = self
            .connections
            .write()
            .await
            .get_mut(&registry_key(server_url))
        {
            connection.client = None;
        }
    }

    pub async fn storage(&self, server_url: &str) -> Option<Storage> {
        self.connections
            .read()
            .await
            .get(&registry_key(server_url))
            .map(|connection| connection.storage.clone())
    }

    pub async fn client(&self, server_url: &str) -> Result<Arc<dyn ThreadTransport>, RegistryError> {
        let connections = self.connections.read().await;
        let connection =
            connections
                .get(&registry_key(server_url))
                .ok_or_else(|| RegistryError::ServerNotFound {
                    server_url: server_url.to_string(),
                })?;
        connection
            .client
            .clone()
            .ok_or_else(|| RegistryError::ClientMissing {
                server_url: server_url.to_string(),
            })
    }

    pub async fn server_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.connections.read().await.keys().cloned().collect();
        urls.sort();
        urls
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
