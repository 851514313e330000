use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::registry::ServerConnectionRegistry;

/// Invoked when a server rejects the current session.
#[async_trait]
pub trait ForcedLogout: Send + Sync {
    async fn force_logout(&self, server_url: &str);
}

/// Tears the session down locally: forgets the current user and drops the
/// transport client. The connection entry itself stays registered.
pub struct LocalSessionTeardown {
    registry: Arc<ServerConnectionRegistry>,
}

impl LocalSessionTeardown {
    pub fn new(registry: Arc<ServerConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ForcedLogout for LocalSessionTeardown {
    async fn force_logout(&self, server_url: &str) {
        let Some(storage) = self.registry.storage(server_url).await else {
            return;
        };
        if let Err(err) = storage.clear_current_user_id().await {
            warn!(server_url, "session: failed to clear current user: {err:#}");
        }
        self.registry.detach_client(server_url).await;
        info!(server_url, "session: forced logout after session rejection");
    }
}
