use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde_json::{json, Value};
use shared::{
    domain::{TeamId, ThreadId},
    protocol::{RawThread, RawThreadPage},
};
use storage::Storage;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    config::ClientSettings,
    error::FetchError,
    registry::ServerConnectionRegistry,
    session::{ForcedLogout, LocalSessionTeardown},
    transport::ThreadsQuery,
};

/// Persists fetched threads into a server's local store.
#[async_trait]
pub trait ThreadIngestor: Send + Sync {
    async fn ingest(
        &self,
        server_url: &str,
        storage: &Storage,
        team_id: &TeamId,
        threads: &[RawThread],
    ) -> anyhow::Result<()>;
}

pub struct StorageThreadIngestor;

#[async_trait]
impl ThreadIngestor for StorageThreadIngestor {
    async fn ingest(
        &self,
        server_url: &str,
        storage: &Storage,
        team_id: &TeamId,
        threads: &[RawThread],
    ) -> anyhow::Result<()> {
        let summary = storage.ingest_threads(team_id, threads).await?;
        debug!(
            server_url,
            team_id = %team_id,
            threads = summary.threads,
            participants_created = summary.participants_created,
            participants_deleted = summary.participants_deleted,
            "threads: page ingested"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchThreadsRequest {
    pub team_id: TeamId,
    pub query: ThreadsQuery,
}

impl FetchThreadsRequest {
    pub fn new(team_id: impl Into<TeamId>) -> Self {
        Self {
            team_id: team_id.into(),
            query: ThreadsQuery::default(),
        }
    }

    pub fn before(mut self, thread_id: impl Into<ThreadId>) -> Self {
        self.query.before = Some(thread_id.into());
        self
    }

    pub fn after(mut self, thread_id: impl Into<ThreadId>) -> Self {
        self.query.after = Some(thread_id.into());
        self
    }

    pub fn per_page(mut self, per_page: u32) -> Self {
        self.query.per_page = per_page;
        self
    }

    pub fn deleted(mut self, deleted: bool) -> Self {
        self.query.deleted = deleted;
        self
    }

    pub fn unread(mut self, unread: bool) -> Self {
        self.query.unread = unread;
        self
    }

    pub fn since(mut self, since: i64) -> Self {
        self.query.since = since;
        self
    }
}

/// Result of one fetch. The three variants have distinct envelope shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchThreadsOutcome {
    Page(RawThreadPage),
    /// The server is known but no user is logged in on it yet.
    NotInitialized,
    Failed(FetchError),
}

impl FetchThreadsOutcome {
    pub fn page(&self) -> Option<&RawThreadPage> {
        match self {
            FetchThreadsOutcome::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchThreadsOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Page object on success, `[]` when not initialized, `{"error": ...}` on failure.
    pub fn to_envelope(&self) -> Value {
        match self {
            FetchThreadsOutcome::Page(page) => serde_json::to_value(page)
                .unwrap_or_else(|err| json!({ "error": err.to_string() })),
            FetchThreadsOutcome::NotInitialized => json!([]),
            FetchThreadsOutcome::Failed(err) => json!({ "error": err.to_string() }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FetchKey {
    server_url: String,
    request: FetchThreadsRequest,
}

type SharedFetch = Shared<BoxFuture<'static, FetchThreadsOutcome>>;

struct CoordinatorDeps {
    registry: Arc<ServerConnectionRegistry>,
    ingestor: Arc<dyn ThreadIngestor>,
    forced_logout: Arc<dyn ForcedLogout>,
}

/// Runs fetch-and-persist cycles for thread pages.
///
/// Every fetch runs on its own task, so a caller that stops waiting does not
/// cancel the request or the store write that follows it. With coalescing
/// enabled, identical concurrent requests share one in-flight result.
pub struct ThreadFetchCoordinator {
    deps: Arc<CoordinatorDeps>,
    coalesce: bool,
    inflight: Arc<Mutex<HashMap<FetchKey, SharedFetch>>>,
}

impl ThreadFetchCoordinator {
    pub fn new(registry: Arc<ServerConnectionRegistry>, settings: &ClientSettings) -> Self {
        let forced_logout = Arc::new(LocalSessionTeardown::new(Arc::clone(&registry)));
        Self::new_with_dependencies(
            registry,
            Arc::new(StorageThreadIngestor),
            forced_logout,
            settings.coalesce_inflight_fetches,
        )
    }

    pub fn new_with_dependencies(
        registry: Arc<ServerConnectionRegistry>,
        ingestor: Arc<dyn ThreadIngestor>,
        forced_logout: Arc<dyn ForcedLogout>,
        coalesce: bool,
    ) -> Self {
        Self {
            deps: Arc::new(CoordinatorDeps {
                registry,
                ingestor,
                forced_logout,
            }),
            coalesce,
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn fetch_threads(
        &self,
        server_url: &str,
        request: FetchThreadsRequest,
    ) -> FetchThreadsOutcome {
        if !self.coalesce {
            return spawn_fetch(Arc::clone(&self.deps), server_url.to_string(), request).await;
        }

        let key = FetchKey {
            server_url: server_url.to_string(),
            request,
        };
        let shared = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(&key) {
                debug!(server_url, team_id = %key.request.team_id, "threads: joining in-flight fetch");
                existing.clone()
            } else {
                let deps = Arc::clone(&self.deps);
                let inflight_map = Arc::clone(&self.inflight);
                let task_key = key.clone();
                // Released by the task, not by a waiting caller.
                let task = tokio::spawn(async move {
                    let outcome = spawn_fetch(
                        deps,
                        task_key.server_url.clone(),
                        task_key.request.clone(),
                    )
                    .await;
                    inflight_map.lock().await.remove(&task_key);
                    outcome
                });
                let fetch = join_fetch(server_url.to_string(), task).boxed().shared();
                inflight.insert(key, fetch.clone());
                fetch
            }
        };
        shared.await
    }
}

async fn spawn_fetch(
    deps: Arc<CoordinatorDeps>,
    server_url: String,
    request: FetchThreadsRequest,
) -> FetchThreadsOutcome {
    let task_server_url = server_url.clone();
    let task = tokio::spawn(async move { deps.fetch_once(&task_server_url, &request).await });
    join_fetch(server_url, task).await
}

async fn join_fetch(
    server_url: String,
    task: JoinHandle<FetchThreadsOutcome>,
) -> FetchThreadsOutcome {
    match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(%server_url, "threads: fetch task failed: {err}");
            FetchThreadsOutcome::Failed(FetchError::Aborted {
                server_url,
                message: err.to_string(),
            })
        }
    }
}

impl CoordinatorDeps {
    async fn fetch_once(
        &self,
        server_url: &str,
        request: &FetchThreadsRequest,
    ) -> FetchThreadsOutcome {
        let Some(storage) = self.registry.storage(server_url).await else {
            warn!(server_url, "threads: no local store registered for server");
            return FetchThreadsOutcome::Failed(FetchError::ServerNotFound {
                server_url: server_url.to_string(),
            });
        };

        let client = match self.registry.client(server_url).await {
            Ok(client) => client,
            Err(err) => {
                warn!(server_url, "threads: client unavailable: {err}");
                return FetchThreadsOutcome::Failed(FetchError::ClientUnavailable(err));
            }
        };

        let user_id = match storage.current_user_id().await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => {
                debug!(server_url, "threads: no current user yet, skipping fetch");
                return FetchThreadsOutcome::NotInitialized;
            }
            Err(err) => return FetchThreadsOutcome::Failed(FetchError::store(server_url, err)),
        };

        let config = match storage.server_config().await {
            Ok(config) => config,
            Err(err) => return FetchThreadsOutcome::Failed(FetchError::store(server_url, err)),
        };

        let page = match client
            .get_threads(&config.version, &user_id, &request.team_id, &request.query)
            .await
        {
            Ok(page) => page,
            Err(err) => {
                if err.is_session_expired() {
                    warn!(server_url, "threads: session rejected by server, forcing logout");
                    self.forced_logout.force_logout(server_url).await;
                } else {
                    warn!(server_url, team_id = %request.team_id, "threads: fetch failed: {err}");
                }
                return FetchThreadsOutcome::Failed(FetchError::Transport(err));
            }
        };

        if let Err(err) = self
            .ingestor
            .ingest(server_url, &storage, &request.team_id, &page.threads)
            .await
        {
            error!(server_url, team_id = %request.team_id, "threads: failed to persist page: {err:#}");
            return FetchThreadsOutcome::Failed(FetchError::store(server_url, err));
        }

        info!(
            server_url,
            team_id = %request.team_id,
            thread_count = page.threads.len(),
            total = page.total,
            "threads: fetched page"
        );
        FetchThreadsOutcome::Page(page)
    }
}

#[cfg(test)]
#[path = "tests/threads_tests.rs"]
mod tests;
