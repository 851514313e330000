//! Thread synchronization for a multi-server chat client.
//!
//! [`ThreadFetchCoordinator`] pulls thread pages from a server and hands them
//! to the local store, where participant sets are reconciled against the
//! fetched snapshot. [`RealtimeGroupEventRouter`] applies group events pushed
//! over the websocket. Both resolve servers through an injected
//! [`ServerConnectionRegistry`].

pub mod config;
pub mod error;
pub mod groups;
pub mod registry;
pub mod session;
pub mod threads;
pub mod transport;
pub mod websocket;

pub use config::{load_settings, ClientSettings};
pub use error::{FetchError, RegistryError, TransportError};
pub use groups::{GroupEventOutcome, RealtimeGroupEventRouter, RouterStats};
pub use registry::ServerConnectionRegistry;
pub use session::{ForcedLogout, LocalSessionTeardown};
pub use threads::{
    FetchThreadsOutcome, FetchThreadsRequest, StorageThreadIngestor, ThreadFetchCoordinator,
    ThreadIngestor,
};
pub use transport::{
    is_minimum_server_version, HttpThreadTransport, ThreadTransport, ThreadsQuery,
    DEFAULT_THREADS_PER_PAGE,
};
pub use websocket::spawn_group_event_listener;
