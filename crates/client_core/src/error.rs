use thiserror::Error;

const HTTP_UNAUTHORIZED: u16 = 401;

/// Failure of a single request against the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request to {url} failed with status {status}: {message}")]
    Status {
        url: String,
        status: u16,
        server_error_id: Option<String>,
        message: String,
    },
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server rejected the session itself. A 401 from the login
    /// route is a credentials problem, not an expired session.
    pub fn is_session_expired(&self) -> bool {
        match self {
            TransportError::Status { url, status, .. } => {
                *status == HTTP_UNAUTHORIZED && !url.contains("/login")
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{server_url} not found")]
    ServerNotFound { server_url: String },
    #[error("no client available for {server_url}")]
    ClientMissing { server_url: String },
    #[error("invalid server url '{server_url}': {message}")]
    InvalidServerUrl { server_url: String, message: String },
    #[error("failed to build http client for {server_url}: {message}")]
    ClientBuild { server_url: String, message: String },
}

/// Every way a thread fetch can fail. Rendered to callers as `{"error": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("{server_url} not found")]
    ServerNotFound { server_url: String },
    #[error(transparent)]
    ClientUnavailable(RegistryError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("local store failure for {server_url}: {message}")]
    Store { server_url: String, message: String },
    #[error("thread fetch for {server_url} did not complete: {message}")]
    Aborted { server_url: String, message: String },
}

impl FetchError {
    pub(crate) fn store(server_url: &str, err: anyhow::Error) -> Self {
        FetchError::Store {
            server_url: server_url.to_string(),
            message: format!("{err:#}"),
        }
    }
}
