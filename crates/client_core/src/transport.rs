use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{TeamId, ThreadId, UserId},
    error::ServerErrorBody,
    protocol::RawThreadPage,
};
use tracing::debug;
use url::Url;

use crate::error::{RegistryError, TransportError};

pub const DEFAULT_THREADS_PER_PAGE: u32 = 60;

/// Pagination cursors and filters for one threads request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadsQuery {
    pub before: Option<ThreadId>,
    pub after: Option<ThreadId>,
    pub per_page: u32,
    pub deleted: bool,
    pub unread: bool,
    pub since: i64,
}

impl Default for ThreadsQuery {
    fn default() -> Self {
        Self {
            before: None,
            after: None,
            per_page: DEFAULT_THREADS_PER_PAGE,
            deleted: false,
            unread: false,
            since: 0,
        }
    }
}

/// Remote source of thread pages. One instance per server connection.
#[async_trait]
pub trait ThreadTransport: Send + Sync {
    async fn get_threads(
        &self,
        server_version: &str,
        user_id: &UserId,
        team_id: &TeamId,
        query: &ThreadsQuery,
    ) -> Result<RawThreadPage, TransportError>;
}

/// Compares a dotted server version against `major.minor.dot`.
///
/// Each component is read up to its first non-digit, missing components count
/// as zero, and a version without a readable major component is never
/// considered recent enough.
pub fn is_minimum_server_version(version: &str, major: u32, minor: u32, dot: u32) -> bool {
    let mut parts = version.trim().split('.').map(leading_number);
    let Some(Some(server_major)) = parts.next() else {
        return false;
    };
    let server_minor = parts.next().flatten().unwrap_or(0);
    let server_dot = parts.next().flatten().unwrap_or(0);
    (server_major, server_minor, server_dot) >= (major, minor, dot)
}

fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Query string pairs for the threads route. Servers from 6.0 on read the page
/// size from `per_page`; older ones from `pageSize`.
pub fn threads_query_pairs(server_version: &str, query: &ThreadsQuery) -> Vec<(&'static str, String)> {
    let page_size_key = if is_minimum_server_version(server_version, 6, 0, 0) {
        "per_page"
    } else {
        "pageSize"
    };
    vec![
        (
            "before",
            query.before.as_ref().map(ToString::to_string).unwrap_or_default(),
        ),
        (
            "after",
            query.after.as_ref().map(ToString::to_string).unwrap_or_default(),
        ),
        ("deleted", query.deleted.to_string()),
        ("unread", query.unread.to_string()),
        ("since", query.since.to_string()),
        (page_size_key, query.per_page.to_string()),
    ]
}

pub struct HttpThreadTransport {
    http: Client,
    server_url: String,
    token: Option<String>,
}

impl HttpThreadTransport {
    pub fn new(
        server_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let parsed = Url::parse(server_url).map_err(|err| RegistryError::InvalidServerUrl {
            server_url: server_url.to_string(),
            message: err.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(RegistryError::InvalidServerUrl {
                server_url: server_url.to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RegistryError::ClientBuild {
                server_url: server_url.to_string(),
                message: err.to_string(),
            })?;

        Ok(Self {
            http,
            server_url: server_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn threads_route(&self, user_id: &UserId, team_id: &TeamId) -> String {
        format!(
            "{}/api/v4/users/{user_id}/teams/{team_id}/threads",
            self.server_url
        )
    }
}

#[async_trait]
impl ThreadTransport for HttpThreadTransport {
    async fn get_threads(
        &self,
        server_version: &str,
        user_id: &UserId,
        team_id: &TeamId,
        query: &ThreadsQuery,
    ) -> Result<RawThreadPage, TransportError> {
        let url = self.threads_route(user_id, team_id);
        let mut request = self
            .http
            .get(&url)
            .query(&threads_query_pairs(server_version, query));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|err| TransportError::Network {
                url: url.clone(),
                message: err.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| TransportError::Network {
                url: url.clone(),
                message: err.to_string(),
            })?;

        if !status.is_success() {
            let server_error = serde_json::from_str::<ServerErrorBody>(&body).unwrap_or_default();
            debug!(%url, status = status.as_u16(), error_id = %server_error.id, "threads: request rejected");
            let message = if server_error.message.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string()
            } else {
                server_error.message
            };
            return Err(TransportError::Status {
                url,
                status: status.as_u16(),
                server_error_id: Some(server_error.id).filter(|id| !id.is_empty()),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|err| TransportError::Decode {
            url,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
