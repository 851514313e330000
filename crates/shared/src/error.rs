use serde::{Deserialize, Serialize};

/// Error body returned by the remote server on non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorBody {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub request_id: String,
}

impl ServerErrorBody {
    pub fn new(id: impl Into<String>, message: impl Into<String>, status_code: u16) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            status_code,
            request_id: String::new(),
        }
    }
}
