use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(TeamId);
id_newtype!(ChannelId);
id_newtype!(PostId);
id_newtype!(ThreadId);
id_newtype!(GroupId);

/// Local participant row: "this user has participated in this thread".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThreadParticipant {
    pub thread_id: ThreadId,
    pub user_id: UserId,
}

impl ThreadParticipant {
    pub fn new(thread_id: ThreadId, user_id: UserId) -> Self {
        Self { thread_id, user_id }
    }
}

/// Server configuration values needed for request negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "BuildNumber", default)]
    pub build_number: String,
}

impl ServerConfig {
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            build_number: String::new(),
        }
    }
}
