use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{ChannelId, GroupId, PostId, TeamId, ThreadId, UserId};

/// Participant as it appears inside a fetched thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawParticipant {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl RawParticipant {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            username: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub create_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawThread {
    pub id: ThreadId,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default)]
    pub last_reply_at: i64,
    #[serde(default)]
    pub last_viewed_at: i64,
    #[serde(default)]
    pub participants: Vec<RawParticipant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<RawPost>,
    #[serde(default)]
    pub unread_replies: i64,
    #[serde(default)]
    pub unread_mentions: i64,
    #[serde(default)]
    pub is_following: bool,
}

impl RawThread {
    pub fn last_reply_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.last_reply_at).single()
    }
}

/// One page of threads plus the totals the server reports alongside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawThreadPage {
    #[serde(default)]
    pub threads: Vec<RawThread>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub total_unread_threads: i64,
    #[serde(default)]
    pub total_unread_mentions: i64,
}

impl RawThreadPage {
    /// Cursor for the next (older) page.
    pub fn next_before(&self) -> Option<&ThreadId> {
        self.threads.last().map(|thread| &thread.id)
    }

    /// Cursor for the previous (newer) page.
    pub fn next_after(&self) -> Option<&ThreadId> {
        self.threads.first().map(|thread| &thread.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    /// Only synced groups carry a remote id; custom groups send `null`.
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub allow_reference: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub member_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub create_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub update_at: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub delete_at: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketBroadcast {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<TeamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Inbound realtime envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub broadcast: WebSocketBroadcast,
    #[serde(default)]
    pub seq: i64,
}

impl WebSocketMessage {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            broadcast: WebSocketBroadcast::default(),
            seq: 0,
        }
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupEventKind {
    Updated,
    AssociatedToTeam,
    NotAssociatedToTeam,
    AssociatedToChannel,
    NotAssociatedToChannel,
}

impl GroupEventKind {
    pub const ALL: [GroupEventKind; 5] = [
        GroupEventKind::Updated,
        GroupEventKind::AssociatedToTeam,
        GroupEventKind::NotAssociatedToTeam,
        GroupEventKind::AssociatedToChannel,
        GroupEventKind::NotAssociatedToChannel,
    ];

    pub fn event_name(self) -> &'static str {
        match self {
            GroupEventKind::Updated => "received_group",
            GroupEventKind::AssociatedToTeam => "received_group_associated_to_team",
            GroupEventKind::NotAssociatedToTeam => "received_group_not_associated_to_team",
            GroupEventKind::AssociatedToChannel => "received_group_associated_to_channel",
            GroupEventKind::NotAssociatedToChannel => "received_group_not_associated_to_channel",
        }
    }

    pub fn from_event_name(event: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.event_name() == event)
    }
}

/// Outbound frame sent right after the websocket opens.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationChallenge<'a> {
    pub seq: i64,
    pub action: &'static str,
    pub data: AuthenticationChallengeData<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationChallengeData<'a> {
    pub token: &'a str,
}

impl<'a> AuthenticationChallenge<'a> {
    pub fn new(seq: i64, token: &'a str) -> Self {
        Self {
            seq,
            action: "authentication_challenge",
            data: AuthenticationChallengeData { token },
        }
    }
}
