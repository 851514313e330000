use std::sync::Arc;

use futures::{Stream, StreamExt};
use shared::{
    domain::GroupId,
    protocol::{Group, GroupEventKind, WebSocketMessage},
};
use storage::Storage;
use tracing::{debug, warn};

use crate::registry::ServerConnectionRegistry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupEventOutcome {
    Applied { group_id: GroupId },
    /// The event was unusable or could not be stored; nothing changed locally.
    Dropped { kind: GroupEventKind, reason: String },
    /// Association events are recognised but have no local effect yet.
    NotYetHandled(GroupEventKind),
    ServerNotFound,
    /// Not a group event.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub applied: usize,
    pub dropped: usize,
    pub not_yet_handled: usize,
    pub server_not_found: usize,
    pub ignored: usize,
}

impl RouterStats {
    fn record(&mut self, outcome: &GroupEventOutcome) {
        match outcome {
            GroupEventOutcome::Applied { .. } => self.applied += 1,
            GroupEventOutcome::Dropped { .. } => self.dropped += 1,
            GroupEventOutcome::NotYetHandled(_) => self.not_yet_handled += 1,
            GroupEventOutcome::ServerNotFound => self.server_not_found += 1,
            GroupEventOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Applies inbound group events to a server's local store.
///
/// Failures never escape: each event yields an outcome and the next event is
/// handled regardless.
pub struct RealtimeGroupEventRouter {
    registry: Arc<ServerConnectionRegistry>,
}

impl RealtimeGroupEventRouter {
    pub fn new(registry: Arc<ServerConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn handle(&self, server_url: &str, msg: &WebSocketMessage) -> GroupEventOutcome {
        let Some(kind) = GroupEventKind::from_event_name(&msg.event) else {
            return GroupEventOutcome::Ignored;
        };

        let Some(storage) = self.registry.storage(server_url).await else {
            debug!(server_url, event = %msg.event, "groups: no local store for server");
            return GroupEventOutcome::ServerNotFound;
        };

        match kind {
            GroupEventKind::Updated => self.apply_group_updated(server_url, &storage, msg).await,
            _ => {
                debug!(
                    server_url,
                    event = %msg.event,
                    group_id = msg.data_str("group_id").unwrap_or_default(),
                    team_id = ?msg.broadcast.team_id,
                    channel_id = ?msg.broadcast.channel_id,
                    "groups: association event not handled yet"
                );
                GroupEventOutcome::NotYetHandled(kind)
            }
        }
    }

    async fn apply_group_updated(
        &self,
        server_url: &str,
        storage: &Storage,
        msg: &WebSocketMessage,
    ) -> GroupEventOutcome {
        let group = match parse_group(msg) {
            Ok(group) => group,
            Err(reason) => {
                warn!(server_url, seq = msg.seq, "groups: dropping malformed group payload: {reason}");
                return GroupEventOutcome::Dropped {
                    kind: GroupEventKind::Updated,
                    reason,
                };
            }
        };

        if let Err(err) = storage.upsert_groups(std::slice::from_ref(&group)).await {
            warn!(server_url, group_id = %group.id, "groups: failed to store group: {err:#}");
            return GroupEventOutcome::Dropped {
                kind: GroupEventKind::Updated,
                reason: format!("{err:#}"),
            };
        }

        debug!(server_url, group_id = %group.id, "groups: group stored");
        GroupEventOutcome::Applied { group_id: group.id }
    }

    /// Consumes events until the stream ends.
    pub async fn run<S>(&self, server_url: &str, events: S) -> RouterStats
    where
        S: Stream<Item = WebSocketMessage>,
    {
        let mut events = std::pin::pin!(events);
        let mut stats = RouterStats::default();
        while let Some(msg) = events.next().await {
            let outcome = self.handle(server_url, &msg).await;
            stats.record(&outcome);
        }
        stats
    }
}

/// `data.group` carries the group as a JSON document encoded in a string.
fn parse_group(msg: &WebSocketMessage) -> Result<Group, String> {
    let raw = msg
        .data_str("group")
        .ok_or_else(|| "data.group is missing or not a string".to_string())?;
    serde_json::from_str::<Group>(raw).map_err(|err| err.to_string())
}

#[cfg(test)]
#[path = "tests/groups_tests.rs"]
mod tests;
