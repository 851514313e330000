use std::collections::HashSet;

use shared::{domain::ThreadParticipant, protocol::RawParticipant};

/// Rows to insert and rows to remove so that a thread's stored participants
/// match a freshly fetched participant list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantDelta {
    pub to_create: Vec<RawParticipant>,
    pub to_delete: Vec<ThreadParticipant>,
}

impl ParticipantDelta {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_delete.is_empty()
    }
}

/// Computes the participant delta for one thread.
///
/// Participants are compared by user id only. Payload differences for a user
/// that is already stored are not reported here. A user listed more than once
/// in `raw` is created at most once. Output order follows input order.
pub fn reconcile(existing: &[ThreadParticipant], raw: &[RawParticipant]) -> ParticipantDelta {
    let stored: HashSet<&str> = existing.iter().map(|p| p.user_id.as_str()).collect();
    let fetched: HashSet<&str> = raw.iter().map(|p| p.id.as_str()).collect();

    let mut seen = HashSet::with_capacity(raw.len());
    let to_create = raw
        .iter()
        .filter(|p| !stored.contains(p.id.as_str()) && seen.insert(p.id.as_str()))
        .cloned()
        .collect();

    let to_delete = existing
        .iter()
        .filter(|p| !fetched.contains(p.user_id.as_str()))
        .cloned()
        .collect();

    ParticipantDelta {
        to_create,
        to_delete,
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
