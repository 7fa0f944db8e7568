use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use shared::{
    domain::UserId,
    protocol::{PresenceDelta, PresenceEntry},
};
use tracing::debug;

/// Currently-online users. Deltas build a fresh map and swap it in whole, so
/// a reader holding a snapshot sees either the old or the new state, never a
/// half-applied delta.
#[derive(Debug, Default)]
pub struct PresenceTable {
    snapshot: RwLock<Arc<HashMap<UserId, PresenceEntry>>>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_delta(&self, delta: PresenceDelta) {
        let mut next: HashMap<UserId, PresenceEntry> = self.snapshot().as_ref().clone();
        for entry in delta.online_users {
            next.insert(entry.id, entry);
        }
        for user_id in &delta.offline_user_ids {
            next.remove(user_id);
        }
        debug!(online = next.len(), "presence delta applied");
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
    }

    // None (no user in context) is simply offline.
    pub fn is_online(&self, user_id: Option<UserId>) -> bool {
        match user_id {
            Some(user_id) => self.snapshot().contains_key(&user_id),
            None => false,
        }
    }

    pub fn entry(&self, user_id: UserId) -> Option<PresenceEntry> {
        self.snapshot().get(&user_id).cloned()
    }

    pub fn online_count(&self) -> usize {
        self.snapshot().len()
    }

    pub fn snapshot(&self) -> Arc<HashMap<UserId, PresenceEntry>> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
