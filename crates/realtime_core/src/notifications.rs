use std::sync::{PoisonError, RwLock};

use shared::{domain::NotificationId, protocol::NotificationEvent};

/// Newest-first notification list. Websocket events upsert by id so a
/// redelivered notification replaces its earlier copy instead of duplicating
/// it; the REST bootstrap load and the mark-as-read POST stay with the caller.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    entries: RwLock<Vec<NotificationEvent>>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, incoming: NotificationEvent) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter().position(|entry| entry.id == incoming.id) {
            Some(index) => entries[index] = incoming,
            None => entries.insert(0, incoming),
        }
    }

    pub fn replace_all(&self, mut notifications: Vec<NotificationEvent>) {
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = notifications;
    }

    pub fn mark_read(&self, id: NotificationId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match entries.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.is_read = true;
                true
            }
            None => false,
        }
    }

    pub fn unread_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| !entry.is_read)
            .count()
    }

    pub fn entries(&self) -> Vec<NotificationEvent> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
