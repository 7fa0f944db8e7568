use std::sync::Arc;

use shared::protocol::{
    DirectMessageEvent, Envelope, EventKind, GroupMessageEvent, NotificationEvent, PresenceDelta,
};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::presence::PresenceTable;

const TOPIC_CHANNEL_CAPACITY: usize = 1024;

/// Dispatches each inbound frame to exactly one topic channel (or the
/// presence table). Unknown kinds and malformed payloads are dropped without
/// touching connection state.
pub struct EventRouter {
    direct_messages: broadcast::Sender<DirectMessageEvent>,
    group_messages: broadcast::Sender<GroupMessageEvent>,
    notifications: broadcast::Sender<NotificationEvent>,
    presence: Arc<PresenceTable>,
}

impl EventRouter {
    pub fn new(presence: Arc<PresenceTable>) -> Self {
        let (direct_messages, _) = broadcast::channel(TOPIC_CHANNEL_CAPACITY);
        let (group_messages, _) = broadcast::channel(TOPIC_CHANNEL_CAPACITY);
        let (notifications, _) = broadcast::channel(TOPIC_CHANNEL_CAPACITY);
        Self {
            direct_messages,
            group_messages,
            notifications,
            presence,
        }
    }

    pub fn subscribe_direct_messages(&self) -> broadcast::Receiver<DirectMessageEvent> {
        self.direct_messages.subscribe()
    }

    pub fn subscribe_group_messages(&self) -> broadcast::Receiver<GroupMessageEvent> {
        self.group_messages.subscribe()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notifications.subscribe()
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn dispatch(&self, raw: &str) {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("dropping malformed frame: {err}");
                return;
            }
        };

        let Some(kind) = EventKind::from_wire(&envelope.kind) else {
            debug!(kind = %envelope.kind, "ignoring unknown event kind");
            return;
        };

        let delivered = match kind {
            EventKind::DirectMessage => envelope.decode_payload().map(|event| {
                let _ = self.direct_messages.send(event);
            }),
            EventKind::GroupMessage => envelope.decode_payload().map(|event| {
                let _ = self.group_messages.send(event);
            }),
            EventKind::Notification => envelope.decode_payload().map(|event| {
                let _ = self.notifications.send(event);
            }),
            EventKind::PresenceUpdate => envelope
                .decode_payload()
                .map(|delta: PresenceDelta| self.presence.apply_delta(delta)),
        };

        if let Err(err) = delivered {
            warn!(kind = %envelope.kind, "dropping undecodable payload: {err}");
        }
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
