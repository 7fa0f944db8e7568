//! Realtime client core for the social-network backend: one persistent
//! websocket multiplexing direct messages, group messages, notifications and
//! presence updates across independent consumers, with reconnection, a
//! pending-send queue, and optimistic/confirmed message reconciliation.

use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::UserId,
    protocol::{DirectMessageEvent, GroupMessageEvent, NotificationEvent},
};
use tokio::sync::broadcast;
use tracing::warn;

pub mod chat;
pub mod connection;
pub mod http;
pub mod notifications;
pub mod presence;
pub mod router;
pub mod transcript;

pub use chat::{ChatError, ChatService, SessionProvider, StaticSession, TranscriptLoader};
pub use connection::{
    realtime_endpoint, Connection, ConnectionState, SendOutcome, SocketConnector, WsConnector,
};
pub use notifications::NotificationFeed;
pub use presence::PresenceTable;
pub use router::EventRouter;
pub use transcript::{ChatMessage, ConversationKey, MessageState, Transcript};

/// Composition root: owns the connection, the envelope router, the presence
/// table, the topic channels and the notification feed. One instance per
/// authenticated session, received by injection rather than ambient globals.
pub struct RealtimeService {
    connection: Arc<Connection>,
    router: Arc<EventRouter>,
    presence: Arc<PresenceTable>,
    chat: ChatService,
    notifications: Arc<NotificationFeed>,
}

impl RealtimeService {
    pub fn new(
        api_base: &str,
        session: Arc<dyn SessionProvider>,
        loader: Arc<dyn TranscriptLoader>,
    ) -> Result<Arc<Self>> {
        Self::with_connector(api_base, session, loader, Arc::new(WsConnector))
    }

    pub fn with_connector(
        api_base: &str,
        session: Arc<dyn SessionProvider>,
        loader: Arc<dyn TranscriptLoader>,
        connector: Arc<dyn SocketConnector>,
    ) -> Result<Arc<Self>> {
        let endpoint = realtime_endpoint(api_base)?;
        let presence = Arc::new(PresenceTable::new());
        let router = Arc::new(EventRouter::new(Arc::clone(&presence)));
        let connection = Connection::new(endpoint, connector, Arc::clone(&router));
        let chat = ChatService::new(Arc::clone(&connection), loader, session);
        let notifications = Arc::new(NotificationFeed::new());

        let service = Arc::new(Self {
            connection,
            router,
            presence,
            chat,
            notifications,
        });
        service.spawn_notification_feed();
        Ok(service)
    }

    fn spawn_notification_feed(self: &Arc<Self>) {
        let mut events = self.router.subscribe_notifications();
        let feed = Arc::clone(&self.notifications);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => feed.upsert(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification feed lagged behind the topic channel");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }

    pub async fn state(&self) -> ConnectionState {
        self.connection.state().await
    }

    pub fn subscribe_direct_messages(&self) -> broadcast::Receiver<DirectMessageEvent> {
        self.router.subscribe_direct_messages()
    }

    pub fn subscribe_group_messages(&self) -> broadcast::Receiver<GroupMessageEvent> {
        self.router.subscribe_group_messages()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.router.subscribe_notifications()
    }

    pub fn is_online(&self, user_id: Option<UserId>) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn notifications(&self) -> &NotificationFeed {
        &self.notifications
    }
}

#[cfg(test)]
#[path = "tests/service_tests.rs"]
mod tests;
