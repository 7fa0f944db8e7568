use std::{collections::HashMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use shared::{
    domain::{GroupId, MemberProfile, UserId},
    protocol::{ClientFrame, DirectMessageEvent, GroupMessageEvent},
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    connection::{Connection, SendOutcome},
    transcript::{ChatMessage, ConversationKey, Transcript},
};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("no active session; sign in before sending")]
    MissingSession,
    #[error("message rejected by transport: {0}")]
    Transport(#[source] anyhow::Error),
}

/// Loads authoritative transcripts from the REST history endpoints.
#[async_trait]
pub trait TranscriptLoader: Send + Sync {
    async fn load_direct(&self, peer: UserId) -> Result<Vec<ChatMessage>>;
    async fn load_group(&self, group: GroupId) -> Result<Vec<ChatMessage>>;
}

pub struct MissingTranscriptLoader;

#[async_trait]
impl TranscriptLoader for MissingTranscriptLoader {
    async fn load_direct(&self, peer: UserId) -> Result<Vec<ChatMessage>> {
        Err(anyhow!("transcript backend unavailable for user {}", peer.0))
    }

    async fn load_group(&self, group: GroupId) -> Result<Vec<ChatMessage>> {
        Err(anyhow!(
            "transcript backend unavailable for group {}",
            group.0
        ))
    }
}

pub trait SessionProvider: Send + Sync {
    fn session_token(&self) -> Option<String>;
    fn current_user(&self) -> Option<UserId>;
}

/// Fixed credentials, for tools and tests.
pub struct StaticSession {
    pub token: String,
    pub user_id: UserId,
}

impl SessionProvider for StaticSession {
    fn session_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    fn current_user(&self) -> Option<UserId> {
        Some(self.user_id)
    }
}

/// One duplicate-free transcript per conversation while a local optimistic
/// writer and the remote confirmed echo race each other.
pub struct ChatService {
    connection: Arc<Connection>,
    loader: Arc<dyn TranscriptLoader>,
    session: Arc<dyn SessionProvider>,
    transcripts: Mutex<HashMap<ConversationKey, Transcript>>,
}

impl ChatService {
    pub fn new(
        connection: Arc<Connection>,
        loader: Arc<dyn TranscriptLoader>,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self {
            connection,
            loader,
            session,
            transcripts: Mutex::new(HashMap::new()),
        }
    }

    /// `Queued` means the frame waits for the next open socket and the
    /// optimistic entry stands.
    pub async fn submit_direct(
        &self,
        peer: UserId,
        draft: &str,
    ) -> Result<SendOutcome, ChatError> {
        let (content, token, sender) = self.prepare_submission(draft)?;
        let key = ConversationKey::Direct(peer);
        self.append_local(key, sender, &content).await;
        self.transmit(
            key,
            ClientFrame::SendMessage {
                message: content,
                receiver_id: peer,
                session_token: token,
            },
        )
        .await
    }

    pub async fn submit_group(
        &self,
        group: GroupId,
        draft: &str,
    ) -> Result<SendOutcome, ChatError> {
        let (content, token, sender) = self.prepare_submission(draft)?;
        let key = ConversationKey::Group(group);
        self.append_local(key, sender, &content).await;
        self.transmit(
            key,
            ClientFrame::SendGroupMessage {
                message: content,
                group_id: group,
                session_token: token,
            },
        )
        .await
    }

    pub async fn send_typing(
        &self,
        peer: UserId,
        is_typing: bool,
    ) -> Result<SendOutcome, ChatError> {
        let token = self.session.session_token().ok_or(ChatError::MissingSession)?;
        self.connection
            .send(&ClientFrame::SendTyping {
                receiver_id: peer,
                is_typing,
                session_token: token,
            })
            .await
            .map_err(ChatError::Transport)
    }

    pub async fn on_remote_direct(&self, event: &DirectMessageEvent, members: &[MemberProfile]) {
        let me = self.session.current_user();
        let peer = if me == Some(event.sender_id) {
            event.receiver_id
        } else {
            event.sender_id
        };
        let confirmed = ChatMessage::confirmed(
            None,
            event.sender_id,
            resolve_sender_name(members, event.sender_id),
            &event.message,
            &event.sent_at,
        );
        self.reconcile(ConversationKey::Direct(peer), confirmed)
            .await;
    }

    pub async fn on_remote_group(&self, event: &GroupMessageEvent, members: &[MemberProfile]) {
        let confirmed = ChatMessage::confirmed(
            None,
            event.sender_id,
            resolve_sender_name(members, event.sender_id),
            &event.message,
            &event.sent_at,
        );
        self.reconcile(ConversationKey::Group(event.group_id), confirmed)
            .await;
    }

    pub async fn reload(&self, key: ConversationKey) -> Result<()> {
        let messages = match key {
            ConversationKey::Direct(peer) => self.loader.load_direct(peer).await?,
            ConversationKey::Group(group) => self.loader.load_group(group).await?,
        };
        self.transcripts
            .lock()
            .await
            .entry(key)
            .or_default()
            .replace_all(messages);
        Ok(())
    }

    pub async fn transcript(&self, key: ConversationKey) -> Vec<ChatMessage> {
        self.transcripts
            .lock()
            .await
            .get(&key)
            .map(|transcript| transcript.messages().to_vec())
            .unwrap_or_default()
    }

    pub async fn clear(&self, key: ConversationKey) {
        self.transcripts.lock().await.remove(&key);
    }

    fn prepare_submission(&self, draft: &str) -> Result<(String, String, UserId), ChatError> {
        let content = draft.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let token = self.session.session_token().ok_or(ChatError::MissingSession)?;
        let sender = self.session.current_user().ok_or(ChatError::MissingSession)?;
        Ok((content.to_string(), token, sender))
    }

    async fn append_local(&self, key: ConversationKey, sender: UserId, content: &str) {
        let sent_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let message = ChatMessage::pending(sender, content, sent_at);
        self.transcripts
            .lock()
            .await
            .entry(key)
            .or_default()
            .append(message);
    }

    async fn reconcile(&self, key: ConversationKey, confirmed: ChatMessage) {
        self.transcripts
            .lock()
            .await
            .entry(key)
            .or_default()
            .reconcile(confirmed);
    }

    async fn transmit(
        &self,
        key: ConversationKey,
        frame: ClientFrame,
    ) -> Result<SendOutcome, ChatError> {
        match self.connection.send(&frame).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                // The optimistic entry is not retracted here; the wholesale
                // reload rebuilds the transcript from server state, which
                // naturally excludes the failed message.
                if let Err(reload_err) = self.reload(key).await {
                    warn!("transcript reload after rejected send failed: {reload_err}");
                }
                Err(ChatError::Transport(err))
            }
        }
    }
}

fn resolve_sender_name(members: &[MemberProfile], sender_id: UserId) -> String {
    members
        .iter()
        .find(|member| member.user_id == sender_id)
        .map(|member| member.full_name.clone())
        .unwrap_or_else(|| format!("User {}", sender_id.0))
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
