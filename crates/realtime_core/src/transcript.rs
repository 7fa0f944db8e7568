use chrono::DateTime;
use shared::domain::{GroupId, MessageId, UserId};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationKey {
    Direct(UserId),
    Group(GroupId),
}

// Socket echoes carry no server id, only history rows do, hence the Option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageState {
    Pending { local_id: Uuid },
    Confirmed { server_id: Option<MessageId> },
}

impl MessageState {
    pub fn pending() -> Self {
        Self::Pending {
            local_id: Uuid::new_v4(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub state: MessageState,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub sent_at_raw: String,
    pub sent_at_formatted: String,
}

impl ChatMessage {
    pub fn pending(sender_id: UserId, content: impl Into<String>, sent_at: impl Into<String>) -> Self {
        let sent_at = sent_at.into();
        Self {
            state: MessageState::pending(),
            sender_id,
            sender_name: "You".to_string(),
            content: content.into(),
            sent_at_formatted: format_timestamp(&sent_at),
            sent_at_raw: sent_at,
        }
    }

    pub fn confirmed(
        server_id: Option<MessageId>,
        sender_id: UserId,
        sender_name: impl Into<String>,
        content: impl Into<String>,
        sent_at: impl Into<String>,
    ) -> Self {
        let sent_at = sent_at.into();
        Self {
            state: MessageState::Confirmed { server_id },
            sender_id,
            sender_name: sender_name.into(),
            content: content.into(),
            sent_at_formatted: format_timestamp(&sent_at),
            sent_at_raw: sent_at,
        }
    }
}

// Unparseable timestamps fall back to the raw string rather than failing
// the message.
pub fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.format("%b %-d, %Y %H:%M").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Append-ordered message sequence for one conversation. Invariant: no two
/// entries share the same (sender, content, sent_at_raw) triple; that triple
/// merges the optimistic and confirmed variants of one logical message.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn append(&mut self, message: ChatMessage) -> bool {
        let duplicate = self.messages.iter().any(|existing| {
            existing.sender_id == message.sender_id
                && existing.content == message.content
                && existing.sent_at_raw == message.sent_at_raw
        });
        if duplicate {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Removes a pending local echo from the same sender with the same
    /// trimmed content, then appends the confirmed copy through the dedup
    /// invariant. The pending match deliberately ignores the timestamp; the
    /// local clock and the server clock never agree.
    pub fn reconcile(&mut self, confirmed: ChatMessage) -> bool {
        let trimmed = confirmed.content.trim();
        if let Some(index) = self.messages.iter().position(|existing| {
            existing.state.is_pending()
                && existing.sender_id == confirmed.sender_id
                && existing.content.trim() == trimmed
        }) {
            self.messages.remove(index);
        }
        self.append(confirmed)
    }

    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/transcript_tests.rs"]
mod tests;
