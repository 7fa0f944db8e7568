use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shared::domain::{GroupId, MessageId, UserId};

use crate::{
    chat::{SessionProvider, TranscriptLoader},
    transcript::ChatMessage,
};

const HISTORY_PAGE_LIMIT: u32 = 50;

/// Transcript loader against the REST history endpoints.
pub struct HttpTranscriptLoader {
    http: Client,
    api_base: String,
    session: Arc<dyn SessionProvider>,
}

#[derive(Debug, Deserialize)]
struct DirectHistoryRow {
    sender_id: i64,
    content: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct DirectHistoryResponse {
    #[serde(default)]
    messages: Vec<DirectHistoryRow>,
}

#[derive(Debug, Deserialize)]
struct GroupHistoryRow {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    f_name: Option<String>,
    #[serde(default)]
    l_name: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroupHistoryResponse {
    #[serde(default)]
    messages: Vec<GroupHistoryRow>,
}

impl HttpTranscriptLoader {
    pub fn new(api_base: impl Into<String>, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            http: Client::new(),
            api_base: api_base.into(),
            session,
        }
    }

    fn session_cookie(&self) -> String {
        match self.session.session_token() {
            Some(token) => format!("session_token={token}"),
            None => String::new(),
        }
    }
}

#[async_trait]
impl TranscriptLoader for HttpTranscriptLoader {
    async fn load_direct(&self, peer: UserId) -> Result<Vec<ChatMessage>> {
        let url = format!(
            "{}/protected/v1/conversations/{}/messages?limit={HISTORY_PAGE_LIMIT}",
            self.api_base, peer.0
        );
        let response: DirectHistoryResponse = self
            .http
            .get(&url)
            .header(reqwest::header::COOKIE, self.session_cookie())
            .send()
            .await
            .with_context(|| format!("failed to load conversation with user {}", peer.0))?
            .error_for_status()?
            .json()
            .await?;

        // Direct history rows carry no display name; the conversation view
        // already knows both participants.
        Ok(response
            .messages
            .into_iter()
            .map(|row| {
                ChatMessage::confirmed(
                    None,
                    UserId(row.sender_id),
                    format!("User {}", row.sender_id),
                    row.content.trim(),
                    row.created_at,
                )
            })
            .collect())
    }

    async fn load_group(&self, group: GroupId) -> Result<Vec<ChatMessage>> {
        let url = format!(
            "{}/protected/v1/groups/{}/messages?limit={HISTORY_PAGE_LIMIT}",
            self.api_base, group.0
        );
        let response: GroupHistoryResponse = self
            .http
            .get(&url)
            .header(reqwest::header::COOKIE, self.session_cookie())
            .send()
            .await
            .with_context(|| format!("failed to load chat for group {}", group.0))?
            .error_for_status()?
            .json()
            .await?;

        Ok(response
            .messages
            .into_iter()
            .map(|row| {
                let sender_id = row.user_id.unwrap_or(-1);
                let sender_name = build_full_name(row.f_name.as_deref(), row.l_name.as_deref())
                    .unwrap_or_else(|| format!("User {sender_id}"));
                ChatMessage::confirmed(
                    row.id.map(MessageId),
                    UserId(sender_id),
                    sender_name,
                    row.content.unwrap_or_default().trim(),
                    row.created_at.unwrap_or_default(),
                )
            })
            .collect())
    }
}

fn build_full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    let full = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if full.is_empty() {
        None
    } else {
        Some(full)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
