use crate::backend::types::HistoryEntry;
use crate::i18n::{self, Language};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the in-memory transcript. The id is only a rendering key;
/// messages are never addressed by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::at(role, content, Utc::now())
    }

    pub fn at(role: Role, content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A server-tracked conversation, as listed in the session panel. Messages
/// live server-side; this entity only carries what the listing shows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationThread {
    pub group_id: i64,
    #[serde(default)]
    pub first_question: String,
    #[serde(default)]
    pub start_date: String,
}

/// The synthetic greeting shown whenever no server-side history exists.
pub fn welcome_message(lang: Language) -> Message {
    Message::assistant(i18n::welcome(lang))
}

/// Expands server history pairs into the transcript: user question then
/// assistant answer, both stamped with the pair's recorded timestamp,
/// preserving pair order.
pub fn expand_history(history: &[HistoryEntry]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2);
    for entry in history {
        let timestamp = parse_history_timestamp(entry.timestamp.as_deref());
        messages.push(Message::at(Role::User, entry.question.clone(), timestamp));
        messages.push(Message::at(Role::Assistant, entry.answer.clone(), timestamp));
    }
    messages
}

/// The backend records timestamps as `YYYY-MM-DD HH:MM:SS` strings. A missing
/// or malformed value falls back to now; timestamps are display-only.
fn parse_history_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
        .map(|naive| naive.and_utc())
        .unwrap_or_else(Utc::now)
}
