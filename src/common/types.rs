use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Timestamp = DateTime<Utc>;

/// Current time truncated to whole milliseconds, the precision documents are stored with.
pub fn now_millis() -> Timestamp {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque id of a thread shared by exactly two participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One entry of a thread. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: Timestamp,
}

impl Message {
    /// The denormalized `lastMessage` line shown in chat lists.
    pub fn preview(&self) -> String {
        if let Some(text) = self.text.as_deref().filter(|text| !text.trim().is_empty()) {
            text.to_string()
        } else if self.image_url.is_some() {
            "Image sent".to_string()
        } else {
            "Audio message sent".to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummaryEntry {
    pub chat_id: ThreadId,
    #[serde(default)]
    pub receiver_id: UserId,
    #[serde(default)]
    pub last_message: String,
    #[serde(default)]
    pub is_seen: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: Timestamp,
}

/// Per-user index of every thread the user takes part in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserChatSummary {
    #[serde(default)]
    pub chats: Vec<ChatSummaryEntry>,
}

impl UserChatSummary {
    pub fn entry(&self, chat_id: &ThreadId) -> Option<&ChatSummaryEntry> {
        self.chats.iter().find(|entry| &entry.chat_id == chat_id)
    }

    pub fn entry_mut(&mut self, chat_id: &ThreadId) -> Option<&mut ChatSummaryEntry> {
        self.chats.iter_mut().find(|entry| &entry.chat_id == chat_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub blocked: BTreeSet<UserId>,
    #[serde(default)]
    pub online: bool,
}

impl UserProfile {
    pub fn has_blocked(&self, other: &UserId) -> bool {
        self.blocked.contains(other)
    }
}
