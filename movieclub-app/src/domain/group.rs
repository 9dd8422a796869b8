use serde::{Deserialize, Serialize};
use std::fmt;

/// External platform user id.
pub type UserId = i64;

/// Where a club lives: a chat, optionally narrowed to one forum topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatScope {
    pub chat_id: i64,
    #[serde(default)]
    pub topic_id: Option<i64>,
}

impl ChatScope {
    pub fn new(chat_id: i64, topic_id: Option<i64>) -> Self {
        Self { chat_id, topic_id }
    }
}

impl fmt::Display for ChatScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.topic_id {
            Some(topic) => write!(f, "chat {} topic {}", self.chat_id, topic),
            None => write!(f, "chat {}", self.chat_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: uuid::Uuid,
    pub scope: ChatScope,
    pub name: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Group {
    pub fn new(scope: ChatScope, created_at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            scope,
            name: None,
            created_at,
        }
    }
}
