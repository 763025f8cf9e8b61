use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

/// One bubble of the conversation, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    fn new(sender: Sender, content: String, is_error: bool) -> Self {
        let timestamp = super::now();
        Self {
            id: format!(
                "msg_{}_{}",
                timestamp.timestamp_millis(),
                super::random_suffix(5)
            ),
            sender,
            content,
            timestamp,
            is_error,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content.into(), false)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content.into(), false)
    }

    pub fn bot_error(content: impl Into<String>) -> Self {
        Self::new(Sender::Bot, content.into(), true)
    }
}
