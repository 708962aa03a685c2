mod prompt;
mod store;

pub use prompt::{DEFAULT_SYSTEM_PROMPT, PromptMode, chat_turns, transcript_prompt};
pub use store::{ConversationStore, SESSIONS_KEY, SendOptions};

use crate::provider::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to sessions until the first message names them.
pub const DEFAULT_TITLE: &str = "New Chat";
/// Derived titles keep at most this many characters of the first message.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and bump `updated_at`.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    /// Short id for display (first 8 characters).
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Title derived from a session's first message.
#[must_use]
pub fn derive_title(content: &str) -> String {
    if content.chars().count() > TITLE_MAX_CHARS {
        format!(
            "{}...",
            content.chars().take(TITLE_MAX_CHARS).collect::<String>()
        )
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new();
        assert_eq!(session.title, "New Chat");
        assert!(session.messages.is_empty());
        assert_eq!(session.created_at, session.updated_at);
        assert!(session.has_default_title());
        assert_ne!(Session::new().id, session.id);
    }

    #[test]
    fn test_push_bumps_updated_at() {
        let mut session = Session::new();
        let before = session.updated_at;
        session.push(Message::user("hi"));
        assert_eq!(session.messages.len(), 1);
        assert!(session.updated_at >= before);
    }

    #[test]
    fn test_derive_title_short() {
        assert_eq!(derive_title("Hi"), "Hi");
        let exactly_30 = "a".repeat(30);
        assert_eq!(derive_title(&exactly_30), exactly_30);
    }

    #[test]
    fn test_derive_title_truncates() {
        assert_eq!(
            derive_title("This is a test message that will become the title"),
            "This is a test message that wi..."
        );
        assert_eq!(derive_title(&"b".repeat(31)), format!("{}...", "b".repeat(30)));
    }

    #[test]
    fn test_derive_title_counts_characters_not_bytes() {
        let content = "é".repeat(31);
        let title = derive_title(&content);
        assert_eq!(title, format!("{}...", "é".repeat(30)));
    }

    #[test]
    fn test_serialized_shape() {
        let mut session = Session::new();
        session.push(Message::user("Hello"));
        let json = serde_json::to_value(&session).unwrap();

        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Hello");
        assert!(json["messages"][0].get("timestamp").is_some());
    }

    #[test]
    fn test_round_trip() {
        let mut session = Session::new();
        session.push(Message::user("Hi"));
        session.push(Message::assistant("Hello!"));

        let json = serde_json::to_string(&vec![session.clone()]).unwrap();
        let loaded: Vec<Session> = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, vec![session]);
    }

    #[test]
    fn test_short_id() {
        let session = Session::new();
        assert_eq!(session.short_id().len(), 8);
        assert!(session.id.starts_with(session.short_id()));
    }
}
