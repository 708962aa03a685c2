//! Turning a session history into a backend request.

use super::Message;
use crate::provider::{ChatTurn, Role};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Instruction prepended to chat-mode requests.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Nexus, a friendly and knowledgeable assistant. \
Answer clearly and concisely, use Markdown when it helps readability, \
and say so plainly when you are unsure instead of guessing.";

/// Which endpoint a conversation is sent to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// Whole history flattened into one prompt for `/api/generate`.
    #[default]
    Generate,
    /// Role/content list with a system instruction for `/api/chat`.
    Chat,
}

fn speaker(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
    }
}

/// `User: ...\n\nAssistant: ...` transcript of the history.
#[must_use]
pub fn transcript_prompt(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", speaker(m.role), m.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Chat turns for the history, led by `system_prompt` (skipped if blank).
#[must_use]
pub fn chat_turns(system_prompt: &str, messages: &[Message]) -> Vec<ChatTurn> {
    let system = (!system_prompt.trim().is_empty())
        .then(|| ChatTurn::new(Role::System, system_prompt));

    system
        .into_iter()
        .chain(messages.iter().map(|m| ChatTurn::new(m.role, m.content.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user("Hi"),
            Message::assistant("Hello! How can I help?"),
            Message::user("Tell me a joke"),
        ]
    }

    #[test]
    fn test_transcript_prompt() {
        assert_eq!(
            transcript_prompt(&history()),
            "User: Hi\n\nAssistant: Hello! How can I help?\n\nUser: Tell me a joke"
        );
    }

    #[test]
    fn test_transcript_prompt_empty() {
        assert_eq!(transcript_prompt(&[]), "");
    }

    #[test]
    fn test_chat_turns_prepends_system() {
        let turns = chat_turns("Be brief.", &history());
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0], ChatTurn::new(Role::System, "Be brief."));
        assert_eq!(turns[1], ChatTurn::new(Role::User, "Hi"));
        assert_eq!(turns[3], ChatTurn::new(Role::User, "Tell me a joke"));
    }

    #[test]
    fn test_chat_turns_blank_system_skipped() {
        let turns = chat_turns("  ", &history());
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role, Role::User);
    }

    #[test]
    fn test_prompt_mode_serde() {
        assert_eq!(serde_json::to_string(&PromptMode::Chat).unwrap(), "\"chat\"");
        let mode: PromptMode = serde_json::from_str("\"generate\"").unwrap();
        assert_eq!(mode, PromptMode::Generate);
    }
}
