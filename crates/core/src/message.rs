//! Conversation turn types.
//!
//! These are the value objects that flow through the whole system:
//! user input reaches a worker → the worker builds turns → the model answers
//! → both turns land in the worker's history and in the broker's ring.

use serde::{Deserialize, Serialize};

/// The role of a turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `{role, content}` turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Per-agent conversation history.
///
/// Append-only; the only way to shrink it is an explicit [`reset`](Self::reset).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Drop every turn. Wired to the worker's reset hook.
    pub fn reset(&mut self) {
        self.turns.clear();
    }

    /// Get the total token count estimate (rough: 4 chars ≈ 1 token).
    pub fn estimated_tokens(&self) -> usize {
        self.turns.iter().map(|t| t.content.len() / 4).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_constructors_set_role() {
        assert_eq!(Turn::user("a").role, Role::User);
        assert_eq!(Turn::assistant("b").role, Role::Assistant);
        assert_eq!(Turn::system("c").role, Role::System);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn conversation_appends_in_order_and_resets() {
        let mut conv = ConversationState::new();
        conv.push(Turn::user("first"));
        conv.push(Turn::assistant("second"));
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.turns()[0].content, "first");
        assert_eq!(conv.turns()[1].content, "second");

        conv.reset();
        assert!(conv.is_empty());
    }

    #[test]
    fn conversation_token_estimate() {
        let mut conv = ConversationState::new();
        // 20 chars ≈ 5 tokens
        conv.push(Turn::user("12345678901234567890"));
        assert_eq!(conv.estimated_tokens(), 5);
    }
}
