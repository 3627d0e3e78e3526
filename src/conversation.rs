//! Conversation history shared by every interaction
//!
//! The history is an ordered list of role-tagged turns; its order is the
//! prompt sent to the completion provider. It starts with one seed turn that
//! is never removed and only ever grows.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default priming message placed at the head of every conversation
pub const DEFAULT_SEED_PROMPT: &str = "You are a helpful assistant. Ask me anything.";

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name used by chat-completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(crate::Error::Config(format!("unknown role: {other}"))),
        }
    }
}

/// One role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered, append-only conversation history
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    /// Start a conversation from a single seed turn
    #[must_use]
    pub fn new(seed: Turn) -> Self {
        Self { turns: vec![seed] }
    }

    /// Start a conversation from the default assistant priming message
    #[must_use]
    pub fn with_default_seed() -> Self {
        Self::new(Turn::assistant(DEFAULT_SEED_PROMPT))
    }

    /// Append one turn; content may be empty
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(Turn::new(role, content));
    }

    /// Copy of the full history, seed first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    /// Borrow the history without copying
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The priming turn
    #[must_use]
    pub fn seed(&self) -> &Turn {
        &self.turns[0]
    }

    /// Number of turns including the seed
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Always false: the seed turn is never removed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::with_default_seed()
    }
}
