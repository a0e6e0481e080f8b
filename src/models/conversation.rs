//! Conversation model
//!
//! Every story carries one conversation: the ordered message history sent to
//! the text-generation provider. Turns are append-only and numbered from 1
//! without gaps; once the story is published the conversation is archived.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Conversation attached to a story
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation id (UUID)
    pub id: String,
    /// Story the conversation belongs to
    pub story_id: i64,
    /// Lifecycle status
    pub status: ConversationStatus,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Check if new turns may be appended
    pub fn is_active(&self) -> bool {
        self.status == ConversationStatus::Active
    }
}

/// Conversation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    /// Open for refinement
    #[default]
    Active,
    /// Frozen after publishing
    Archived,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "archived" => Ok(ConversationStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid conversation status: {}", s)),
        }
    }
}

/// Author of a turn, using the chat-completions role vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(TurnRole::System),
            "user" => Ok(TurnRole::User),
            "assistant" => Ok(TurnRole::Assistant),
            _ => Err(anyhow::anyhow!("Invalid turn role: {}", s)),
        }
    }
}

/// A stored turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the conversation, starting at 1
    pub seq: i64,
    pub role: TurnRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A turn that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    pub role: TurnRole,
    pub content: String,
}

impl NewTurn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(TurnRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }
}

impl From<&Turn> for NewTurn {
    fn from(turn: &Turn) -> Self {
        Self::new(turn.role, turn.content.clone())
    }
}

/// A conversation together with its full history
#[derive(Debug, Clone, Serialize)]
pub struct ConversationHistory {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub turns: Vec<Turn>,
}

impl ConversationHistory {
    /// Content of the most recent assistant turn
    pub fn latest_assistant(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(|t| t.content.as_str())
    }

    /// The history in the form sent to the generation provider
    pub fn messages(&self) -> Vec<NewTurn> {
        self.turns.iter().map(NewTurn::from).collect()
    }
}
