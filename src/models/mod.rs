//! Data models
//!
//! Database entities (User, Session, Story, Conversation) and the input types
//! passed between the API, service and repository layers.

mod conversation;
mod session;
mod story;
mod user;

pub use conversation::{
    Conversation, ConversationHistory, ConversationStatus, NewTurn, Turn, TurnRole,
};
pub use session::Session;
pub use story::{
    CreateStoryInput, ListParams, PagedResult, PublishedPage, Story, StorySource,
    UpdateStoryInput,
};
pub use user::{User, UserRole};
