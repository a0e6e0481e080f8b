//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the persistence of one entity.

pub mod conversation;
pub mod session;
pub mod story;
pub mod user;

pub use conversation::{ConversationRepository, DraftUpdate, SqlxConversationRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use story::{SqlxStoryRepository, StoryRepository};
pub use user::{SqlxUserRepository, UserRepository};
