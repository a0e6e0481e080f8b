//! Services layer - Business logic
//!
//! This module contains the business logic of Chronicler:
//! - account management and authentication
//! - upload validation and temporary storage
//! - the provider adapters (speech-to-text, text generation, wiki)
//! - story orchestration from upload to published page

pub mod generation;
pub mod markdown;
pub mod narrative;
pub mod password;
pub mod provider;
pub mod publisher;
pub mod rate_limiter;
pub mod story;
pub mod transcription;
pub mod upload;
pub mod user;

pub use generation::{ChatCompletionsClient, GenerationError, TextGenerator};
pub use narrative::NarrativeGenerator;
pub use password::{hash_password, verify_password};
pub use publisher::{ConfluencePublisher, PublishError, WikiPage, WikiPublisher};
pub use rate_limiter::LoginRateLimiter;
pub use story::{ChatOutcome, StoryService, StoryServiceError};
pub use transcription::{Transcriber, TranscriptionError, WhisperTranscriber};
pub use upload::{StoredUpload, UploadError, UploadPayload, UploadWriter};
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
