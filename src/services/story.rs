//! Story service
//!
//! Orchestrates the path from an upload to a published wiki page:
//! transcription, first draft, refinement turns, manual edits and
//! publication. Provider calls happen before any write, so a failed call
//! leaves stored stories and conversations exactly as they were.

use crate::db::repositories::{ConversationRepository, DraftUpdate, StoryRepository};
use crate::models::{
    Conversation, ConversationHistory, CreateStoryInput, ListParams, NewTurn, PagedResult, Story,
    StorySource, Turn, UpdateStoryInput, User,
};
use crate::services::generation::{GenerationError, TextGenerator};
use crate::services::narrative::{reseed_turns, story_title, NarrativeGenerator};
use crate::services::publisher::{PublishError, WikiPage, WikiPublisher};
use crate::services::transcription::{TranscriptionError, Transcriber};
use crate::services::upload::{StoredUpload, UploadError, UploadPayload};
use std::sync::Arc;

const MAX_TITLE_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 32 * 1024;

/// Error types for story operations
#[derive(Debug, thiserror::Error)]
pub enum StoryServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Story not found")]
    NotFound,

    #[error("You do not have access to this story")]
    Forbidden,

    #[error("{0}")]
    Conflict(String),

    #[error("{0} is not configured")]
    Unavailable(&'static str),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Result of one refinement round
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub story: Story,
    /// The user and assistant turns just stored
    pub turns: Vec<Turn>,
}

pub struct StoryService {
    stories: Arc<dyn StoryRepository>,
    conversations: Arc<dyn ConversationRepository>,
    system_prompt: String,
    transcriber: Option<Arc<dyn Transcriber>>,
    narrative: Option<NarrativeGenerator>,
    publisher: Option<Arc<dyn WikiPublisher>>,
}

impl StoryService {
    /// Create a story service with no providers attached
    pub fn new(
        stories: Arc<dyn StoryRepository>,
        conversations: Arc<dyn ConversationRepository>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            stories,
            conversations,
            system_prompt: system_prompt.into(),
            transcriber: None,
            narrative: None,
            publisher: None,
        }
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.narrative = Some(NarrativeGenerator::new(generator, self.system_prompt.clone()));
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn WikiPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Which providers are attached: (transcription, generation, wiki)
    pub fn providers(&self) -> (bool, bool, bool) {
        (
            self.transcriber.is_some(),
            self.narrative.is_some(),
            self.publisher.is_some(),
        )
    }

    fn narrative(&self) -> Result<&NarrativeGenerator, StoryServiceError> {
        self.narrative
            .as_ref()
            .ok_or(StoryServiceError::Unavailable("Text generation"))
    }

    /// Create a story from an upload payload
    pub async fn create(
        &self,
        owner: &User,
        payload: UploadPayload,
        title: Option<&str>,
    ) -> Result<(Story, ConversationHistory), StoryServiceError> {
        match payload {
            UploadPayload::Audio(audio) => self.create_from_audio(owner, &audio, title).await,
            UploadPayload::Text(text) => self.create_from_text(owner, &text, title).await,
        }
    }

    /// Transcribe audio, then draft a story from the transcript
    pub async fn create_from_audio(
        &self,
        owner: &User,
        audio: &StoredUpload,
        title: Option<&str>,
    ) -> Result<(Story, ConversationHistory), StoryServiceError> {
        let transcriber = self
            .transcriber
            .as_ref()
            .ok_or(StoryServiceError::Unavailable("Transcription"))?;
        // Generation must be available before any audio is sent out
        self.narrative()?;

        let transcript = transcriber.transcribe(audio).await?;
        tracing::info!(
            user_id = owner.id,
            file = %audio.original_name(),
            chars = transcript.len(),
            "Audio transcribed"
        );

        self.create_from_transcript(owner, transcript, StorySource::Audio, title)
            .await
    }

    /// Draft a story from pasted session notes
    pub async fn create_from_text(
        &self,
        owner: &User,
        text: &str,
        title: Option<&str>,
    ) -> Result<(Story, ConversationHistory), StoryServiceError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(UploadError::EmptyText.into());
        }
        self.create_from_transcript(owner, text.to_string(), StorySource::Text, title)
            .await
    }

    async fn create_from_transcript(
        &self,
        owner: &User,
        transcript: String,
        source: StorySource,
        title: Option<&str>,
    ) -> Result<(Story, ConversationHistory), StoryServiceError> {
        let draft = self.narrative()?.draft(&transcript).await?;

        let input = CreateStoryInput {
            owner_id: owner.id,
            title: story_title(title, &draft.content),
            content: draft.content.clone(),
            transcript,
            source,
        };

        let (story, history) = self
            .stories
            .create_with_conversation(&input, &draft.turns)
            .await?;

        tracing::info!(story_id = story.id, user_id = owner.id, "Story drafted");
        Ok((story, history))
    }

    /// List stories visible to the user (admins see every story)
    pub async fn list(
        &self,
        user: &User,
        params: &ListParams,
    ) -> Result<PagedResult<Story>, StoryServiceError> {
        let owner = if user.is_admin() { None } else { Some(user.id) };
        Ok(self.stories.list(owner, params).await?)
    }

    /// Get a story the user may access
    pub async fn get(&self, user: &User, id: i64) -> Result<Story, StoryServiceError> {
        let story = self
            .stories
            .get_by_id(id)
            .await?
            .ok_or(StoryServiceError::NotFound)?;

        if !user.can_manage(story.owner_id) {
            return Err(StoryServiceError::Forbidden);
        }
        Ok(story)
    }

    async fn active_conversation(&self, story: &Story) -> Result<Conversation, StoryServiceError> {
        let conversation = self.conversation_of(story).await?;
        if story.published || !conversation.is_active() {
            return Err(archived());
        }
        Ok(conversation)
    }

    async fn conversation_of(&self, story: &Story) -> Result<Conversation, StoryServiceError> {
        self.conversations
            .get_by_story(story.id)
            .await?
            .ok_or_else(|| {
                StoryServiceError::InternalError(anyhow::anyhow!(
                    "Story {} has no conversation",
                    story.id
                ))
            })
    }

    /// Edit title and/or content.
    ///
    /// A content edit is stored as an assistant turn so the conversation and
    /// the draft stay in step; a title sent with it is written in the same
    /// transaction. Published stories only accept title changes.
    pub async fn update(
        &self,
        user: &User,
        id: i64,
        input: UpdateStoryInput,
    ) -> Result<Story, StoryServiceError> {
        if input.is_empty() {
            return Err(StoryServiceError::ValidationError(
                "Nothing to update: provide title and/or content".to_string(),
            ));
        }

        let title = input.title.as_deref().map(validate_title).transpose()?;
        let content = match input.content.as_deref().map(str::trim) {
            Some("") => {
                return Err(StoryServiceError::ValidationError(
                    "Content cannot be empty".to_string(),
                ))
            }
            other => other,
        };

        let story = self.get(user, id).await?;

        match (content, title) {
            (Some(content), title) => {
                let conversation = self.active_conversation(&story).await?;
                self.conversations
                    .append(
                        &conversation.id,
                        &[NewTurn::assistant(content)],
                        Some(DraftUpdate {
                            story_id: story.id,
                            content,
                            title: title.as_deref(),
                        }),
                    )
                    .await?
                    .ok_or_else(archived)?;
            }
            (None, Some(title)) => self.stories.update_title(story.id, &title).await?,
            (None, None) => {}
        }

        self.get(user, id).await
    }

    /// Delete a story and its conversation
    pub async fn delete(&self, user: &User, id: i64) -> Result<(), StoryServiceError> {
        let story = self.get(user, id).await?;
        if !self.stories.delete(story.id).await? {
            return Err(StoryServiceError::NotFound);
        }
        tracing::info!(story_id = id, user_id = user.id, "Story deleted");
        Ok(())
    }

    /// Full conversation history of a story
    pub async fn conversation(
        &self,
        user: &User,
        id: i64,
    ) -> Result<ConversationHistory, StoryServiceError> {
        let story = self.get(user, id).await?;
        let conversation = self.conversation_of(&story).await?;
        Ok(self.conversations.load(conversation).await?)
    }

    /// Run one refinement round.
    ///
    /// The user and assistant turns and the new draft are stored together,
    /// and only after the provider has replied.
    pub async fn chat(
        &self,
        user: &User,
        id: i64,
        message: &str,
    ) -> Result<ChatOutcome, StoryServiceError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(StoryServiceError::ValidationError(
                "Message cannot be empty".to_string(),
            ));
        }
        if message.len() > MAX_MESSAGE_LEN {
            return Err(StoryServiceError::ValidationError(format!(
                "Message must be at most {} bytes",
                MAX_MESSAGE_LEN
            )));
        }

        let narrative = self.narrative()?;
        let story = self.get(user, id).await?;
        let conversation = self.active_conversation(&story).await?;
        let history = self.conversations.load(conversation).await?;

        let refinement = narrative.refine(&history.messages(), message).await?;
        let content = refinement.content().to_string();

        let turns = self
            .conversations
            .append(
                &history.conversation.id,
                &refinement.into_turns(),
                Some(DraftUpdate {
                    story_id: story.id,
                    content: &content,
                    title: None,
                }),
            )
            .await?
            .ok_or_else(archived)?;

        tracing::debug!(story_id = story.id, turns = turns.len(), "Refinement stored");

        Ok(ChatOutcome {
            story: self.get(user, id).await?,
            turns,
        })
    }

    /// Clear the conversation and re-seed it from the current draft
    pub async fn reset_conversation(
        &self,
        user: &User,
        id: i64,
    ) -> Result<ConversationHistory, StoryServiceError> {
        let story = self.get(user, id).await?;
        let conversation = self.active_conversation(&story).await?;

        let turns = self
            .conversations
            .replace(
                &conversation.id,
                &reseed_turns(&self.system_prompt, &story.content),
            )
            .await?
            .ok_or_else(archived)?;

        Ok(ConversationHistory {
            conversation,
            turns,
        })
    }

    /// Publish a story to the wiki.
    ///
    /// Already-published stories are returned as they are. On failure the
    /// story stays unpublished and the call can be repeated.
    pub async fn publish(
        &self,
        user: &User,
        id: i64,
        parent_id: Option<String>,
    ) -> Result<Story, StoryServiceError> {
        let story = self.get(user, id).await?;
        if story.published {
            return Ok(story);
        }

        let publisher = self
            .publisher
            .as_ref()
            .ok_or(StoryServiceError::Unavailable("Wiki publishing"))?;

        let page = WikiPage {
            title: story.title.clone(),
            markdown: story.content.clone(),
            parent_id: parent_id
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty()),
        };

        let published = publisher.publish(&page).await.map_err(|e| {
            tracing::error!(story_id = story.id, error = %e, "Publishing failed");
            e
        })?;

        Ok(self.stories.mark_published(story.id, &published).await?)
    }
}

/// The conversation was archived, possibly by a publish that landed mid-request
fn archived() -> StoryServiceError {
    StoryServiceError::Conflict("Story is published; its conversation is archived".to_string())
}

fn validate_title(title: &str) -> Result<String, StoryServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoryServiceError::ValidationError(
            "Title cannot be empty".to_string(),
        ));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(StoryServiceError::ValidationError(format!(
            "Title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    Ok(title.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::PublishedPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Returns a fixed transcript, or fails when asked to
    #[derive(Default)]
    pub struct FakeTranscriber {
        pub fail: AtomicBool,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(&self, audio: &StoredUpload) -> Result<String, TranscriptionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TranscriptionError::ApiError {
                    status: 500,
                    message: "decoder crashed".to_string(),
                });
            }
            Ok(format!("DM: Welcome back. ({})", audio.original_name()))
        }
    }

    /// Records pages; fails while `fail` is set
    #[derive(Default)]
    pub struct FakePublisher {
        pub fail: AtomicBool,
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl WikiPublisher for FakePublisher {
        async fn publish(&self, page: &WikiPage) -> Result<PublishedPage, PublishError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(PublishError::ApiError {
                    status: 503,
                    message: "wiki down".to_string(),
                });
            }
            let parent = page.parent_id.as_deref().unwrap_or("root");
            Ok(PublishedPage {
                page_id: format!("{}-{}", parent, n),
                url: format!("https://wiki.test/pages/{}-{}", parent, n),
            })
        }
    }
}
