//! Narrative generator
//!
//! Frames transcripts and refinement requests as chat messages for the
//! configured [`TextGenerator`]. Replies are used verbatim; nothing is
//! invented here when the provider fails.

use crate::models::NewTurn;
use crate::services::generation::{GenerationError, TextGenerator};
use chrono::Utc;
use std::sync::Arc;

const DRAFT_INSTRUCTION: &str =
    "Write the story of this session from the transcript below.\n\nTranscript:\n";

const MAX_TITLE_CHARS: usize = 200;

/// Output of a first draft: the turns that start the conversation
#[derive(Debug, Clone)]
pub struct Draft {
    /// system, user(transcript), assistant(draft)
    pub turns: Vec<NewTurn>,
    pub content: String,
}

/// Output of one refinement round
#[derive(Debug, Clone)]
pub struct Refinement {
    pub user: NewTurn,
    pub assistant: NewTurn,
}

impl Refinement {
    pub fn content(&self) -> &str {
        &self.assistant.content
    }

    pub fn into_turns(self) -> Vec<NewTurn> {
        vec![self.user, self.assistant]
    }
}

#[derive(Clone)]
pub struct NarrativeGenerator {
    generator: Arc<dyn TextGenerator>,
    system_prompt: String,
}

impl NarrativeGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, system_prompt: impl Into<String>) -> Self {
        Self {
            generator,
            system_prompt: system_prompt.into(),
        }
    }

    /// Produce the first draft for a transcript
    pub async fn draft(&self, transcript: &str) -> Result<Draft, GenerationError> {
        let mut turns = vec![
            NewTurn::system(self.system_prompt.clone()),
            NewTurn::user(format!("{}{}", DRAFT_INSTRUCTION, transcript)),
        ];

        let content = self.generator.complete(&turns).await?;
        turns.push(NewTurn::assistant(content.clone()));

        Ok(Draft { turns, content })
    }

    /// Ask for a revision given the full history so far
    pub async fn refine(
        &self,
        history: &[NewTurn],
        instruction: &str,
    ) -> Result<Refinement, GenerationError> {
        let user = NewTurn::user(instruction);

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.extend_from_slice(history);
        messages.push(user.clone());

        let reply = self.generator.complete(&messages).await?;

        Ok(Refinement {
            user,
            assistant: NewTurn::assistant(reply),
        })
    }
}

/// Turns that re-seed a cleared conversation from the current story text
pub fn reseed_turns(system_prompt: &str, content: &str) -> Vec<NewTurn> {
    vec![
        NewTurn::system(system_prompt),
        NewTurn::assistant(content),
    ]
}

/// Title for a story: the requested one, else the draft's first heading,
/// else a dated fallback.
pub fn story_title(requested: Option<&str>, content: &str) -> String {
    if let Some(title) = requested.map(str::trim).filter(|t| !t.is_empty()) {
        return truncate_chars(title, MAX_TITLE_CHARS);
    }

    content
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim())
        .filter(|heading| !heading.is_empty())
        .map(|heading| truncate_chars(heading, MAX_TITLE_CHARS))
        .unwrap_or_else(|| format!("Session of {}", Utc::now().format("%Y-%m-%d")))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::TurnRole;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted generator: fails when asked to, otherwise numbers its replies
    #[derive(Default)]
    pub struct FakeGenerator {
        pub calls: AtomicUsize,
        pub fail: std::sync::atomic::AtomicBool,
        pub last_messages: Mutex<Vec<NewTurn>>,
    }

    impl FakeGenerator {
        pub fn failing() -> Self {
            let fake = Self::default();
            fake.set_failing(true);
            fake
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for FakeGenerator {
        async fn complete(&self, messages: &[NewTurn]) -> Result<String, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            *self.last_messages.lock().unwrap() = messages.to_vec();

            if self.fail.load(Ordering::SeqCst) {
                return Err(GenerationError::ApiError {
                    status: 503,
                    message: "model overloaded".to_string(),
                });
            }

            let last_user = messages
                .iter()
                .rev()
                .find(|m| m.role == TurnRole::User)
                .map(|m| m.content.as_str())
                .unwrap_or_default();
            Ok(format!("# Chapter {}\n\nRevised after: {}", n, last_user))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeGenerator;
    use super::*;
    use crate::models::TurnRole;

    fn narrative(fake: Arc<FakeGenerator>) -> NarrativeGenerator {
        NarrativeGenerator::new(fake, "You are the chronicler.")
    }

    #[tokio::test]
    async fn test_draft_builds_three_turns() {
        let fake = Arc::new(FakeGenerator::default());
        let draft = narrative(fake.clone()).draft("DM: Roll initiative.").await.unwrap();

        let roles: Vec<TurnRole> = draft.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![TurnRole::System, TurnRole::User, TurnRole::Assistant]);
        assert_eq!(draft.turns[0].content, "You are the chronicler.");
        assert!(draft.turns[1].content.ends_with("DM: Roll initiative."));
        assert_eq!(draft.turns[2].content, draft.content);
        assert!(!draft.content.is_empty());
        assert_eq!(fake.last_messages.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refine_sends_full_context() {
        let fake = Arc::new(FakeGenerator::default());
        let history = vec![
            NewTurn::system("You are the chronicler."),
            NewTurn::user("Transcript"),
            NewTurn::assistant("Draft one"),
        ];

        let refinement = narrative(fake.clone())
            .refine(&history, "Make the bard funnier")
            .await
            .unwrap();

        assert_eq!(refinement.user, NewTurn::user("Make the bard funnier"));
        assert_eq!(refinement.assistant.role, TurnRole::Assistant);
        assert!(refinement.content().contains("Make the bard funnier"));

        let sent = fake.last_messages.lock().unwrap().clone();
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[..3], history[..]);
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let fake = Arc::new(FakeGenerator::failing());
        let result = narrative(fake).draft("anything").await;
        assert!(matches!(result, Err(GenerationError::ApiError { status: 503, .. })));
    }

    #[test]
    fn test_story_title() {
        assert_eq!(story_title(Some("  The Lich's Bargain "), "# Ignored"), "The Lich's Bargain");
        assert_eq!(
            story_title(None, "Intro line\n\n## Into the Underdark\nText"),
            "Into the Underdark"
        );
        assert_eq!(story_title(Some("   "), "# Heading"), "Heading");
        assert!(story_title(None, "No headings here").starts_with("Session of "));
        assert_eq!(story_title(Some(&"é".repeat(300)), "").chars().count(), 200);
    }

    #[test]
    fn test_reseed_turns() {
        let turns = reseed_turns("prompt", "current story");
        assert_eq!(turns, vec![NewTurn::system("prompt"), NewTurn::assistant("current story")]);
    }
}
