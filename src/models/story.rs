//! Story model
//!
//! A story is the narrative recap of one play session. It is created from the
//! first successful generation, rewritten by every accepted refinement, and
//! finally published to the wiki.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Story entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    /// Unique identifier
    pub id: i64,
    /// Owning user
    pub owner_id: i64,
    /// Title (also used as the wiki page title)
    pub title: String,
    /// Current draft (markdown); always the latest assistant turn
    pub content: String,
    /// Source text the draft was generated from
    pub transcript: String,
    /// Whether the source was an audio recording or pasted text
    pub source: StorySource,
    /// Whether the story has been published to the wiki
    pub published: bool,
    /// Wiki page id once published
    pub wiki_page_id: Option<String>,
    /// Wiki page URL once published
    pub wiki_url: Option<String>,
    /// Publication timestamp
    pub published_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Story {
    /// Check if the story can still be refined
    pub fn is_editable(&self) -> bool {
        !self.published
    }
}

/// Where the transcript came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorySource {
    /// Transcribed audio recording
    Audio,
    /// Pasted session notes
    #[default]
    Text,
}

impl fmt::Display for StorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorySource::Audio => write!(f, "audio"),
            StorySource::Text => write!(f, "text"),
        }
    }
}

impl FromStr for StorySource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "audio" => Ok(StorySource::Audio),
            "text" => Ok(StorySource::Text),
            _ => Err(anyhow::anyhow!("Invalid story source: {}", s)),
        }
    }
}

/// Input for creating a story together with its first conversation
#[derive(Debug, Clone)]
pub struct CreateStoryInput {
    pub owner_id: i64,
    pub title: String,
    pub content: String,
    pub transcript: String,
    pub source: StorySource,
}

/// Partial update of a story's title and/or content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStoryInput {
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New content (recorded as an assistant turn)
    #[serde(default)]
    pub content: Option<String>,
}

impl UpdateStoryInput {
    /// Check if nothing would change
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none()
    }
}

/// Wiki location recorded on a story once publishing succeeds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPage {
    /// Page id assigned by the wiki
    pub page_id: String,
    /// Browser URL of the page
    pub url: String,
}

/// Pagination parameters for list queries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ListParams {
    /// Page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub per_page: u32,
}

impl Default for ListParams {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 10,
        }
    }
}

impl ListParams {
    /// Create new pagination parameters
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, 100),
        }
    }

    /// Calculate the offset for database queries
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * (self.per_page as i64)
    }

    /// Get the limit for database queries
    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

/// Paginated result container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    /// Items in the current page
    pub items: Vec<T>,
    /// Total number of items across all pages
    pub total: i64,
    /// Current page number (1-indexed)
    pub page: u32,
    /// Number of items per page
    pub per_page: u32,
}

impl<T> PagedResult<T> {
    /// Create a new paginated result
    pub fn new(items: Vec<T>, total: i64, params: &ListParams) -> Self {
        Self {
            items,
            total,
            page: params.page,
            per_page: params.per_page,
        }
    }

    /// Calculate the total number of pages
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 || self.total <= 0 {
            return 0;
        }
        let per_page = self.per_page as i64;
        ((self.total + per_page - 1) / per_page) as u32
    }

    /// Map the items while keeping the paging metadata
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PagedResult<U> {
        PagedResult {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
        }
    }
}
