//! Story API endpoints
//!
//! - GET /api/v1/stories - List own stories (admins: all)
//! - GET /api/v1/stories/{id} - Story detail
//! - PUT /api/v1/stories/{id} - Edit title and/or content
//! - DELETE /api/v1/stories/{id} - Delete story and conversation
//! - GET /api/v1/stories/{id}/conversation - Full turn history
//! - DELETE /api/v1/stories/{id}/conversation - Clear and re-seed history
//! - POST /api/v1/stories/{id}/chat - Refinement turn
//! - POST /api/v1/stories/{id}/publish - Publish to the wiki

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{ConversationHistory, ListParams, PagedResult, Story, Turn, UpdateStoryInput};
use crate::services::publisher::PublishError;
use crate::services::story::StoryServiceError;

/// A story together with its conversation
#[derive(Debug, Serialize)]
pub struct StoryWithConversation {
    pub story: Story,
    pub conversation: ConversationHistory,
}

/// Query parameters for listing stories
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

/// Request body for a refinement turn
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Response for a refinement turn
#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub turns: Vec<Turn>,
    pub story: Story,
}

/// Request body for publishing; the body itself is optional
#[derive(Debug, Default, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub parent_page_id: Option<String>,
}

impl From<StoryServiceError> for ApiError {
    fn from(err: StoryServiceError) -> Self {
        match err {
            StoryServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            StoryServiceError::NotFound => ApiError::not_found("Story not found"),
            StoryServiceError::Forbidden => {
                ApiError::forbidden("You do not have access to this story")
            }
            StoryServiceError::Conflict(msg) => ApiError::conflict(msg),
            StoryServiceError::Unavailable(what) => {
                ApiError::service_unavailable(format!("{} is not configured", what))
            }
            StoryServiceError::Upload(e) => e.into(),
            StoryServiceError::Transcription(e) => {
                ApiError::new("TRANSCRIPTION_FAILED", e.to_string())
            }
            StoryServiceError::Generation(e) => {
                ApiError::new("GENERATION_UNAVAILABLE", e.to_string())
            }
            StoryServiceError::Publish(e) => publish_error(e),
            StoryServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

fn publish_error(err: PublishError) -> ApiError {
    let status = match &err {
        PublishError::ApiError { status, .. } => Some(*status),
        _ => None,
    };
    ApiError::with_details(
        "PUBLISH_FAILED",
        err.to_string(),
        serde_json::json!({ "wiki_status": status, "retryable": true }),
    )
}

/// Build the story router (all routes require authentication)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stories", get(list_stories))
        .route(
            "/stories/{id}",
            get(get_story).put(update_story).delete(delete_story),
        )
        .route(
            "/stories/{id}/conversation",
            get(get_conversation).delete(reset_conversation),
        )
        .route("/stories/{id}/chat", post(chat))
        .route("/stories/{id}/publish", post(publish))
}

/// GET /api/v1/stories - Paginated list, newest first
async fn list_stories(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<PagedResult<Story>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let result = state.story_service.list(&user.0, &params).await?;
    Ok(Json(result))
}

/// GET /api/v1/stories/{id}
async fn get_story(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Story>, ApiError> {
    Ok(Json(state.story_service.get(&user.0, id).await?))
}

/// PUT /api/v1/stories/{id}
async fn update_story(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStoryInput>,
) -> Result<Json<Story>, ApiError> {
    Ok(Json(state.story_service.update(&user.0, id, body).await?))
}

/// DELETE /api/v1/stories/{id}
async fn delete_story(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.story_service.delete(&user.0, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/stories/{id}/conversation
async fn get_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationHistory>, ApiError> {
    Ok(Json(state.story_service.conversation(&user.0, id).await?))
}

/// DELETE /api/v1/stories/{id}/conversation - Clear history, keep the draft
async fn reset_conversation(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<ConversationHistory>, ApiError> {
    Ok(Json(
        state.story_service.reset_conversation(&user.0, id).await?,
    ))
}

/// POST /api/v1/stories/{id}/chat - Ask for a revision
async fn chat(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let outcome = state.story_service.chat(&user.0, id, &body.message).await?;
    Ok(Json(ChatResponse {
        reply: outcome.story.content.clone(),
        turns: outcome.turns,
        story: outcome.story,
    }))
}

/// POST /api/v1/stories/{id}/publish
async fn publish(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<PublishRequest>>,
) -> Result<Json<Story>, ApiError> {
    let parent = body.and_then(|Json(b)| b.parent_page_id);
    Ok(Json(state.story_service.publish(&user.0, id, parent).await?))
}
