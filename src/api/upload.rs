//! Upload API endpoint
//!
//! POST /api/v1/upload accepts multipart/form-data with either a `file`
//! field (session audio) or a `text` field (session notes), plus an optional
//! `title`. The transcript is drafted into a new story whose first
//! conversation turns are returned with it.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::stories::StoryWithConversation;
use crate::config::UploadConfig;
use crate::services::upload::{validate_text, StoredUpload, UploadError, UploadPayload, UploadWriter};

/// Build the upload router; the body limit follows the upload configuration
pub fn router(config: &UploadConfig) -> Router<AppState> {
    Router::new().route(
        "/upload",
        post(upload_session).layer(DefaultBodyLimit::max(config.body_limit())),
    )
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        if err.is_client_error() {
            ApiError::validation_error(err.to_string())
        } else {
            ApiError::internal_error(err)
        }
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("Request body exceeds the upload limit")
    } else {
        ApiError::validation_error(format!("Invalid multipart body: {}", err.body_text()))
    }
}

/// Fields collected from the form
#[derive(Default)]
struct UploadForm {
    audio: Option<StoredUpload>,
    text: Option<String>,
    title: Option<String>,
}

impl UploadForm {
    fn into_payload(self) -> Result<(UploadPayload, Option<String>), ApiError> {
        let payload = match (self.audio, self.text) {
            (Some(audio), None) => UploadPayload::Audio(audio),
            (None, Some(text)) => UploadPayload::Text(text),
            (Some(_), Some(_)) => {
                return Err(ApiError::validation_error(
                    "Provide either a file or text, not both",
                ))
            }
            (None, None) => {
                return Err(ApiError::validation_error(
                    "Missing upload: provide a 'file' or 'text' field",
                ))
            }
        };
        Ok((payload, self.title))
    }
}

/// POST /api/v1/upload - Upload session audio or notes
///
/// Requires authentication. Audio is streamed to a temporary file and never
/// held in memory whole; the file is removed when this handler returns,
/// whatever the outcome.
async fn upload_session(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<StoryWithConversation>), ApiError> {
    let config = &state.upload_config;
    let mut form = UploadForm::default();

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                if form.audio.is_some() {
                    return Err(ApiError::validation_error("Only one file may be uploaded"));
                }
                let filename = field.file_name().unwrap_or("").to_string();

                let mut writer = UploadWriter::create(config, &filename).await?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    writer.write_chunk(&chunk).await?;
                }
                form.audio = Some(writer.finish().await?);
            }
            "text" => {
                let text = field.text().await.map_err(multipart_error)?;
                form.text = Some(validate_text(&text, config)?.to_string());
            }
            "title" => {
                let title = field.text().await.map_err(multipart_error)?;
                form.title = Some(title).filter(|t| !t.trim().is_empty());
            }
            _ => {}
        }
    }

    let (payload, title) = form.into_payload()?;
    let (story, conversation) = state
        .story_service
        .create(&user.0, payload, title.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(StoryWithConversation {
            story,
            conversation,
        }),
    ))
}
