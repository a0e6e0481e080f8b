//! Speech-to-text adapter
//!
//! [`Transcriber`] is the seam the story service depends on;
//! [`WhisperTranscriber`] talks to any OpenAI-compatible
//! `/audio/transcriptions` endpoint. One request per upload, no retries.

use crate::config::TranscriptionConfig;
use crate::services::provider;
use crate::services::upload::StoredUpload;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

/// Transcription errors
#[derive(Debug, thiserror::Error)]
pub enum TranscriptionError {
    #[error("Failed to read uploaded audio: {0}")]
    ReadFailed(#[from] std::io::Error),

    #[error("Transcription request failed: {0}")]
    RequestFailed(String),

    #[error("Transcription provider returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse transcription response: {0}")]
    ParseError(String),

    #[error("Transcription came back empty")]
    EmptyTranscript,
}

/// Turns stored audio into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &StoredUpload) -> Result<String, TranscriptionError>;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible transcription endpoint
#[derive(Clone)]
pub struct WhisperTranscriber {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    language: Option<String>,
    prompt: Option<String>,
}

impl WhisperTranscriber {
    /// Build a transcriber from configuration.
    ///
    /// Returns `Ok(None)` when no API key is configured.
    pub fn from_config(config: &TranscriptionConfig) -> reqwest::Result<Option<Self>> {
        let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            client: provider::build_client(config.timeout_secs)?,
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            language: config.language.clone(),
            prompt: config.prompt.clone(),
        }))
    }

    /// Multipart form whose file part streams from the temp file
    async fn build_form(&self, audio: &StoredUpload) -> Result<Form, TranscriptionError> {
        let reader = audio.open().await?;
        let body = Body::wrap_stream(ReaderStream::new(reader));
        let file = Part::stream_with_length(body, audio.size())
            .file_name(audio.original_name().to_string())
            .mime_str(audio.mime_type())
            .map_err(|e| TranscriptionError::RequestFailed(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json");

        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }
        if let Some(prompt) = &self.prompt {
            form = form.text("prompt", prompt.clone());
        }
        Ok(form)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &StoredUpload) -> Result<String, TranscriptionError> {
        let form = self.build_form(audio).await?;

        tracing::debug!(
            model = %self.model,
            file = %audio.original_name(),
            size = audio.size(),
            "Sending audio for transcription"
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Transcription request failed");
                TranscriptionError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = provider::error_message(status, &body);
            tracing::warn!(status = status.as_u16(), %message, "Transcription provider error");
            return Err(TranscriptionError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::ParseError(e.to_string()))?;

        let text = parsed.text.trim();
        if text.is_empty() {
            return Err(TranscriptionError::EmptyTranscript);
        }

        tracing::info!(chars = text.len(), "Transcription complete");
        Ok(text.to_string())
    }
}
