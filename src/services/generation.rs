//! Text-generation adapter
//!
//! [`TextGenerator`] takes a full message history and returns the assistant
//! reply. [`ChatCompletionsClient`] speaks the OpenAI-compatible chat
//! completions wire format, which most hosted and local LLM servers accept.

use crate::config::GenerationConfig;
use crate::models::NewTurn;
use crate::services::provider;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Text-generation errors
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    #[error("Generation provider returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse generation response: {0}")]
    ParseError(String),

    #[error("Generation provider returned an empty reply")]
    EmptyResponse,
}

/// Produces the next assistant message for a conversation
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, messages: &[NewTurn]) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl ChatCompletionsClient {
    /// Build a client from configuration; `Ok(None)` when no API key is set.
    pub fn from_config(config: &GenerationConfig) -> reqwest::Result<Option<Self>> {
        let Some(api_key) = config.api_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            client: provider::build_client(config.timeout_secs)?,
            api_url: config.api_url.clone(),
            api_key: api_key.to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }))
    }
}

fn extract_reply(response: ChatCompletionResponse) -> Result<String, GenerationError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();

    let content = content.trim();
    if content.is_empty() {
        return Err(GenerationError::EmptyResponse);
    }
    Ok(content.to_string())
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn complete(&self, messages: &[NewTurn]) -> Result<String, GenerationError> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        tracing::debug!(model = %self.model, messages = messages.len(), "Requesting completion");

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Generation request failed");
                GenerationError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = provider::error_message(status, &body);
            tracing::warn!(status = status.as_u16(), %message, "Generation provider error");
            return Err(GenerationError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::ParseError(e.to_string()))?;

        extract_reply(parsed)
    }
}
