//! Shared plumbing for the external HTTP providers

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Build an HTTP client with a whole-request timeout
pub fn build_client(timeout_secs: u64) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Human-readable message from an OpenAI-style error body, falling back to
/// the raw body (or the status text when the body is empty).
pub fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(wrapper) = serde_json::from_str::<ErrorResponse>(body) {
        return wrapper.error.message;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    } else {
        trimmed.chars().take(500).collect()
    }
}

/// Serve a router on an ephemeral local port, returning its base URL
#[cfg(test)]
pub(crate) async fn spawn_test_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}", addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_openai_shape() {
        let body = r#"{"error":{"message":"Invalid API key","type":"auth","code":null}}"#;
        assert_eq!(error_message(StatusCode::UNAUTHORIZED, body), "Invalid API key");
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream exploded\n"),
            "upstream exploded"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, ""), "Bad Gateway");

        let long = "x".repeat(2000);
        assert_eq!(error_message(StatusCode::INTERNAL_SERVER_ERROR, &long).len(), 500);
    }
}
