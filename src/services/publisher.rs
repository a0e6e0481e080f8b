//! Wiki publishing adapter
//!
//! [`WikiPublisher`] creates one wiki page per story. [`ConfluencePublisher`]
//! targets the Confluence REST API (`POST /rest/api/content`) with basic auth
//! and the storage representation produced by [`render_storage`].

use crate::config::WikiConfig;
use crate::models::PublishedPage;
use crate::services::markdown::render_storage;
use crate::services::provider;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Publishing errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Wiki request failed: {0}")]
    RequestFailed(String),

    #[error("Wiki returned {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse wiki response: {0}")]
    ParseError(String),
}

/// A page to create
#[derive(Debug, Clone)]
pub struct WikiPage {
    pub title: String,
    /// Story body as markdown
    pub markdown: String,
    /// Parent page override; the configured parent is used when `None`
    pub parent_id: Option<String>,
}

#[async_trait]
pub trait WikiPublisher: Send + Sync {
    async fn publish(&self, page: &WikiPage) -> Result<PublishedPage, PublishError>;
}

#[derive(Serialize)]
struct CreateContentRequest<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    title: &'a str,
    space: SpaceRef<'a>,
    ancestors: Vec<AncestorRef<'a>>,
    body: ContentBody,
}

#[derive(Serialize)]
struct SpaceRef<'a> {
    key: &'a str,
}

#[derive(Serialize)]
struct AncestorRef<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct ContentBody {
    storage: StorageValue,
}

#[derive(Serialize)]
struct StorageValue {
    value: String,
    representation: &'static str,
}

#[derive(Deserialize)]
struct CreateContentResponse {
    id: String,
    #[serde(rename = "_links", default)]
    links: Option<ContentLinks>,
}

#[derive(Deserialize)]
struct ContentLinks {
    base: Option<String>,
    webui: Option<String>,
}

#[derive(Deserialize)]
struct ConfluenceError {
    message: String,
}

/// Confluence Cloud / Server publisher
#[derive(Clone)]
pub struct ConfluencePublisher {
    client: Client,
    base_url: String,
    username: String,
    api_token: String,
    space_key: String,
    parent_page_id: String,
}

impl ConfluencePublisher {
    /// Build a publisher; `Ok(None)` when publishing is disabled or has no token.
    pub fn from_config(config: &WikiConfig) -> reqwest::Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let Some(api_token) = config.api_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            client: provider::build_client(config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            api_token: api_token.to_string(),
            space_key: config.space_key.clone(),
            parent_page_id: config.parent_page_id.clone(),
        }))
    }

    fn page_url(&self, response: &CreateContentResponse) -> String {
        match &response.links {
            Some(ContentLinks {
                base: Some(base),
                webui: Some(webui),
            }) => format!("{}{}", base, webui),
            Some(ContentLinks {
                base: None,
                webui: Some(webui),
            }) => format!("{}{}", self.base_url, webui),
            _ => format!(
                "{}/pages/viewpage.action?pageId={}",
                self.base_url, response.id
            ),
        }
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ConfluenceError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| provider::error_message(status, body))
}

#[async_trait]
impl WikiPublisher for ConfluencePublisher {
    async fn publish(&self, page: &WikiPage) -> Result<PublishedPage, PublishError> {
        let parent = page.parent_id.as_deref().unwrap_or(&self.parent_page_id);

        let request = CreateContentRequest {
            content_type: "page",
            title: &page.title,
            space: SpaceRef {
                key: &self.space_key,
            },
            ancestors: vec![AncestorRef { id: parent }],
            body: ContentBody {
                storage: StorageValue {
                    value: render_storage(&page.markdown),
                    representation: "storage",
                },
            },
        };

        tracing::debug!(title = %page.title, parent = %parent, "Publishing page to wiki");

        let response = self
            .client
            .post(format!("{}/rest/api/content", self.base_url))
            .basic_auth(&self.username, Some(&self.api_token))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Wiki request failed");
                PublishError::RequestFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(status, &body);
            tracing::warn!(status = status.as_u16(), %message, "Wiki rejected page");
            return Err(PublishError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreateContentResponse = response
            .json()
            .await
            .map_err(|e| PublishError::ParseError(e.to_string()))?;

        let published = PublishedPage {
            url: self.page_url(&created),
            page_id: created.id,
        };
        tracing::info!(page_id = %published.page_id, url = %published.url, "Page published");
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::provider::spawn_test_server;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    fn wiki_config(base_url: String) -> WikiConfig {
        WikiConfig {
            enabled: true,
            base_url,
            username: "dm@example.com".to_string(),
            api_token: Some("wiki-token".to_string()),
            space_key: "DND".to_string(),
            parent_page_id: "1000".to_string(),
            timeout_secs: Some(5),
        }
    }

    fn page(parent_id: Option<&str>) -> WikiPage {
        WikiPage {
            title: "Session 4".to_string(),
            markdown: "# Session 4\n\nThe *bard* sang.".to_string(),
            parent_id: parent_id.map(str::to_string),
        }
    }

    /// Accepts the page only with the expected credentials and echoes the parent id
    async fn create_content(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        // base64("dm@example.com:wiki-token")
        let expected = "Basic ZG1AZXhhbXBsZS5jb206d2lraS10b2tlbg==";
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"statusCode": 401, "message": "Unauthorized"})),
            );
        }

        let storage = &body["body"]["storage"];
        let valid = body["type"] == "page"
            && body["space"]["key"] == "DND"
            && storage["representation"] == "storage"
            && storage["value"]
                .as_str()
                .is_some_and(|v| v.contains("<em>bard</em>"));
        if !valid {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"statusCode": 400, "message": "Malformed page"})),
            );
        }

        let parent = body["ancestors"][0]["id"].as_str().unwrap_or_default();
        let id = format!("{}01", parent);
        (
            StatusCode::OK,
            Json(json!({
                "id": id,
                "type": "page",
                "_links": {
                    "base": "https://wiki.example.com/wiki",
                    "webui": format!("/spaces/DND/pages/{}", id),
                }
            })),
        )
    }

    async fn publisher() -> ConfluencePublisher {
        let url = spawn_test_server(Router::new().route("/rest/api/content", post(create_content))).await;
        ConfluencePublisher::from_config(&wiki_config(format!("{}/", url)))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_from_config_disabled_or_tokenless() {
        let disabled = WikiConfig {
            enabled: false,
            ..wiki_config("http://wiki".to_string())
        };
        assert!(ConfluencePublisher::from_config(&disabled).unwrap().is_none());

        let tokenless = WikiConfig {
            api_token: None,
            ..wiki_config("http://wiki".to_string())
        };
        assert!(ConfluencePublisher::from_config(&tokenless).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publish_uses_configured_parent() {
        let published = publisher().await.publish(&page(None)).await.unwrap();

        assert_eq!(published.page_id, "100001");
        assert_eq!(
            published.url,
            "https://wiki.example.com/wiki/spaces/DND/pages/100001"
        );
    }

    #[tokio::test]
    async fn test_publish_parent_override() {
        let published = publisher().await.publish(&page(Some("77"))).await.unwrap();
        assert_eq!(published.page_id, "7701");
    }

    #[tokio::test]
    async fn test_publish_rejected_credentials() {
        let mut publisher = publisher().await;
        publisher.api_token = "stale".to_string();

        let err = publisher.publish(&page(None)).await.unwrap_err();
        match err {
            PublishError::ApiError { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Unauthorized");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_page_url_fallbacks() {
        let publisher = ConfluencePublisher::from_config(&wiki_config("https://wiki.test".to_string()))
            .unwrap()
            .unwrap();

        let no_links = CreateContentResponse {
            id: "42".to_string(),
            links: None,
        };
        assert_eq!(
            publisher.page_url(&no_links),
            "https://wiki.test/pages/viewpage.action?pageId=42"
        );

        let relative = CreateContentResponse {
            id: "42".to_string(),
            links: Some(ContentLinks {
                base: None,
                webui: Some("/x/AbC".to_string()),
            }),
        };
        assert_eq!(publisher.page_url(&relative), "https://wiki.test/x/AbC");
    }
}
