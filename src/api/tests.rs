//! HTTP-level tests against the full router with fake providers

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use serde_json::{json, Value};
use tempfile::TempDir;

use super::{build_router, AppState, RequestStats};
use crate::config::UploadConfig;
use crate::db::repositories::test_support::setup_test_pool;
use crate::db::repositories::{
    SqlxConversationRepository, SqlxSessionRepository, SqlxStoryRepository, SqlxUserRepository,
};
use crate::services::narrative::test_support::FakeGenerator;
use crate::services::story::test_support::{FakePublisher, FakeTranscriber};
use crate::services::{LoginRateLimiter, StoryService, UserService};

struct TestApp {
    server: TestServer,
    generator: Arc<FakeGenerator>,
    transcriber: Arc<FakeTranscriber>,
    publisher: Arc<FakePublisher>,
    temp_dir: TempDir,
}

async fn spawn_app(with_wiki: bool) -> TestApp {
    let pool = setup_test_pool().await;
    let temp_dir = tempfile::tempdir().unwrap();
    let upload_config = UploadConfig {
        temp_dir: temp_dir.path().join("uploads"),
        max_file_size: 1024,
        max_text_size: 4096,
        ..UploadConfig::default()
    };

    let generator = Arc::new(FakeGenerator::default());
    let transcriber = Arc::new(FakeTranscriber::default());
    let publisher = Arc::new(FakePublisher::default());

    let mut story_service = StoryService::new(
        SqlxStoryRepository::boxed(pool.clone()),
        SqlxConversationRepository::boxed(pool.clone()),
        "You are the chronicler.",
    )
    .with_transcriber(transcriber.clone())
    .with_generator(generator.clone());
    if with_wiki {
        story_service = story_service.with_publisher(publisher.clone());
    }

    let state = AppState {
        pool: pool.clone(),
        user_service: Arc::new(UserService::new(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
        )),
        story_service: Arc::new(story_service),
        upload_config: Arc::new(upload_config),
        session_max_age: 7 * 24 * 60 * 60,
        request_stats: Arc::new(RequestStats::new()),
        rate_limiter: Arc::new(LoginRateLimiter::new()),
    };

    let server = TestServer::new(build_router(state, "http://localhost:3000")).unwrap();
    TestApp {
        server,
        generator,
        transcriber,
        publisher,
        temp_dir,
    }
}

async fn spawn() -> TestApp {
    spawn_app(true).await
}

/// Register an account and return its bearer token
async fn register(app: &TestApp, username: &str) -> String {
    let response = app
        .server
        .post("/api/v1/auth/register")
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "correct-horse",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["token"]
        .as_str()
        .unwrap()
        .to_string()
}

/// Upload text notes and return the created story's id
async fn upload_text(app: &TestApp, token: &str, text: &str) -> i64 {
    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(token)
        .multipart(MultipartForm::new().add_text("text", text.to_string()))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()["story"]["id"].as_i64().unwrap()
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

fn uploaded_files(app: &TestApp) -> usize {
    std::fs::read_dir(app.temp_dir.path().join("uploads"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_health_is_public() {
    let app = spawn().await;

    let response = app.server.get("/api/v1/health").await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "ok");
    assert_eq!(body["providers"]["transcription"], true);
    assert_eq!(body["providers"]["wiki"], true);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = spawn().await;

    for path in ["/api/v1/stories", "/api/v1/auth/me", "/api/v1/stories/1/conversation"] {
        let response = app.server.get(path).await;
        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(&response.json::<Value>()), "UNAUTHORIZED");
    }

    let response = app
        .server
        .get("/api/v1/stories")
        .authorization_bearer("not-a-session")
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_login_me_logout() {
    let app = spawn().await;
    let admin_token = register(&app, "gamemaster").await;

    let me = app
        .server
        .get("/api/v1/auth/me")
        .authorization_bearer(&admin_token)
        .await;
    me.assert_status_ok();
    assert_eq!(me.json::<Value>()["role"], "admin");

    register(&app, "player").await;
    let login = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"username_or_email": "player@example.com", "password": "correct-horse"}))
        .await;
    login.assert_status_ok();
    let cookie = login.header("set-cookie");
    assert!(cookie.to_str().unwrap().contains("HttpOnly"));
    let body = login.json::<Value>();
    assert_eq!(body["user"]["role"], "member");
    let token = body["token"].as_str().unwrap().to_string();

    app.server
        .post("/api/v1/auth/logout")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let app = spawn().await;
    register(&app, "ranger").await;

    let response = app
        .server
        .post("/api/v1/auth/register")
        .json(&json!({
            "username": "ranger",
            "email": "other@example.com",
            "password": "correct-horse",
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_login_throttled_after_repeated_failures() {
    let app = spawn().await;
    register(&app, "rogue").await;

    for _ in 0..5 {
        app.server
            .post("/api/v1/auth/login")
            .json(&json!({"username_or_email": "rogue", "password": "wrong-password"}))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    let response = app
        .server
        .post("/api/v1/auth/login")
        .json(&json!({"username_or_email": "rogue", "password": "correct-horse"}))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&response.json::<Value>()), "RATE_LIMIT");
}

#[tokio::test]
async fn test_text_upload_creates_story() {
    let app = spawn().await;
    let token = register(&app, "bard").await;

    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(&token)
        .multipart(
            MultipartForm::new()
                .add_text("title", "The Sunken Temple")
                .add_text("text", "We fought a kraken."),
        )
        .await;

    response.assert_status(StatusCode::CREATED);
    let body = response.json::<Value>();
    assert_eq!(body["story"]["title"], "The Sunken Temple");
    assert_eq!(body["story"]["source"], "text");
    assert_eq!(body["story"]["published"], false);
    assert!(!body["story"]["content"].as_str().unwrap().is_empty());
    assert_eq!(body["conversation"]["turns"].as_array().unwrap().len(), 3);
    assert_eq!(body["conversation"]["status"], "active");
}

#[tokio::test]
async fn test_audio_upload_transcribes_and_cleans_up() {
    let app = spawn().await;
    let token = register(&app, "cleric").await;

    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"ID3 session audio".to_vec())
                .file_name("session-7.MP3")
                .mime_type("audio/mpeg"),
        ))
        .await;

    response.assert_status(StatusCode::CREATED);
    let body = response.json::<Value>();
    assert_eq!(body["story"]["source"], "audio");
    assert!(body["story"]["transcript"]
        .as_str()
        .unwrap()
        .contains("session-7.MP3"));
    assert_eq!(app.transcriber.calls.load(Ordering::SeqCst), 1);
    assert_eq!(uploaded_files(&app), 0);
}

#[tokio::test]
async fn test_upload_rejections() {
    let app = spawn().await;
    let token = register(&app, "wizard").await;

    let disallowed = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"MZ".to_vec()).file_name("spell.exe"),
    );
    let oversized = MultipartForm::new().add_part(
        "file",
        Part::bytes(vec![7u8; 2048]).file_name("long-session.wav"),
    );
    let both = MultipartForm::new()
        .add_text("text", "notes")
        .add_part("file", Part::bytes(b"ID3".to_vec()).file_name("a.mp3"));
    let neither = MultipartForm::new().add_text("title", "Only a title");
    let blank_text = MultipartForm::new().add_text("text", "   ");

    for form in [disallowed, oversized, both, neither, blank_text] {
        let response = app
            .server
            .post("/api/v1/upload")
            .authorization_bearer(&token)
            .multipart(form)
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&response.json::<Value>()), "VALIDATION_ERROR");
    }

    assert_eq!(app.transcriber.calls.load(Ordering::SeqCst), 0);
    assert_eq!(app.generator.calls(), 0);
    assert_eq!(uploaded_files(&app), 0);
}

#[tokio::test]
async fn test_oversized_audio_stream_leaves_no_temp_file() {
    let app = spawn().await;
    let token = register(&app, "artificer").await;

    // Several times the 1 KiB file limit, well under the body limit
    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(vec![9u8; 64 * 1024]).file_name("marathon.wav"),
        ))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("too large"));
    assert_eq!(uploaded_files(&app), 0);
    assert_eq!(app.transcriber.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_body_over_transport_limit_is_413() {
    let app = spawn().await;
    let token = register(&app, "barbarian").await;

    // Body limit is max(file, text) + 1 MiB
    let huge = "a".repeat(2 * 1024 * 1024);
    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_text("text", huge))
        .await;

    response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_provider_failures_map_to_bad_gateway() {
    let app = spawn().await;
    let token = register(&app, "paladin").await;

    app.transcriber.fail.store(true, Ordering::SeqCst);
    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_part(
            "file",
            Part::bytes(b"OggS".to_vec()).file_name("s.ogg"),
        ))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&response.json::<Value>()), "TRANSCRIPTION_FAILED");
    assert_eq!(uploaded_files(&app), 0);

    app.generator.set_failing(true);
    let response = app
        .server
        .post("/api/v1/upload")
        .authorization_bearer(&token)
        .multipart(MultipartForm::new().add_text("text", "notes"))
        .await;
    response.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&response.json::<Value>()), "GENERATION_UNAVAILABLE");

    let list = app
        .server
        .get("/api/v1/stories")
        .authorization_bearer(&token)
        .await;
    assert_eq!(list.json::<Value>()["total"], 0);
}

#[tokio::test]
async fn test_refine_edit_publish_flow() {
    let app = spawn().await;
    let token = register(&app, "druid").await;
    let id = upload_text(&app, &token, "The grove burned.").await;

    let chat = app
        .server
        .post(&format!("/api/v1/stories/{}/chat", id))
        .authorization_bearer(&token)
        .json(&json!({"message": "Add a talking owl"}))
        .await;
    chat.assert_status_ok();
    let chat = chat.json::<Value>();
    assert_eq!(chat["turns"][0]["role"], "user");
    assert_eq!(chat["turns"][1]["role"], "assistant");
    assert_eq!(chat["reply"], chat["story"]["content"]);

    let history = app
        .server
        .get(&format!("/api/v1/stories/{}/conversation", id))
        .authorization_bearer(&token)
        .await
        .json::<Value>();
    assert_eq!(history["turns"].as_array().unwrap().len(), 5);

    let edited = app
        .server
        .put(&format!("/api/v1/stories/{}", id))
        .authorization_bearer(&token)
        .json(&json!({"title": "Ashes of the Grove", "content": "Final text."}))
        .await;
    edited.assert_status_ok();
    assert_eq!(edited.json::<Value>()["content"], "Final text.");

    // Wiki down: stays unpublished
    app.publisher.fail.store(true, Ordering::SeqCst);
    let failed = app
        .server
        .post(&format!("/api/v1/stories/{}/publish", id))
        .authorization_bearer(&token)
        .await;
    failed.assert_status(StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&failed.json::<Value>()), "PUBLISH_FAILED");
    let story = app
        .server
        .get(&format!("/api/v1/stories/{}", id))
        .authorization_bearer(&token)
        .await
        .json::<Value>();
    assert_eq!(story["published"], false);

    // Retry succeeds
    app.publisher.fail.store(false, Ordering::SeqCst);
    let published = app
        .server
        .post(&format!("/api/v1/stories/{}/publish", id))
        .authorization_bearer(&token)
        .json(&json!({"parent_page_id": "555"}))
        .await;
    published.assert_status_ok();
    let published = published.json::<Value>();
    assert_eq!(published["published"], true);
    assert_eq!(published["wiki_page_id"], "555-2");

    // Archived conversation refuses refinement
    let late = app
        .server
        .post(&format!("/api/v1/stories/{}/chat", id))
        .authorization_bearer(&token)
        .json(&json!({"message": "One more change"}))
        .await;
    late.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_reset_conversation_endpoint() {
    let app = spawn().await;
    let token = register(&app, "monk").await;
    let id = upload_text(&app, &token, "Meditation went badly.").await;

    let response = app
        .server
        .delete(&format!("/api/v1/stories/{}/conversation", id))
        .authorization_bearer(&token)
        .await;

    response.assert_status_ok();
    let turns = response.json::<Value>()["turns"].as_array().unwrap().clone();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "system");
    assert_eq!(turns[1]["role"], "assistant");
}

#[tokio::test]
async fn test_publish_without_wiki_is_503() {
    let app = spawn_app(false).await;
    let token = register(&app, "sorcerer").await;
    let id = upload_text(&app, &token, "Wild magic surge.").await;

    let response = app
        .server
        .post(&format!("/api/v1/stories/{}/publish", id))
        .authorization_bearer(&token)
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.publisher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_story_access_control() {
    let app = spawn().await;
    let admin = register(&app, "overseer").await;
    let owner = register(&app, "warlock").await;
    let other = register(&app, "fighter").await;
    let id = upload_text(&app, &owner, "A pact was made.").await;

    app.server
        .get(&format!("/api/v1/stories/{}", id))
        .authorization_bearer(&other)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.server
        .delete(&format!("/api/v1/stories/{}", id))
        .authorization_bearer(&other)
        .await
        .assert_status(StatusCode::FORBIDDEN);
    app.server
        .get("/api/v1/stories/9999")
        .authorization_bearer(&owner)
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let others_list = app
        .server
        .get("/api/v1/stories")
        .authorization_bearer(&other)
        .await
        .json::<Value>();
    assert_eq!(others_list["total"], 0);

    let admin_list = app
        .server
        .get("/api/v1/stories?page=1&per_page=10")
        .authorization_bearer(&admin)
        .await
        .json::<Value>();
    assert_eq!(admin_list["total"], 1);

    app.server
        .delete(&format!("/api/v1/stories/{}", id))
        .authorization_bearer(&owner)
        .await
        .assert_status(StatusCode::NO_CONTENT);
    app.server
        .get(&format!("/api/v1/stories/{}", id))
        .authorization_bearer(&owner)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_account_requires_password() {
    let app = spawn().await;
    let token = register(&app, "halfling").await;

    app.server
        .delete("/api/v1/auth/me")
        .authorization_bearer(&token)
        .json(&json!({"password": "wrong-password"}))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    app.server
        .delete("/api/v1/auth/me")
        .authorization_bearer(&token)
        .json(&json!({"password": "correct-horse"}))
        .await
        .assert_status(StatusCode::NO_CONTENT);

    app.server
        .get("/api/v1/auth/me")
        .authorization_bearer(&token)
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}
