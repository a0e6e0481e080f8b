//! Chronicler - session recap service

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chronicler::{
    api::{self, AppState, RequestStats},
    config::Config,
    db::{
        self,
        repositories::{
            SqlxConversationRepository, SqlxSessionRepository, SqlxStoryRepository,
            SqlxUserRepository,
        },
    },
    services::{
        ChatCompletionsClient, ConfluencePublisher, LoginRateLimiter, StoryService, UserService,
        WhisperTranscriber,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chronicler=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Chronicler...");

    // Load configuration (file, then CHRONICLER_* overrides)
    let config = Config::load_with_env(Path::new("config.yml"))?;
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!(applied, "Database migrations completed");

    // Create repositories
    let user_repo = SqlxUserRepository::boxed(pool.clone());
    let session_repo = SqlxSessionRepository::boxed(pool.clone());
    let story_repo = SqlxStoryRepository::boxed(pool.clone());
    let conversation_repo = SqlxConversationRepository::boxed(pool.clone());

    let user_service = Arc::new(UserService::with_config(
        user_repo,
        session_repo,
        &config.auth,
    ));

    // External providers are optional; missing ones disable their endpoints
    let mut story_service = StoryService::new(
        story_repo,
        conversation_repo,
        config.generation.system_prompt.clone(),
    );
    match WhisperTranscriber::from_config(&config.transcription)? {
        Some(transcriber) => {
            tracing::info!(model = %config.transcription.model, "Transcription enabled");
            story_service = story_service.with_transcriber(Arc::new(transcriber));
        }
        None => tracing::warn!("No transcription API key configured, audio uploads disabled"),
    }
    match ChatCompletionsClient::from_config(&config.generation)? {
        Some(generator) => {
            tracing::info!(model = %config.generation.model, "Story generation enabled");
            story_service = story_service.with_generator(Arc::new(generator));
        }
        None => tracing::warn!("No generation API key configured, uploads and chat disabled"),
    }
    match ConfluencePublisher::from_config(&config.wiki)? {
        Some(publisher) => {
            tracing::info!(space = %config.wiki.space_key, "Wiki publishing enabled");
            story_service = story_service.with_publisher(Arc::new(publisher));
        }
        None => tracing::info!("Wiki publishing disabled"),
    }

    let request_stats = Arc::new(RequestStats::new());
    let rate_limiter = Arc::new(LoginRateLimiter::new());

    let state = AppState {
        pool: pool.clone(),
        user_service: user_service.clone(),
        story_service: Arc::new(story_service),
        upload_config: Arc::new(config.upload.clone()),
        session_max_age: config.auth.session_expiration_days * 24 * 60 * 60,
        request_stats,
        rate_limiter: rate_limiter.clone(),
    };

    // Periodic cleanup of rate limiter windows and expired sessions (every 5 minutes)
    {
        let limiter = rate_limiter.clone();
        let users = user_service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                limiter.cleanup().await;
                match users.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(removed) => tracing::debug!(removed, "Expired sessions removed"),
                    Err(e) => tracing::warn!(error = %e, "Session cleanup failed"),
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
