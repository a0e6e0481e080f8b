//! API layer - HTTP handlers and routing
//!
//! All endpoints live under `/api/v1`:
//! - Health endpoint (public)
//! - Auth endpoints (register/login public, the rest protected)
//! - Upload endpoint
//! - Story, conversation, chat and publish endpoints

pub mod auth;
pub mod health;
pub mod middleware;
pub mod stories;
pub mod upload;

#[cfg(test)]
mod tests;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware, Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::UploadConfig;

pub use middleware::{ApiError, AppState, AuthenticatedUser, RequestStats};

/// Build the `/api/v1` router
pub fn build_api_router(state: AppState, upload_config: &UploadConfig) -> Router<AppState> {
    // Protected routes (need auth)
    let protected_routes = Router::new()
        .merge(auth::protected_router())
        .merge(upload::router(upload_config))
        .merge(stories::router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .merge(health::router())
        .merge(auth::public_router())
        .merge(protected_routes)
}

fn cors_layer(cors_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);

    match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(e) => {
            tracing::warn!(origin = %cors_origin, error = %e, "Ignoring invalid CORS origin");
            cors
        }
    }
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let upload_config = state.upload_config.clone();

    Router::new()
        .nest("/api/v1", build_api_router(state.clone(), &upload_config))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(cors_origin)),
        )
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}
