//! Authentication API endpoints
//!
//! - POST /api/v1/auth/register - Create an account (first user becomes admin)
//! - POST /api/v1/auth/login - Login by username or email
//! - POST /api/v1/auth/logout - Invalidate the current session
//! - GET /api/v1/auth/me - Current user
//! - DELETE /api/v1/auth/me - Remove the current account

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, SessionToken};
use crate::models::{Session, User};
use crate::services::user::{LoginInput, RegisterInput, UserServiceError};

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Request body for account removal
#[derive(Debug, Deserialize)]
pub struct DeleteAccountRequest {
    pub password: String,
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
    pub expires_at: String,
}

/// Response for user info
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role.to_string(),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::RegistrationClosed => {
                ApiError::forbidden("Registration is closed")
            }
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(get_current_user).delete(delete_account))
}

fn session_cookie(session: &Session, max_age: i64) -> Result<HeaderMap, ApiError> {
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        session.id, max_age
    );
    let value = HeaderValue::from_str(&cookie).map_err(ApiError::internal_error)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

fn cleared_cookie() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
    );
    headers
}

fn auth_response(user: User, session: Session) -> AuthResponse {
    AuthResponse {
        user: user.into(),
        expires_at: session.expires_at.to_rfc3339(),
        token: session.id,
    }
}

/// POST /api/v1/auth/register - User registration
///
/// Logs the new account in right away.
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password = body.password.clone();
    let input = RegisterInput::new(body.username, body.email, body.password);

    let user = state.user_service.register(input).await?;
    tracing::info!(user_id = user.id, role = %user.role, "User registered");

    let (user, session) = state
        .user_service
        .login(LoginInput::new(&user.username, password))
        .await?;

    let headers = session_cookie(&session, state.session_max_age)?;
    Ok((StatusCode::CREATED, headers, Json(auth_response(user, session))))
}

/// POST /api/v1/auth/login - User login
///
/// Throttled per client IP (10 requests per minute) and per username
/// (5 failures per 15 minutes).
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(ip) = extract_ip_address(&headers) {
        if state.rate_limiter.is_ip_limited(ip).await {
            tracing::warn!(%ip, "Login IP rate limit exceeded");
            return Err(ApiError::with_details(
                "RATE_LIMIT",
                "Too many requests, please try again later",
                serde_json::json!({"retry_after": 60}),
            ));
        }
        state.rate_limiter.record_ip_request(ip).await;
    }

    if state
        .rate_limiter
        .is_username_limited(&body.username_or_email)
        .await
    {
        tracing::warn!(username = %body.username_or_email, "Login username rate limit exceeded");
        return Err(ApiError::with_details(
            "RATE_LIMIT",
            "Too many failed attempts, please try again in 15 minutes",
            serde_json::json!({"retry_after": 900}),
        ));
    }

    let input = LoginInput::new(body.username_or_email.clone(), body.password);
    let (user, session) = match state.user_service.login(input).await {
        Ok(ok) => ok,
        Err(UserServiceError::AuthenticationError(_)) => {
            state
                .rate_limiter
                .record_failed_attempt(&body.username_or_email)
                .await;
            return Err(ApiError::unauthorized("Invalid username or password"));
        }
        Err(e) => return Err(e.into()),
    };

    state
        .rate_limiter
        .clear_username_attempts(&body.username_or_email)
        .await;
    tracing::info!(user_id = user.id, "User logged in");

    let headers = session_cookie(&session, state.session_max_age)?;
    Ok((headers, Json(auth_response(user, session))))
}

/// POST /api/v1/auth/logout - User logout
async fn logout(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
) -> Result<impl IntoResponse, ApiError> {
    state.user_service.logout(&token).await?;
    Ok((StatusCode::NO_CONTENT, cleared_cookie()))
}

/// GET /api/v1/auth/me - Get current user
async fn get_current_user(user: AuthenticatedUser) -> Json<UserResponse> {
    Json(user.0.into())
}

/// DELETE /api/v1/auth/me - Remove the account with its stories and sessions
async fn delete_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<DeleteAccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .user_service
        .delete_account(&user.0, &body.password)
        .await?;
    tracing::info!(user_id = user.0.id, "Account deleted");
    Ok((StatusCode::NO_CONTENT, cleared_cookie()))
}

/// Client IP as reported by a reverse proxy
fn extract_ip_address(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                if let Ok(ip) = ip.trim().parse() {
                    return Some(ip);
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_ip_address() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_ip_address(&headers), None);

        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.7"));
        assert_eq!(extract_ip_address(&headers), "10.0.0.7".parse().ok());

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.1"));
        assert_eq!(extract_ip_address(&headers), "203.0.113.9".parse().ok());

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(extract_ip_address(&headers), "10.0.0.7".parse().ok());
    }

    #[test]
    fn test_user_service_error_mapping() {
        let cases = [
            (UserServiceError::ValidationError("x".into()), StatusCode::BAD_REQUEST),
            (UserServiceError::AuthenticationError("x".into()), StatusCode::UNAUTHORIZED),
            (UserServiceError::UserExists("x".into()), StatusCode::CONFLICT),
            (UserServiceError::RegistrationClosed, StatusCode::FORBIDDEN),
            (
                UserServiceError::InternalError(anyhow::anyhow!("db gone")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
