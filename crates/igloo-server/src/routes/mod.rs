//! The operator HTTP surface.
//!
//! Thin JSON endpoints over the session store, request queue, and auth
//! gateway. Every route except login, onboarding, and the public health
//! check sits behind the [`Operator`] extractor.

pub mod auth;
pub mod nip46;
pub mod status;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use igloo_auth::AuthError;
use igloo_broker::BrokerError;
use igloo_core::time::unix_now;

use crate::state::AppState;

/// Build the full router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/status", get(auth::status))
        .route("/api/auth/onboard", post(auth::onboard))
        .route("/api/status", get(status::health))
        .route(
            "/api/nip46/sessions",
            get(nip46::list_sessions).post(nip46::upsert_session),
        )
        .route("/api/nip46/sessions/:cpk/policy", put(nip46::update_policy))
        .route("/api/nip46/sessions/:cpk/status", put(nip46::update_status))
        .route("/api/nip46/sessions/:cpk", delete(nip46::revoke_session))
        .route("/api/nip46/requests", get(nip46::list_requests))
        .route("/api/nip46/requests/approve", post(nip46::approve_bulk))
        .route("/api/nip46/requests/deny", post(nip46::deny_bulk))
        .route("/api/nip46/requests/:id/approve", post(nip46::approve))
        .route("/api/nip46/requests/:id/deny", post(nip46::deny))
        .route("/api/nip46/transport", get(nip46::transport));

    let router = if state.config.headless {
        api
    } else {
        api.fallback_service(ServeDir::new(&state.config.static_dir))
    };

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// An authenticated operator: token (or api key) checked at the request
/// boundary, expired tokens rejected regardless of in-flight work.
pub struct Operator {
    pub user_id: String,
    pub bearer: String,
}

#[async_trait]
impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(ApiError::unauthorized)?;
        let bearer = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();

        let user_id = state
            .gateway
            .authenticate(bearer, unix_now())
            .map_err(|_| ApiError::unauthorized())?;

        Ok(Operator {
            user_id,
            bearer: bearer.to_string(),
        })
    }
}

/// Error shape every endpoint returns: `{"error": "..."}` plus the right
/// status code, and `Retry-After` when rate limited.
#[derive(Debug)]
pub enum ApiError {
    Status(StatusCode, String),
    RateLimited(u64),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        ApiError::Status(StatusCode::UNAUTHORIZED, "unauthorized".into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ApiError::Status(StatusCode::NOT_FOUND, what.into())
    }

    pub fn bad_request(what: impl Into<String>) -> Self {
        ApiError::Status(StatusCode::BAD_REQUEST, what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        ApiError::Status(StatusCode::CONFLICT, what.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Status(code, message) => {
                (code, Json(json!({ "error": message }))).into_response()
            }
            ApiError::RateLimited(retry_after) => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "rate limited" })),
                )
                    .into_response();
                if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                response
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::RateLimited { retry_after_secs } => ApiError::RateLimited(retry_after_secs),
            AuthError::InvalidCredentials | AuthError::InvalidToken => ApiError::unauthorized(),
            AuthError::WeakPassword(_) => ApiError::Status(StatusCode::BAD_REQUEST, e.to_string()),
            AuthError::OnboardingClosed | AuthError::OnboardingUnavailable => {
                ApiError::Status(StatusCode::FORBIDDEN, e.to_string())
            }
            AuthError::UserExists => ApiError::conflict(e.to_string()),
            other => ApiError::Status(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError::not_found(e.to_string())
    }
}
