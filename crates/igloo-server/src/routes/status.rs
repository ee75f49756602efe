//! Public health endpoint.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness plus the handful of public facts a frontend needs before login.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "headless": state.config.headless,
        "onboardingOpen": state.gateway.needs_onboarding().await,
    }))
}
