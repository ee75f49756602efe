//! Authentication endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use igloo_auth::{credentials, DerivedKey};
use igloo_core::time::unix_now;
use igloo_identity::{DeadlineSigner, LocalSigner};

use crate::routes::{ApiError, Operator};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct OnboardBody {
    pub secret: String,
    pub username: String,
    pub password: String,
}

/// Exchange credentials for a session token. The token rides in the body,
/// never in a URL.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<LoginBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .gateway
        .login(&body.username, &body.password, addr.ip(), unix_now())
        .await?;

    unlock_signer(&state, &outcome.user_id, &outcome.token).await;

    Ok(Json(json!({
        "token": outcome.token,
        "userId": outcome.user_id,
    })))
}

/// Consume the one-time admin secret to create the first operator.
pub async fn onboard(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<OnboardBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .gateway
        .onboard(
            &body.secret,
            &body.username,
            &body.password,
            addr.ip(),
            unix_now(),
        )
        .await?;

    unlock_signer(&state, &outcome.user_id, &outcome.token).await;

    Ok(Json(json!({
        "token": outcome.token,
        "userId": outcome.user_id,
    })))
}

/// Revoke the caller's token and lock the signer.
pub async fn logout(
    State(state): State<AppState>,
    operator: Operator,
) -> Result<Json<Value>, ApiError> {
    state.gateway.logout(&operator.bearer);
    state.gate.clear().await;
    Ok(Json(json!({ "ok": true })))
}

/// Which methods are enabled and how the limits are tuned. Public.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let status = state.gateway.status().await;
    Json(json!(status))
}

/// Unwrap the user's credential with the login-derived key and install the
/// identity signer. A fresh user gets a credential provisioned on first
/// login; an unwrap failure leaves the signer locked but the login valid.
async fn unlock_signer(state: &AppState, user_id: &str, token: &str) {
    let derived = match state.gateway.derived_key(token, unix_now()) {
        Ok(derived) => derived,
        Err(e) => {
            warn!(error = %e, "login without derived key, signer stays locked");
            return;
        }
    };

    match load_or_provision_signer(state, user_id, &derived).await {
        Ok(signer) => {
            state
                .gate
                .install(DeadlineSigner::with_default_deadline(Arc::new(signer)))
                .await;
        }
        Err(e) => {
            warn!(error = %e, "credential unwrap failed, signer stays locked");
        }
    }
}

async fn load_or_provision_signer(
    state: &AppState,
    user_id: &str,
    derived: &DerivedKey,
) -> Result<LocalSigner, String> {
    match credentials::load_credential(&state.store, user_id, derived).await {
        Ok(Some(secret_hex)) => {
            let secret = hex::decode(secret_hex.trim()).map_err(|e| e.to_string())?;
            LocalSigner::from_secret_bytes(&secret).map_err(|e| e.to_string())
        }
        Ok(None) => {
            let signer = LocalSigner::generate().map_err(|e| e.to_string())?;
            let secret_hex = hex::encode(signer.secret_bytes());
            credentials::store_credential(&state.store, user_id, derived, &secret_hex)
                .await
                .map_err(|e| e.to_string())?;
            Ok(signer)
        }
        Err(e) => Err(e.to_string()),
    }
}
