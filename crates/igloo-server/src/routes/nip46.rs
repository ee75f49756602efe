//! Session and request-queue endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use igloo_core::{ClientPubkey, ConnectUri, SessionPolicy, SessionStatus};
use igloo_queue::Selection;

use crate::routes::{ApiError, Operator};
use crate::state::AppState;

fn parse_cpk(raw: &str) -> Result<ClientPubkey, ApiError> {
    ClientPubkey::parse(raw).map_err(|e| ApiError::bad_request(e.to_string()))
}

/// All sessions, most recently active first.
pub async fn list_sessions(
    State(state): State<AppState>,
    _operator: Operator,
) -> Json<Value> {
    let sessions = state.sessions.list_all().await;
    Json(json!({ "sessions": sessions }))
}

#[derive(Deserialize)]
pub struct UpsertSessionBody {
    /// A full `nostrconnect://` URI pasted by the operator.
    pub uri: String,
}

/// The connect-URI flow: record the session and start the handshake.
pub async fn upsert_session(
    State(state): State<AppState>,
    _operator: Operator,
    Json(body): Json<UpsertSessionBody>,
) -> Result<Json<Value>, ApiError> {
    let uri = ConnectUri::parse(&body.uri).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let pubkey = uri.client_pubkey.clone();
    state.broker.connect_to_client(uri).await;
    Ok(Json(json!({ "ok": true, "pubkey": pubkey })))
}

/// Replace a session's policy wholesale.
pub async fn update_policy(
    State(state): State<AppState>,
    _operator: Operator,
    Path(cpk): Path<String>,
    Json(policy): Json<SessionPolicy>,
) -> Result<Json<Value>, ApiError> {
    let pubkey = parse_cpk(&cpk)?;
    if !state.sessions.update_policy(&pubkey, policy).await {
        return Err(ApiError::not_found(format!("unknown session {}", pubkey)));
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct UpdateStatusBody {
    pub status: SessionStatus,
}

/// Internal status touch. Activation is allowed; a downgrade back to
/// pending is not.
pub async fn update_status(
    State(state): State<AppState>,
    _operator: Operator,
    Path(cpk): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<Value>, ApiError> {
    let pubkey = parse_cpk(&cpk)?;
    let session = state
        .sessions
        .get(&pubkey)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown session {}", pubkey)))?;

    match body.status {
        SessionStatus::Active => {
            state.broker.mark_active(&pubkey).await;
        }
        SessionStatus::Pending => {
            if session.status == SessionStatus::Active {
                return Err(ApiError::conflict("active sessions cannot return to pending"));
            }
            state.sessions.touch(&pubkey, None, None).await;
        }
    }
    Ok(Json(json!({ "ok": true })))
}

/// Revoke: hard delete.
pub async fn revoke_session(
    State(state): State<AppState>,
    _operator: Operator,
    Path(cpk): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let pubkey = parse_cpk(&cpk)?;
    state.broker.revoke_session(&pubkey).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Everything waiting for a decision.
pub async fn list_requests(
    State(state): State<AppState>,
    _operator: Operator,
) -> Json<Value> {
    let requests = state.queue.list().await;
    Json(json!({ "requests": requests }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApproveBody {
    #[serde(default)]
    pub auto_grant: bool,
    /// Extra policy entries to union in alongside the approval.
    #[serde(default)]
    pub policy_patch: Option<SessionPolicy>,
}

/// Approve one request; optionally widen the session policy with it.
pub async fn approve(
    State(state): State<AppState>,
    _operator: Operator,
    Path(id): Path<String>,
    body: Option<Json<ApproveBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();

    let queued = state
        .queue
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown request {}", id)))?;

    state.broker.approve(&id, body.auto_grant).await?;

    if let Some(patch) = body.policy_patch {
        state
            .sessions
            .update_with(&queued.session_pubkey, move |session| {
                session.policy.methods.extend(patch.methods);
                session.policy.kinds.extend(patch.kinds);
            })
            .await;
    }
    Ok(Json(json!({ "ok": true })))
}

#[derive(Deserialize, Default)]
pub struct DenyBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Deny one request with an optional reason the client will see.
pub async fn deny(
    State(state): State<AppState>,
    _operator: Operator,
    Path(id): Path<String>,
    body: Option<Json<DenyBody>>,
) -> Result<Json<Value>, ApiError> {
    let reason = body.and_then(|Json(b)| b.reason);
    state.broker.deny(&id, reason).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Bulk decisions over a selection of queued requests: explicit ids, one
/// session's backlog, or every pending `sign_event` of one kind.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BulkBody {
    #[serde(default)]
    pub ids: Option<Vec<String>>,
    #[serde(default)]
    pub session_pubkey: Option<String>,
    #[serde(default)]
    pub kind: Option<u64>,
    #[serde(default)]
    pub auto_grant: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BulkBody {
    pub fn selection(&self) -> Result<Selection, ApiError> {
        if let Some(ids) = &self.ids {
            return Ok(Selection::Ids(ids.clone()));
        }
        if let Some(raw) = &self.session_pubkey {
            return Ok(Selection::Session(parse_cpk(raw)?));
        }
        if let Some(kind) = self.kind {
            return Ok(Selection::Kind(kind));
        }
        Ok(Selection::All)
    }
}

/// Approve every request a selection matches.
pub async fn approve_bulk(
    State(state): State<AppState>,
    _operator: Operator,
    body: Option<Json<BulkBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let selection = body.selection()?;
    let approved = state
        .broker
        .approve_selection(&selection, body.auto_grant)
        .await;
    Ok(Json(json!({ "approved": approved })))
}

/// Deny every request a selection matches.
pub async fn deny_bulk(
    State(state): State<AppState>,
    _operator: Operator,
    body: Option<Json<BulkBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let selection = body.selection()?;
    let denied = state.broker.deny_selection(&selection, body.reason).await;
    Ok(Json(json!({ "denied": denied })))
}

/// The transport identity and relay health the operator needs to hand out
/// connect URIs.
pub async fn transport(
    State(state): State<AppState>,
    _operator: Operator,
) -> Json<Value> {
    let relays = state.pool.status().await;
    Json(json!({
        "pubkey": state.broker.transport_pubkey(),
        "relays": relays,
    }))
}
