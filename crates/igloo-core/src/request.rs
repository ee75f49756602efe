//! Pending-request records held for operator approval.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pubkey::ClientPubkey;
use crate::time::unix_now;

/// Lifecycle of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Completed,
    Failed,
    Expired,
}

/// A client request parked for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// The client-chosen RPC id; responses must echo it.
    pub id: String,
    pub method: String,
    pub params: Vec<Value>,
    pub session_pubkey: ClientPubkey,
    pub status: RequestStatus,
    /// Set when policy pre-denied the request, so the operator sees why it
    /// is blocked rather than merely that it is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_reason: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
}

impl PendingRequest {
    pub fn new(
        id: String,
        method: String,
        params: Vec<Value>,
        session_pubkey: ClientPubkey,
        ttl_secs: u64,
    ) -> Self {
        let now = unix_now();
        Self {
            id,
            method,
            params,
            session_pubkey,
            status: RequestStatus::Pending,
            denied_reason: None,
            created_at: now,
            expires_at: now + ttl_secs,
        }
    }

    /// Same, but pre-denied by policy with an explanation for the UI.
    pub fn denied_by_policy(
        id: String,
        method: String,
        params: Vec<Value>,
        session_pubkey: ClientPubkey,
        ttl_secs: u64,
        reason: String,
    ) -> Self {
        let mut request = Self::new(id, method, params, session_pubkey, ttl_secs);
        request.denied_reason = Some(reason);
        request
    }

    /// For `sign_event` requests, the kind of the template being signed.
    pub fn event_kind(&self) -> Option<u64> {
        if self.method != crate::rpc::methods::SIGN_EVENT {
            return None;
        }
        let first = self.params.first()?;
        let obj = match first {
            Value::String(s) => serde_json::from_str::<Value>(s).ok()?,
            other => other.clone(),
        };
        obj.get("kind").and_then(Value::as_u64)
    }
}
