//! Session records and per-session policy.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::pubkey::ClientPubkey;
use crate::time::unix_now;

/// Where a client session sits in its lifecycle.
///
/// Revoked sessions are not a state: revocation deletes the record outright,
/// so a revoked pubkey simply becomes unknown again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
}

/// Display-only metadata a client offers about itself. Untrusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl SessionProfile {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.image.is_none()
    }
}

/// Per-session authorization policy.
///
/// Both maps are consulted by one evaluation function; absent keys mean
/// "ask the operator". The `"*"` key under `kinds` stands for any event kind
/// and wins only when explicitly `true`. `sign_event` is governed by the
/// `kinds` map alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    #[serde(default)]
    pub methods: BTreeMap<String, bool>,
    #[serde(default)]
    pub kinds: BTreeMap<String, bool>,
}

impl SessionPolicy {
    /// Grant a single method.
    pub fn allow_method(&mut self, method: &str) {
        self.methods.insert(method.to_string(), true);
    }

    /// Grant a single event kind.
    pub fn allow_kind(&mut self, kind: &str) {
        self.kinds.insert(kind.to_string(), true);
    }
}

/// How many recent kinds/methods a session remembers for the operator UI.
pub const RECENT_ACTIVITY_LIMIT: usize = 8;

/// One client session, keyed by the client pubkey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub pubkey: ClientPubkey,
    pub status: SessionStatus,
    #[serde(default)]
    pub profile: SessionProfile,
    #[serde(default)]
    pub policy: SessionPolicy,
    /// Policy the client asked for in its connect URI. Informational only,
    /// never auto-granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<SessionPolicy>,
    #[serde(default)]
    pub relays: BTreeSet<String>,
    pub created_at: u64,
    pub last_active_at: u64,
    pub updated_at: u64,
    /// Recency-ordered, most recent first, bounded.
    #[serde(default)]
    pub recent_kinds: Vec<String>,
    #[serde(default)]
    pub recent_methods: Vec<String>,
}

impl SessionRecord {
    /// A fresh pending session for a newly seen pubkey.
    pub fn pending(pubkey: ClientPubkey) -> Self {
        let now = unix_now();
        Self {
            pubkey,
            status: SessionStatus::Pending,
            profile: SessionProfile::default(),
            policy: SessionPolicy::default(),
            requested: None,
            relays: BTreeSet::new(),
            created_at: now,
            last_active_at: now,
            updated_at: now,
            recent_kinds: Vec::new(),
            recent_methods: Vec::new(),
        }
    }

    /// Record activity: bump `last_active_at` and push onto the bounded
    /// recency lists.
    pub fn touch(&mut self, kind: Option<&str>, method: Option<&str>) {
        self.last_active_at = unix_now();
        if let Some(k) = kind {
            push_recent(&mut self.recent_kinds, k);
        }
        if let Some(m) = method {
            push_recent(&mut self.recent_methods, m);
        }
    }
}

fn push_recent(list: &mut Vec<String>, entry: &str) {
    list.retain(|e| e != entry);
    list.insert(0, entry.to_string());
    list.truncate(RECENT_ACTIVITY_LIMIT);
}
