//! Session-token lifecycle.
//!
//! Tokens are opaque 32-byte random identifiers handed out on login and
//! checked at every request boundary. Two clocks run against each token:
//! an idle timeout measured from its last use and an absolute timeout
//! measured from creation. Either one expiring kills the token.
//!
//! The in-memory table is authoritative and carries the derived unwrap key.
//! A hash of each token (never the token itself) is mirrored to the
//! `sessions_auth` table so operator sessions survive a restart; the derived
//! key does not survive, which forces a fresh login before the identity
//! signer can be used again.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use igloo_store::{BlobStore, Table};

use crate::derived::DerivedKey;
use crate::{AuthError, Result};

/// Default idle timeout.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Default absolute timeout.
pub const DEFAULT_ABSOLUTE_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Token lifetime knobs.
#[derive(Debug, Clone, Copy)]
pub struct TokenConfig {
    pub idle_timeout: Duration,
    pub absolute_timeout: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
        }
    }
}

struct TokenRecord {
    user_id: String,
    created_at: u64,
    last_used_at: u64,
    derived_key: Option<DerivedKey>,
}

/// What gets mirrored to disk: the token hash is the row key; no secret
/// material in the value.
#[derive(Serialize, Deserialize)]
struct PersistedToken {
    user_id: String,
    created_at: u64,
    last_used_at: u64,
}

/// Server-side token table.
pub struct TokenTable {
    config: TokenConfig,
    tokens: RwLock<HashMap<String, TokenRecord>>,
    store: Option<BlobStore>,
}

impl TokenTable {
    pub fn new(config: TokenConfig, store: Option<BlobStore>) -> Self {
        Self {
            config,
            tokens: RwLock::new(HashMap::new()),
            store,
        }
    }

    pub fn config(&self) -> TokenConfig {
        self.config
    }

    /// Restore surviving token rows. Restored sessions have no derived key.
    pub async fn load(&self, now: u64) {
        let Some(store) = &self.store else {
            return;
        };
        let rows = match store.list(Table::SessionsAuth).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to load persisted auth sessions");
                return;
            }
        };

        let mut tokens = self.tokens.write();
        for (hash, bytes) in rows {
            let Ok(row) = serde_json::from_slice::<PersistedToken>(&bytes) else {
                continue;
            };
            if self.is_expired(row.created_at, row.last_used_at, now) {
                continue;
            }
            tokens.insert(
                hash,
                TokenRecord {
                    user_id: row.user_id,
                    created_at: row.created_at,
                    last_used_at: row.last_used_at,
                    derived_key: None,
                },
            );
        }
        debug!(restored = tokens.len(), "auth sessions restored");
    }

    /// Issue a token for a user. The derived key rides along in memory only.
    pub fn issue(&self, user_id: &str, derived_key: Option<DerivedKey>, now: u64) -> String {
        let mut raw = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut raw);
        let token = hex::encode(raw);

        let record = TokenRecord {
            user_id: user_id.to_string(),
            created_at: now,
            last_used_at: now,
            derived_key,
        };
        self.persist(&token, &record);
        self.tokens.write().insert(hash_token(&token), record);
        token
    }

    /// Check a token and touch its last-use time. Expired tokens are removed
    /// on sight.
    pub fn authenticate(&self, token: &str, now: u64) -> Result<String> {
        let hash = hash_token(token);
        let mut tokens = self.tokens.write();

        let Some(record) = tokens.get_mut(&hash) else {
            return Err(AuthError::InvalidToken);
        };

        if self.is_expired(record.created_at, record.last_used_at, now) {
            tokens.remove(&hash);
            self.unpersist(&hash);
            return Err(AuthError::InvalidToken);
        }

        record.last_used_at = now;
        let user_id = record.user_id.clone();
        let snapshot = PersistedToken {
            user_id: user_id.clone(),
            created_at: record.created_at,
            last_used_at: now,
        };
        drop(tokens);

        self.persist_row(&hash, &snapshot);
        Ok(user_id)
    }

    /// The derived key bound to a live token, if the login that issued it is
    /// still in memory.
    pub fn derived_key(&self, token: &str, now: u64) -> Result<DerivedKey> {
        let hash = hash_token(token);
        let tokens = self.tokens.read();
        let record = tokens.get(&hash).ok_or(AuthError::InvalidToken)?;
        if self.is_expired(record.created_at, record.last_used_at, now) {
            return Err(AuthError::InvalidToken);
        }
        record.derived_key.clone().ok_or(AuthError::InvalidToken)
    }

    /// Delete a token; the derived key drops (and zeroizes) with the record.
    pub fn revoke(&self, token: &str) -> bool {
        let hash = hash_token(token);
        let existed = self.tokens.write().remove(&hash).is_some();
        if existed {
            self.unpersist(&hash);
        }
        existed
    }

    /// Remove every expired token. Returns how many were reaped.
    pub fn reap(&self, now: u64) -> usize {
        let mut tokens = self.tokens.write();
        let mut dead = Vec::new();
        tokens.retain(|hash, record| {
            let live = !self.is_expired(record.created_at, record.last_used_at, now);
            if !live {
                dead.push(hash.clone());
            }
            live
        });
        drop(tokens);

        for hash in &dead {
            self.unpersist(hash);
        }
        dead.len()
    }

    fn is_expired(&self, created_at: u64, last_used_at: u64, now: u64) -> bool {
        now.saturating_sub(last_used_at) > self.config.idle_timeout.as_secs()
            || now.saturating_sub(created_at) > self.config.absolute_timeout.as_secs()
    }

    fn persist(&self, token: &str, record: &TokenRecord) {
        let snapshot = PersistedToken {
            user_id: record.user_id.clone(),
            created_at: record.created_at,
            last_used_at: record.last_used_at,
        };
        self.persist_row(&hash_token(token), &snapshot);
    }

    fn persist_row(&self, hash: &str, row: &PersistedToken) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let key = hash.to_string();
        let Ok(bytes) = serde_json::to_vec(row) else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = store.put(Table::SessionsAuth, key, bytes).await {
                warn!(error = %e, "auth session row failed to persist");
            }
        });
    }

    fn unpersist(&self, hash: &str) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let key = hash.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.delete(Table::SessionsAuth, key).await {
                warn!(error = %e, "auth session row failed to delete");
            }
        });
    }
}

fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(idle: u64, absolute: u64) -> TokenTable {
        TokenTable::new(
            TokenConfig {
                idle_timeout: Duration::from_secs(idle),
                absolute_timeout: Duration::from_secs(absolute),
            },
            None,
        )
    }

    #[test]
    fn issue_then_authenticate() {
        let tokens = table(1800, 43200);
        let token = tokens.issue("user-1", None, 1000);

        assert_eq!(tokens.authenticate(&token, 1001).unwrap(), "user-1");
        assert!(tokens.authenticate("not-a-token", 1001).is_err());
    }

    #[test]
    fn idle_timeout_boundary() {
        let tokens = table(1800, 43200);
        let token = tokens.issue("user-1", None, 1000);

        // One second inside the idle window.
        assert!(tokens.authenticate(&token, 1000 + 1800 - 1).is_ok());
        // Activity restarts the idle clock.
        assert!(tokens.authenticate(&token, 1000 + 1800 + 1700).is_ok());

        let token2 = tokens.issue("user-1", None, 5000);
        assert!(tokens.authenticate(&token2, 5000 + 1800 + 1).is_err());
    }

    #[test]
    fn absolute_timeout_ignores_activity() {
        let tokens = table(1800, 3600);
        let token = tokens.issue("user-1", None, 0);

        // Keep touching it inside the idle window.
        for t in (0..3600).step_by(600) {
            assert!(tokens.authenticate(&token, t).is_ok());
        }
        assert!(tokens.authenticate(&token, 3601).is_err());
    }

    #[test]
    fn revoke_and_reap() {
        let tokens = table(10, 100);
        let a = tokens.issue("u", None, 0);
        let b = tokens.issue("u", None, 0);

        assert!(tokens.revoke(&a));
        assert!(!tokens.revoke(&a));

        assert_eq!(tokens.reap(50), 1); // b idle-expired
        assert!(tokens.authenticate(&b, 50).is_err());
    }

    #[test]
    fn derived_key_rides_with_the_token() {
        let tokens = table(1800, 43200);
        let key = DerivedKey::derive("alice", "Str0ng-pass!");
        let token = tokens.issue("alice", Some(key.clone()), 0);

        let fetched = tokens.derived_key(&token, 10).unwrap();
        assert_eq!(fetched.as_bytes(), key.as_bytes());

        tokens.revoke(&token);
        assert!(tokens.derived_key(&token, 10).is_err());
    }
}
