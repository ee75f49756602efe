//! The session store.
//!
//! In-memory map of client pubkey to session record, mirrored to the
//! `sessions_nip46` table. Memory is the request-path authority: persistence
//! runs fire-and-forget with a small retry budget and is rebuilt into memory
//! on startup.
//!
//! Mutations for one session serialize on a per-pubkey async lock taken from
//! a shared lock map; different sessions never contend. Multi-step
//! transitions that span several store calls (promotion, handshakes) are
//! serialized one layer up, by the broker's own per-client locks.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use igloo_core::time::unix_now;
use igloo_core::{ClientPubkey, SessionPolicy, SessionRecord, SessionStatus};
use igloo_store::{BlobStore, Table};

const PERSIST_RETRIES: u32 = 3;
const PERSIST_BASE_DELAY: Duration = Duration::from_millis(100);

/// Map of per-session locks, created on first use and pruned once idle.
struct LockMap {
    inner: SyncMutex<HashMap<ClientPubkey, Arc<AsyncMutex<()>>>>,
}

impl LockMap {
    fn new() -> Self {
        Self {
            inner: SyncMutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, key: &ClientPubkey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the entry if nobody holds or waits on it.
    fn prune(&self, key: &ClientPubkey) {
        let mut map = self.inner.lock();
        if let Some(lock) = map.get(key) {
            if Arc::strong_count(lock) == 1 {
                map.remove(key);
            }
        }
    }
}

/// Shared session store.
pub struct SessionStore {
    sessions: RwLock<HashMap<ClientPubkey, SessionRecord>>,
    locks: LockMap,
    store: Option<BlobStore>,
}

impl SessionStore {
    pub fn new(store: Option<BlobStore>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            locks: LockMap::new(),
            store,
        }
    }

    /// Load every persisted row, normalizing keys and keeping the freshest
    /// record when duplicates collapse onto one normalized pubkey. Returns
    /// the union of relays the restored sessions arrived on, for the
    /// transport to seed its pool.
    pub async fn load(&self) -> BTreeSet<String> {
        let Some(store) = &self.store else {
            return BTreeSet::new();
        };

        let rows = match store.list(Table::SessionsNip46).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to load persisted sessions, starting empty");
                return BTreeSet::new();
            }
        };

        let mut restored: HashMap<ClientPubkey, SessionRecord> = HashMap::new();
        for (key, bytes) in rows {
            let record: SessionRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(row = %key, error = %e, "skipping undecodable session row");
                    continue;
                }
            };
            match restored.get(&record.pubkey) {
                Some(existing) if existing.updated_at >= record.updated_at => {}
                _ => {
                    restored.insert(record.pubkey.clone(), record);
                }
            }
        }

        let relays: BTreeSet<String> = restored
            .values()
            .flat_map(|r| r.relays.iter().cloned())
            .collect();

        debug!(sessions = restored.len(), relays = relays.len(), "sessions restored");
        *self.sessions.write().await = restored;
        relays
    }

    pub async fn get(&self, pubkey: &ClientPubkey) -> Option<SessionRecord> {
        self.sessions.read().await.get(pubkey).cloned()
    }

    pub async fn list_active(&self) -> Vec<SessionRecord> {
        self.list_by_status(SessionStatus::Active).await
    }

    pub async fn list_pending(&self) -> Vec<SessionRecord> {
        self.list_by_status(SessionStatus::Pending).await
    }

    async fn list_by_status(&self, status: SessionStatus) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        sessions
    }

    /// All sessions regardless of status, most recently active first.
    pub async fn list_all(&self) -> Vec<SessionRecord> {
        let mut sessions: Vec<SessionRecord> =
            self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        sessions
    }

    /// Insert or replace a session record.
    pub async fn upsert(&self, mut record: SessionRecord) {
        let _guard = self.locks.acquire(&record.pubkey).await;
        record.updated_at = unix_now();
        self.sessions
            .write()
            .await
            .insert(record.pubkey.clone(), record.clone());
        self.persist(record.clone());
        drop(_guard);
        self.locks.prune(&record.pubkey);
    }

    /// Replace one session's policy. Returns false when the session is
    /// unknown.
    pub async fn update_policy(&self, pubkey: &ClientPubkey, policy: SessionPolicy) -> bool {
        let _guard = self.locks.acquire(pubkey).await;
        let updated = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(pubkey) {
                Some(record) => {
                    record.policy = policy;
                    record.updated_at = unix_now();
                    Some(record.clone())
                }
                None => None,
            }
        };
        drop(_guard);
        self.locks.prune(pubkey);

        match updated {
            Some(record) => {
                self.persist(record);
                true
            }
            None => false,
        }
    }

    /// Mutate one session under its lock. Returns the updated record, or
    /// `None` when the session is unknown.
    pub async fn update_with<F>(&self, pubkey: &ClientPubkey, mutate: F) -> Option<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord),
    {
        let _guard = self.locks.acquire(pubkey).await;
        let updated = {
            let mut sessions = self.sessions.write().await;
            sessions.get_mut(pubkey).map(|record| {
                mutate(record);
                record.updated_at = unix_now();
                record.clone()
            })
        };
        drop(_guard);
        self.locks.prune(pubkey);

        if let Some(record) = &updated {
            self.persist(record.clone());
        }
        updated
    }

    /// Record activity on a session for the operator UI.
    pub async fn touch(
        &self,
        pubkey: &ClientPubkey,
        kind: Option<&str>,
        method: Option<&str>,
    ) -> bool {
        self.update_with(pubkey, |record| record.touch(kind, method))
            .await
            .is_some()
    }

    /// Hard-delete a session from memory and the store.
    pub async fn revoke(&self, pubkey: &ClientPubkey) -> bool {
        let _guard = self.locks.acquire(pubkey).await;
        let existed = self.sessions.write().await.remove(pubkey).is_some();
        drop(_guard);
        self.locks.prune(pubkey);

        if existed {
            if let Some(store) = self.store.clone() {
                let key = pubkey.as_str().to_string();
                tokio::spawn(async move {
                    if let Err(e) = store.delete(Table::SessionsNip46, key.clone()).await {
                        warn!(session = %key, error = %e, "failed to delete revoked session row");
                    }
                });
            }
        }
        existed
    }

    /// Fire-and-forget persistence with a bounded retry budget. The caller
    /// is never blocked: memory already holds the authoritative state.
    fn persist(&self, record: SessionRecord) {
        let Some(store) = self.store.clone() else {
            return;
        };
        tokio::spawn(async move {
            let encoded = match serde_json::to_vec(&record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(session = %record.pubkey, error = %e, "session row failed to encode");
                    return;
                }
            };

            let mut delay = PERSIST_BASE_DELAY;
            for attempt in 1..=PERSIST_RETRIES {
                match store
                    .put(
                        Table::SessionsNip46,
                        record.pubkey.as_str().to_string(),
                        encoded.clone(),
                    )
                    .await
                {
                    Ok(()) => return,
                    Err(e) if attempt < PERSIST_RETRIES => {
                        debug!(
                            session = %record.pubkey,
                            attempt,
                            error = %e,
                            "session persist attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                    Err(e) => {
                        warn!(
                            session = %record.pubkey,
                            error = %e,
                            "session persist failed after retries, memory remains authoritative"
                        );
                    }
                }
            }
        });
    }
}
