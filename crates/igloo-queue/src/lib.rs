//! The pending-request queue.
//!
//! Requests that policy could not settle wait here for an operator. The
//! queue is FIFO per arrival, supports scoped bulk selection (by id, index,
//! session, or event kind), bounds how much one session may park, and sweeps
//! out entries whose TTL lapsed.
//!
//! In-memory state is the authority; every mutation is mirrored to the
//! `requests_nip46` table fire-and-forget so the operator UI can show
//! history across restarts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use igloo_core::time::unix_now;
use igloo_core::{ClientPubkey, PendingRequest, RequestStatus};
use igloo_store::{BlobStore, Table};

/// Default time a request may wait for a decision.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(10 * 60);
/// Default cap on pending entries per session.
pub const DEFAULT_PER_SESSION_LIMIT: usize = 256;

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub request_ttl: Duration,
    pub per_session_limit: usize,
    pub sweep_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_ttl: DEFAULT_REQUEST_TTL,
            per_session_limit: DEFAULT_PER_SESSION_LIMIT,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// How an operator (or the sweeper) selects queued requests.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Every pending request.
    All,
    /// Specific request ids.
    Ids(Vec<String>),
    /// Positions in current FIFO order.
    Indices(Vec<usize>),
    /// Everything a given session has pending.
    Session(ClientPubkey),
    /// Every pending `sign_event` for one event kind.
    Kind(u64),
}

/// Result of adding a request.
#[derive(Debug)]
pub struct Enqueued {
    /// The oldest entry evicted to make room, already marked denied with a
    /// "queue overflow" reason. The broker owes its client an error reply.
    pub evicted: Option<PendingRequest>,
}

/// Shared pending-approval queue.
pub struct RequestQueue {
    entries: Mutex<Vec<PendingRequest>>,
    config: QueueConfig,
    store: Option<BlobStore>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig, store: Option<BlobStore>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            config,
            store,
        }
    }

    pub fn request_ttl(&self) -> Duration {
        self.config.request_ttl
    }

    /// Park a request. If the session is already at its cap, its oldest
    /// pending entry is denied with reason "queue overflow" and returned.
    pub async fn enqueue(&self, request: PendingRequest) -> Enqueued {
        let mut entries = self.entries.lock().await;

        let evicted = if self
            .pending_count_for(&entries, &request.session_pubkey)
            >= self.config.per_session_limit
        {
            let position = entries
                .iter()
                .position(|r| r.session_pubkey == request.session_pubkey);
            position.map(|idx| {
                let mut evicted = entries.remove(idx);
                evicted.status = RequestStatus::Denied;
                evicted.denied_reason = Some("queue overflow".to_string());
                warn!(
                    session = %evicted.session_pubkey,
                    request_id = %evicted.id,
                    "session queue overflow, denying oldest entry"
                );
                evicted
            })
        } else {
            None
        };

        if let Some(evicted) = &evicted {
            self.persist(evicted.clone());
        }
        self.persist(request.clone());
        entries.push(request);

        Enqueued { evicted }
    }

    /// Snapshot of everything pending, FIFO order.
    pub async fn list(&self) -> Vec<PendingRequest> {
        self.entries.lock().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<PendingRequest> {
        self.entries.lock().await.iter().find(|r| r.id == id).cloned()
    }

    /// Remove a request and record its final status. Returns the entry as it
    /// was while queued.
    pub async fn resolve(&self, id: &str, status: RequestStatus) -> Option<PendingRequest> {
        let mut entries = self.entries.lock().await;
        let position = entries.iter().position(|r| r.id == id)?;
        let queued = entries.remove(position);

        let mut finished = queued.clone();
        finished.status = status;
        self.persist(finished);

        Some(queued)
    }

    /// Resolve a selection of requests; returns them in FIFO order.
    pub async fn resolve_selection(
        &self,
        selection: &Selection,
        status: RequestStatus,
    ) -> Vec<PendingRequest> {
        let ids = self.select(selection).await;
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(request) = self.resolve(&id, status).await {
                resolved.push(request);
            }
        }
        resolved
    }

    /// Ids matched by a selection, FIFO order.
    pub async fn select(&self, selection: &Selection) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .enumerate()
            .filter(|(idx, request)| match selection {
                Selection::All => true,
                Selection::Ids(ids) => ids.iter().any(|i| i == &request.id),
                Selection::Indices(indices) => indices.contains(idx),
                Selection::Session(pubkey) => &request.session_pubkey == pubkey,
                Selection::Kind(kind) => request.event_kind() == Some(*kind),
            })
            .map(|(_, request)| request.id.clone())
            .collect()
    }

    /// Remove entries whose TTL lapsed, marked `expired`.
    pub async fn take_expired(&self) -> Vec<PendingRequest> {
        let now = unix_now();
        let mut entries = self.entries.lock().await;

        let mut expired = Vec::new();
        entries.retain(|request| {
            if request.expires_at <= now {
                let mut gone = request.clone();
                gone.status = RequestStatus::Expired;
                expired.push(gone);
                false
            } else {
                true
            }
        });
        drop(entries);

        for request in &expired {
            debug!(request_id = %request.id, "request expired before a decision");
            self.persist(request.clone());
        }
        expired
    }

    /// Run the TTL sweeper until the queue is dropped. Expired entries are
    /// handed to `expired_tx` so the broker can notify clients still
    /// listening.
    pub fn spawn_sweeper(self: &Arc<Self>, expired_tx: mpsc::Sender<PendingRequest>) {
        let queue = Arc::clone(self);
        let interval = queue.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for request in queue.take_expired().await {
                    if expired_tx.send(request).await.is_err() {
                        // Broker gone; nothing left to notify.
                        return;
                    }
                }
            }
        });
    }

    /// Record the final status of a request that already left the queue
    /// (e.g. `completed` or `failed` after execution).
    pub fn record_outcome(&self, request: &PendingRequest, status: RequestStatus) {
        let mut finished = request.clone();
        finished.status = status;
        self.persist(finished);
    }

    fn pending_count_for(&self, entries: &[PendingRequest], session: &ClientPubkey) -> usize {
        entries.iter().filter(|r| &r.session_pubkey == session).count()
    }

    fn persist(&self, request: PendingRequest) {
        let Some(store) = self.store.clone() else {
            return;
        };
        tokio::spawn(async move {
            let encoded = match serde_json::to_vec(&request) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(request_id = %request.id, error = %e, "request row failed to encode");
                    return;
                }
            };
            if let Err(e) = store
                .put(Table::RequestsNip46, request.id.clone(), encoded)
                .await
            {
                warn!(request_id = %request.id, error = %e, "request row failed to persist");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cpk(byte: &str) -> ClientPubkey {
        ClientPubkey::parse(&byte.repeat(32)).unwrap()
    }

    fn queue(limit: usize) -> RequestQueue {
        RequestQueue::new(
            QueueConfig {
                per_session_limit: limit,
                ..QueueConfig::default()
            },
            None,
        )
    }

    fn request(id: &str, session: &ClientPubkey, ttl: u64) -> PendingRequest {
        PendingRequest::new(
            id.to_string(),
            "ping".to_string(),
            vec![],
            session.clone(),
            ttl,
        )
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let q = queue(16);
        let session = cpk("aa");
        for id in ["1", "2", "3"] {
            q.enqueue(request(id, &session, 600)).await;
        }
        let ids: Vec<_> = q.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn overflow_denies_oldest_for_that_session() {
        let q = queue(2);
        let noisy = cpk("aa");
        let quiet = cpk("bb");

        q.enqueue(request("n1", &noisy, 600)).await;
        q.enqueue(request("q1", &quiet, 600)).await;
        q.enqueue(request("n2", &noisy, 600)).await;

        let outcome = q.enqueue(request("n3", &noisy, 600)).await;
        let evicted = outcome.evicted.unwrap();
        assert_eq!(evicted.id, "n1");
        assert_eq!(evicted.status, RequestStatus::Denied);
        assert_eq!(evicted.denied_reason.as_deref(), Some("queue overflow"));

        // The other session is untouched.
        let ids: Vec<_> = q.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["q1", "n2", "n3"]);
    }

    #[tokio::test]
    async fn selection_by_session_kind_and_index() {
        let q = queue(16);
        let a = cpk("aa");
        let b = cpk("bb");

        q.enqueue(request("p1", &a, 600)).await;
        let sign = PendingRequest::new(
            "s1".into(),
            "sign_event".into(),
            vec![json!({"kind": 4, "content": ""})],
            b.clone(),
            600,
        );
        q.enqueue(sign).await;

        assert_eq!(q.select(&Selection::Session(a.clone())).await, vec!["p1"]);
        assert_eq!(q.select(&Selection::Kind(4)).await, vec!["s1"]);
        assert_eq!(q.select(&Selection::Indices(vec![1])).await, vec!["s1"]);
        assert_eq!(q.select(&Selection::All).await.len(), 2);
    }

    #[tokio::test]
    async fn resolve_removes_and_returns_entry() {
        let q = queue(16);
        let session = cpk("cc");
        q.enqueue(request("r1", &session, 600)).await;

        let resolved = q.resolve("r1", RequestStatus::Approved).await.unwrap();
        assert_eq!(resolved.id, "r1");
        assert!(q.get("r1").await.is_none());
        assert!(q.resolve("r1", RequestStatus::Approved).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_swept() {
        let q = queue(16);
        let session = cpk("dd");

        q.enqueue(request("old", &session, 0)).await;
        q.enqueue(request("fresh", &session, 600)).await;

        let expired = q.take_expired().await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
        assert_eq!(expired[0].status, RequestStatus::Expired);

        let remaining: Vec<_> = q.list().await.into_iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec!["fresh"]);
    }
}
