//! The broker core.
//!
//! Owns the NIP-46 session state machine and the dispatch pipeline between
//! relays and the identity signer. Inbound envelopes are decrypted and
//! parsed tolerantly, evaluated against the session's policy, and either
//! executed on a bounded worker pool, parked for the operator, or answered
//! with an error. Operator decisions come back through the same type.
//!
//! Session lifecycle per client: unknown → pending → active → removed.
//! Promotion to active is serialized per client, so concurrent triggers (a
//! `connect` request racing an operator handshake) collapse into a single
//! persisted row and a single `session:active` event.

pub mod events;
mod order;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use igloo_codec::EnvelopeCodec;
use igloo_core::rpc::methods;
use igloo_core::uri::policy_from_value;
use igloo_core::{
    ClientPubkey, ConnectUri, EventTemplate, NostrEvent, PendingRequest, RequestStatus,
    RpcMessage, RpcRequest, RpcResponse, SessionPolicy, SessionProfile, SessionRecord,
    SessionStatus,
};
use igloo_identity::SignerGate;
use igloo_policy::Decision;
use igloo_queue::{RequestQueue, Selection};
use igloo_sessions::SessionStore;
use igloo_transport::{IncomingEvent, RelayPool};

pub use events::BrokerEvent;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced through the operator API
#[derive(Debug, Error)]
pub enum BrokerError {
    /// No queued request under that id
    #[error("unknown request {0}")]
    UnknownRequest(String),

    /// No session under that pubkey
    #[error("unknown session {0}")]
    UnknownSession(String),
}

/// Where outbound envelopes go. `RelayPool` in production; tests collect
/// them from a channel.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn publish(&self, event: NostrEvent);
    async fn add_relays(&self, urls: Vec<String>);
}

#[async_trait]
impl Outbound for Arc<RelayPool> {
    async fn publish(&self, event: NostrEvent) {
        RelayPool::publish(self, &event).await;
    }

    async fn add_relays(&self, urls: Vec<String>) {
        RelayPool::add_relays(self, urls).await;
    }
}

/// Broker tuning knobs.
#[derive(Clone)]
pub struct BrokerConfig {
    /// Policy a freshly seen client starts with.
    pub baseline_policy: SessionPolicy,
    /// Concurrent identity operations across all clients.
    pub worker_permits: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let mut baseline_policy = SessionPolicy::default();
        // Answering pings costs nothing and keeps clients' liveness checks
        // out of the approval queue.
        baseline_policy.allow_method(methods::PING);
        Self {
            baseline_policy,
            worker_permits: 16,
        }
    }
}

/// Per-client locks for multi-step transitions (promotion, handshakes).
/// Distinct from the session store's own per-key locks: these serialize the
/// broker's read-decide-write sequences, which span several store calls.
#[derive(Default)]
struct KeyedLocks {
    inner: SyncMutex<HashMap<ClientPubkey, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &ClientPubkey) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock();
            Arc::clone(map.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    fn prune(&self, key: &ClientPubkey) {
        let mut map = self.inner.lock();
        if let Some(lock) = map.get(key) {
            if Arc::strong_count(lock) == 1 {
                map.remove(key);
            }
        }
    }
}

enum Work {
    /// Run an identity operation, then emit its response.
    Identity { request: RpcRequest, queued: Option<PendingRequest> },
    /// Emit a precomputed response.
    Ready(RpcResponse),
}

/// The broker.
pub struct Broker {
    codec: EnvelopeCodec,
    outbound: Arc<dyn Outbound>,
    sessions: Arc<SessionStore>,
    queue: Arc<RequestQueue>,
    gate: SignerGate,
    config: BrokerConfig,
    workers: Arc<Semaphore>,
    order: order::EmitOrder,
    promotions: KeyedLocks,
    /// Operator-initiated handshakes awaiting the client's reply, keyed by
    /// client with the connect secret as value.
    handshakes: SyncMutex<HashMap<ClientPubkey, String>>,
    events_tx: broadcast::Sender<BrokerEvent>,
}

impl Broker {
    pub fn new(
        codec: EnvelopeCodec,
        outbound: Arc<dyn Outbound>,
        sessions: Arc<SessionStore>,
        queue: Arc<RequestQueue>,
        gate: SignerGate,
        config: BrokerConfig,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            codec,
            outbound,
            sessions,
            queue,
            gate,
            workers: Arc::new(Semaphore::new(config.worker_permits.max(1))),
            config,
            order: order::EmitOrder::new(),
            promotions: KeyedLocks::default(),
            handshakes: SyncMutex::new(HashMap::new()),
            events_tx,
        })
    }

    /// The pubkey clients address their envelopes to.
    pub fn transport_pubkey(&self) -> &str {
        self.codec.transport_pubkey()
    }

    /// Observable state changes for the operator surface.
    pub fn subscribe_events(&self) -> broadcast::Receiver<BrokerEvent> {
        self.events_tx.subscribe()
    }

    pub fn signer_gate(&self) -> &SignerGate {
        &self.gate
    }

    /// Drive the broker: relay ingress and queue-expiry notifications.
    pub fn spawn(
        self: &Arc<Self>,
        mut incoming_rx: mpsc::Receiver<IncomingEvent>,
        mut expired_rx: mpsc::Receiver<PendingRequest>,
    ) {
        let broker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(incoming) = incoming_rx.recv().await {
                broker.handle_incoming(incoming).await;
            }
            debug!("relay ingress channel closed");
        });

        let broker = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = expired_rx.recv().await {
                broker.handle_expired(request).await;
            }
        });
    }

    /// One inbound relay event, end to end.
    pub async fn handle_incoming(self: &Arc<Self>, incoming: IncomingEvent) {
        let (sender, plaintext) = match self.codec.open(&incoming.event) {
            Ok(opened) => opened,
            // Undecryptable and malformed envelopes are dropped; the codec
            // already logged why.
            Err(_) => return,
        };

        match RpcMessage::parse(&plaintext) {
            Ok(RpcMessage::Request(request)) => {
                self.handle_request(sender, &incoming.relay, request).await;
            }
            Ok(RpcMessage::Response(response)) => {
                self.handle_response(sender, response).await;
            }
            Err(e) => {
                warn!(sender = %sender, error = %e, "dropping unparseable payload");
            }
        }
    }

    async fn handle_request(self: &Arc<Self>, sender: ClientPubkey, relay: &str, request: RpcRequest) {
        let session = self.ensure_session(&sender, relay).await;

        if request.method == methods::CONNECT {
            self.handle_connect(sender, request).await;
            return;
        }

        if !is_known_method(&request.method) {
            let response = RpcResponse::error(
                request.id.clone(),
                format!("unknown method: {}", request.method),
            );
            self.spawn_work(sender, Work::Ready(response));
            return;
        }

        match igloo_policy::evaluate(&session.policy, &request.method, &request.params) {
            Decision::Allow => {
                self.spawn_work(sender, Work::Identity { request, queued: None });
            }
            Decision::Deny(reason) => {
                debug!(sender = %sender, method = %request.method, reason = %reason, "queueing policy-denied request");
                self.enqueue(sender, request, Some(reason)).await;
            }
            Decision::Prompt => {
                self.enqueue(sender, request, None).await;
            }
        }
    }

    /// `connect` proves possession of the connect secret when the client
    /// supplies one; otherwise a plain ack. Then the session goes active.
    async fn handle_connect(self: &Arc<Self>, sender: ClientPubkey, request: RpcRequest) {
        let secret = request
            .params
            .get(1)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let requested = request.params.get(2).and_then(policy_from_value);

        let reply = secret.clone().unwrap_or_else(|| "ack".to_string());
        self.send_response(&sender, &RpcResponse::result(request.id, reply))
            .await;

        self.handshakes.lock().remove(&sender);
        self.promote(&sender, None, requested).await;
        self.sessions
            .touch(&sender, None, Some(methods::CONNECT))
            .await;
    }

    /// Responses from clients matter in one case: the reply to an
    /// operator-initiated handshake, which completes the promotion.
    async fn handle_response(self: &Arc<Self>, sender: ClientPubkey, response: RpcResponse) {
        let completed = {
            let mut handshakes = self.handshakes.lock();
            match handshakes.get(&sender) {
                Some(secret)
                    if response.id == *secret
                        || response.result.as_deref() == Some(secret.as_str()) =>
                {
                    handshakes.remove(&sender);
                    true
                }
                _ => false,
            }
        };

        if completed {
            info!(client = %sender, "handshake reply received, promoting session");
            self.promote(&sender, None, None).await;
        } else {
            debug!(sender = %sender, id = %response.id, "ignoring unsolicited response");
        }
    }

    /// First contact from an unseen pubkey creates a pending session with
    /// the baseline policy; later contacts just merge the relay.
    async fn ensure_session(&self, sender: &ClientPubkey, relay: &str) -> SessionRecord {
        let _guard = self.promotions.acquire(sender).await;

        let record = match self.sessions.get(sender).await {
            Some(existing) => {
                if existing.relays.contains(relay) {
                    existing
                } else {
                    let relay = relay.to_string();
                    self.sessions
                        .update_with(sender, move |s| {
                            s.relays.insert(relay);
                        })
                        .await
                        .unwrap_or(existing)
                }
            }
            None => {
                let mut record = SessionRecord::pending(sender.clone());
                record.policy = self.config.baseline_policy.clone();
                record.relays.insert(relay.to_string());
                self.sessions.upsert(record.clone()).await;
                info!(client = %sender, relay, "new pending session");
                self.emit(BrokerEvent::SessionPending {
                    pubkey: sender.clone(),
                });
                record
            }
        };
        drop(_guard);
        self.promotions.prune(sender);
        record
    }

    /// Pending → active, exactly once. Existing active rows are rewritten
    /// only when profile or requested permissions actually changed.
    async fn promote(
        &self,
        pubkey: &ClientPubkey,
        profile: Option<SessionProfile>,
        requested: Option<SessionPolicy>,
    ) {
        let _guard = self.promotions.acquire(pubkey).await;

        match self.sessions.get(pubkey).await {
            Some(session) if session.status == SessionStatus::Active => {
                let profile_changed = profile
                    .as_ref()
                    .map(|p| *p != session.profile)
                    .unwrap_or(false);
                let requested_changed = requested
                    .as_ref()
                    .map(|r| Some(r) != session.requested.as_ref())
                    .unwrap_or(false);
                if profile_changed || requested_changed {
                    self.sessions
                        .update_with(pubkey, move |s| {
                            if let Some(profile) = profile {
                                s.profile = profile;
                            }
                            if let Some(requested) = requested {
                                s.requested = Some(requested);
                            }
                        })
                        .await;
                }
            }
            Some(_) => {
                self.sessions
                    .update_with(pubkey, move |s| {
                        s.status = SessionStatus::Active;
                        if let Some(profile) = profile {
                            s.profile = profile;
                        }
                        if let Some(requested) = requested {
                            s.requested = Some(requested);
                        }
                    })
                    .await;
                info!(client = %pubkey, "session active");
                self.emit(BrokerEvent::SessionActive {
                    pubkey: pubkey.clone(),
                });
            }
            None => {
                let mut record = SessionRecord::pending(pubkey.clone());
                record.policy = self.config.baseline_policy.clone();
                record.status = SessionStatus::Active;
                if let Some(profile) = profile {
                    record.profile = profile;
                }
                record.requested = requested;
                self.sessions.upsert(record).await;
                info!(client = %pubkey, "session active");
                self.emit(BrokerEvent::SessionActive {
                    pubkey: pubkey.clone(),
                });
            }
        }
        drop(_guard);
        self.promotions.prune(pubkey);
    }

    async fn enqueue(&self, sender: ClientPubkey, request: RpcRequest, denied_reason: Option<String>) {
        let ttl = self.queue.request_ttl().as_secs();
        let pending = match denied_reason {
            Some(reason) => PendingRequest::denied_by_policy(
                request.id,
                request.method,
                request.params,
                sender,
                ttl,
                reason,
            ),
            None => PendingRequest::new(request.id, request.method, request.params, sender, ttl),
        };

        let id = pending.id.clone();
        let outcome = self.queue.enqueue(pending).await;
        self.emit(BrokerEvent::RequestQueued { id });

        if let Some(evicted) = outcome.evicted {
            self.send_response(
                &evicted.session_pubkey,
                &RpcResponse::error(evicted.id.clone(), "queue overflow"),
            )
            .await;
            self.emit(BrokerEvent::RequestDenied { id: evicted.id });
        }
    }

    /// Dispatch work for one client. Registration order here is emission
    /// order on the wire for that client.
    fn spawn_work(self: &Arc<Self>, client: ClientPubkey, work: Work) {
        let ticket = self.order.register(client.clone());
        let broker = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticket = ticket;
            let (response, request, queued) = match work {
                Work::Ready(response) => (response, None, None),
                Work::Identity { request, queued } => {
                    // Worker slot bounds identity concurrency across clients.
                    let _permit = match broker.workers.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return,
                    };
                    let response = broker.execute_identity(&request).await;
                    (response, Some(request), queued)
                }
            };

            ticket.wait_turn().await;
            broker.send_response(&client, &response).await;
            ticket.complete(&broker.order);

            broker.after_response(&client, request.as_ref(), queued, &response).await;
        });
    }

    /// Bookkeeping once a response has been emitted.
    async fn after_response(
        &self,
        client: &ClientPubkey,
        request: Option<&RpcRequest>,
        queued: Option<PendingRequest>,
        response: &RpcResponse,
    ) {
        let succeeded = response.error.is_none();

        if succeeded {
            if let Some(request) = request {
                let kind = request_kind(request);
                self.sessions
                    .touch(client, kind.as_deref(), Some(&request.method))
                    .await;
            }
        }

        if let Some(queued) = queued {
            let status = if succeeded {
                RequestStatus::Completed
            } else {
                RequestStatus::Failed
            };
            self.queue.record_outcome(&queued, status);
            if succeeded {
                self.emit(BrokerEvent::RequestCompleted { id: queued.id });
            } else {
                warn!(
                    request_id = %queued.id,
                    error = response.error.as_deref().unwrap_or(""),
                    "approved request failed"
                );
            }
        }
    }

    /// Run one identity operation. Every failure becomes `{id, error}`; the
    /// session is never transitioned by a failure.
    async fn execute_identity(&self, request: &RpcRequest) -> RpcResponse {
        let id = request.id.clone();

        let signer = match self.gate.current().await {
            Ok(signer) => signer,
            Err(e) => return RpcResponse::error(id, e.to_string()),
        };

        match request.method.as_str() {
            methods::PING => RpcResponse::result(id, "pong"),
            methods::GET_PUBLIC_KEY => match signer.get_public_key().await {
                Ok(pubkey) => RpcResponse::result(id, pubkey),
                Err(e) => RpcResponse::error(id, e.to_string()),
            },
            methods::SIGN_EVENT => {
                let template = match request
                    .params
                    .first()
                    .ok_or_else(|| "missing event template".to_string())
                    .and_then(|p| EventTemplate::from_param(p).map_err(|e| e.to_string()))
                {
                    Ok(template) => template,
                    Err(e) => return RpcResponse::error(id, e),
                };
                match signer.sign_event(template).await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(encoded) => RpcResponse::result(id, encoded),
                        Err(e) => RpcResponse::error(id, format!("signed event unserializable: {}", e)),
                    },
                    Err(e) => RpcResponse::error(id, e.to_string()),
                }
            }
            methods::NIP44_ENCRYPT | methods::NIP44_DECRYPT
            | methods::NIP04_ENCRYPT | methods::NIP04_DECRYPT => {
                let (peer, payload) = match cipher_params(request) {
                    Ok(parsed) => parsed,
                    Err(e) => return RpcResponse::error(id, e),
                };
                let outcome = match request.method.as_str() {
                    methods::NIP44_ENCRYPT => signer.nip44_encrypt(peer, payload).await,
                    methods::NIP44_DECRYPT => signer.nip44_decrypt(peer, payload).await,
                    methods::NIP04_ENCRYPT => signer.nip04_encrypt(peer, payload).await,
                    _ => signer.nip04_decrypt(peer, payload).await,
                };
                match outcome {
                    Ok(result) => RpcResponse::result(id, result),
                    Err(e) => RpcResponse::error(id, e.to_string()),
                }
            }
            other => RpcResponse::error(id, format!("unknown method: {}", other)),
        }
    }

    /// Seal and publish one response. Failures are logged; the queue entry
    /// behind a response is never resurrected by a send failure.
    async fn send_response(&self, client: &ClientPubkey, response: &RpcResponse) {
        let plaintext = match serde_json::to_string(response) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(client = %client, error = %e, "response failed to serialize");
                return;
            }
        };
        match self.codec.seal(client, &plaintext) {
            Ok(event) => self.outbound.publish(event).await,
            Err(e) => {
                warn!(client = %client, error = %e, "response failed to seal");
            }
        }
    }

    fn emit(&self, event: BrokerEvent) {
        // No subscribers is fine; send only fails then.
        let _ = self.events_tx.send(event);
    }

    // ----- operator surface -----

    /// Operator pasted a `nostrconnect://` URI: merge its relays, record the
    /// session as pending, and start the handshake by echoing the secret.
    pub async fn connect_to_client(self: &Arc<Self>, uri: ConnectUri) {
        self.outbound.add_relays(uri.relays.clone()).await;

        let client = uri.client_pubkey.clone();
        let _guard = self.promotions.acquire(&client).await;

        match self.sessions.get(&client).await {
            Some(_) => {
                let profile = uri.profile.clone();
                let requested = uri.requested.clone();
                let relays = uri.relays.clone();
                self.sessions
                    .update_with(&client, move |s| {
                        if !profile.is_empty() {
                            s.profile = profile;
                        }
                        if requested.is_some() {
                            s.requested = requested;
                        }
                        s.relays.extend(relays);
                    })
                    .await;
            }
            None => {
                let mut record = SessionRecord::pending(client.clone());
                record.policy = self.config.baseline_policy.clone();
                record.profile = uri.profile.clone();
                record.requested = uri.requested.clone();
                record.relays.extend(uri.relays.iter().cloned());
                self.sessions.upsert(record).await;
                self.emit(BrokerEvent::SessionPending {
                    pubkey: client.clone(),
                });
            }
        }
        drop(_guard);
        self.promotions.prune(&client);

        if let Some(secret) = uri.secret {
            self.handshakes.lock().insert(client.clone(), secret.clone());
            // Echoing the secret as both id and result proves we hold it.
            self.send_response(&client, &RpcResponse::result(secret.clone(), secret))
                .await;
        }
    }

    /// Approve one queued request. Executes exactly once; policy is only
    /// touched when `auto_grant` asks for it.
    pub async fn approve(self: &Arc<Self>, id: &str, auto_grant: bool) -> Result<()> {
        let queued = self
            .queue
            .resolve(id, RequestStatus::Approved)
            .await
            .ok_or_else(|| BrokerError::UnknownRequest(id.to_string()))?;

        if auto_grant {
            self.grant(&queued).await;
        }

        let request = RpcRequest {
            id: queued.id.clone(),
            method: queued.method.clone(),
            params: queued.params.clone(),
        };
        self.spawn_work(
            queued.session_pubkey.clone(),
            Work::Identity {
                request,
                queued: Some(queued),
            },
        );
        Ok(())
    }

    /// Deny one queued request; the client hears the reason.
    pub async fn deny(self: &Arc<Self>, id: &str, reason: Option<String>) -> Result<()> {
        let queued = self
            .queue
            .resolve(id, RequestStatus::Denied)
            .await
            .ok_or_else(|| BrokerError::UnknownRequest(id.to_string()))?;

        let reason = reason.unwrap_or_else(|| "Denied".to_string());
        self.spawn_work(
            queued.session_pubkey.clone(),
            Work::Ready(RpcResponse::error(queued.id.clone(), reason)),
        );
        self.emit(BrokerEvent::RequestDenied { id: queued.id });
        Ok(())
    }

    /// Approve a whole selection; each member is a distinct request.
    pub async fn approve_selection(self: &Arc<Self>, selection: &Selection, auto_grant: bool) -> usize {
        let ids = self.queue.select(selection).await;
        let mut approved = 0;
        for id in ids {
            if self.approve(&id, auto_grant).await.is_ok() {
                approved += 1;
            }
        }
        approved
    }

    /// Deny a whole selection.
    pub async fn deny_selection(self: &Arc<Self>, selection: &Selection, reason: Option<String>) -> usize {
        let ids = self.queue.select(selection).await;
        let mut denied = 0;
        for id in ids {
            if self.deny(&id, reason.clone()).await.is_ok() {
                denied += 1;
            }
        }
        denied
    }

    /// Operator-driven activation of an existing session.
    pub async fn mark_active(self: &Arc<Self>, pubkey: &ClientPubkey) {
        self.promote(pubkey, None, None).await;
    }

    /// Revoke a session: hard delete, no tombstone. Anything it still had
    /// queued is dropped without a wire response.
    pub async fn revoke_session(self: &Arc<Self>, pubkey: &ClientPubkey) -> Result<()> {
        self.handshakes.lock().remove(pubkey);
        self.queue
            .resolve_selection(&Selection::Session(pubkey.clone()), RequestStatus::Denied)
            .await;

        if self.sessions.revoke(pubkey).await {
            info!(client = %pubkey, "session revoked");
            self.emit(BrokerEvent::SessionRevoked {
                pubkey: pubkey.clone(),
            });
            Ok(())
        } else {
            Err(BrokerError::UnknownSession(pubkey.to_string()))
        }
    }

    async fn handle_expired(self: &Arc<Self>, request: PendingRequest) {
        self.send_response(
            &request.session_pubkey,
            &RpcResponse::error(request.id.clone(), "expired"),
        )
        .await;
        self.emit(BrokerEvent::RequestExpired { id: request.id });
    }

    /// Union exactly one policy entry from an approved request: the kind
    /// for `sign_event`, the method name for everything else.
    async fn grant(&self, request: &PendingRequest) {
        let method = request.method.clone();
        let kind = request.event_kind();

        self.sessions
            .update_with(&request.session_pubkey, move |session| {
                if method == methods::SIGN_EVENT {
                    if let Some(kind) = kind {
                        session.policy.allow_kind(&kind.to_string());
                    }
                } else {
                    session.policy.allow_method(&method);
                }
            })
            .await;
    }
}

fn is_known_method(method: &str) -> bool {
    matches!(
        method,
        methods::CONNECT
            | methods::GET_PUBLIC_KEY
            | methods::SIGN_EVENT
            | methods::NIP44_ENCRYPT
            | methods::NIP44_DECRYPT
            | methods::NIP04_ENCRYPT
            | methods::NIP04_DECRYPT
            | methods::PING
    )
}

/// `[peer_pubkey, payload]` params shared by the four cipher methods.
fn cipher_params(request: &RpcRequest) -> std::result::Result<(ClientPubkey, String), String> {
    let peer = request
        .params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| "missing peer pubkey".to_string())?;
    let peer = ClientPubkey::parse(peer).map_err(|e| e.to_string())?;
    let payload = request
        .params
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| "missing payload".to_string())?
        .to_string();
    Ok((peer, payload))
}

/// The policy-relevant kind of a `sign_event` request, as a map key.
fn request_kind(request: &RpcRequest) -> Option<String> {
    if request.method != methods::SIGN_EVENT {
        return None;
    }
    request
        .params
        .first()
        .and_then(|p| EventTemplate::from_param(p).ok())
        .map(|t| t.kind_key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_methods_cover_the_rpc_surface() {
        for method in [
            "connect",
            "get_public_key",
            "sign_event",
            "nip44_encrypt",
            "nip44_decrypt",
            "nip04_encrypt",
            "nip04_decrypt",
            "ping",
        ] {
            assert!(is_known_method(method));
        }
        assert!(!is_known_method("delete_account"));
    }

    #[test]
    fn cipher_params_require_peer_and_payload() {
        let ok = RpcRequest {
            id: "1".into(),
            method: "nip44_encrypt".into(),
            params: vec![
                serde_json::json!("ab".repeat(32)),
                serde_json::json!("plaintext"),
            ],
        };
        assert!(cipher_params(&ok).is_ok());

        let missing_payload = RpcRequest {
            id: "1".into(),
            method: "nip44_encrypt".into(),
            params: vec![serde_json::json!("ab".repeat(32))],
        };
        assert!(cipher_params(&missing_payload).is_err());

        let bad_peer = RpcRequest {
            id: "1".into(),
            method: "nip44_encrypt".into(),
            params: vec![serde_json::json!("nope"), serde_json::json!("x")],
        };
        assert!(cipher_params(&bad_peer).is_err());
    }

    #[test]
    fn request_kind_reads_sign_event_templates() {
        let request = RpcRequest {
            id: "1".into(),
            method: "sign_event".into(),
            params: vec![serde_json::json!({"kind": 30023, "content": ""})],
        };
        assert_eq!(request_kind(&request).as_deref(), Some("30023"));

        let ping = RpcRequest {
            id: "1".into(),
            method: "ping".into(),
            params: vec![],
        };
        assert_eq!(request_kind(&ping), None);
    }
}
