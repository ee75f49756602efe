//! End-to-end broker flows against an in-process signer and a captured
//! outbound channel standing in for the relay pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use igloo_broker::{Broker, BrokerConfig, BrokerEvent, Outbound};
use igloo_codec::{EnvelopeCodec, TransportKeypair};
use igloo_core::{
    ClientPubkey, ConnectUri, NostrEvent, RpcMessage, RpcResponse, SessionStatus,
};
use igloo_identity::{DeadlineSigner, LocalSigner, SignerGate};
use igloo_queue::{QueueConfig, RequestQueue};
use igloo_sessions::SessionStore;

struct TestOutbound {
    published: mpsc::UnboundedSender<NostrEvent>,
    relays: Mutex<Vec<String>>,
}

#[async_trait]
impl Outbound for TestOutbound {
    async fn publish(&self, event: NostrEvent) {
        let _ = self.published.send(event);
    }

    async fn add_relays(&self, urls: Vec<String>) {
        self.relays.lock().await.extend(urls);
    }
}

struct Harness {
    broker: Arc<Broker>,
    sessions: Arc<SessionStore>,
    queue: Arc<RequestQueue>,
    outbound_rx: mpsc::UnboundedReceiver<NostrEvent>,
    client: EnvelopeCodec,
    client_pubkey: ClientPubkey,
    broker_pubkey: ClientPubkey,
}

async fn harness() -> Harness {
    let sessions = Arc::new(SessionStore::new(None));
    let queue = Arc::new(RequestQueue::new(QueueConfig::default(), None));
    let (published, outbound_rx) = mpsc::unbounded_channel();
    let outbound = Arc::new(TestOutbound {
        published,
        relays: Mutex::new(Vec::new()),
    });

    let codec = EnvelopeCodec::new(TransportKeypair::generate().unwrap());
    let broker_pubkey = ClientPubkey::parse(codec.transport_pubkey()).unwrap();

    let gate = SignerGate::new();
    gate.install(DeadlineSigner::with_default_deadline(Arc::new(
        LocalSigner::generate().unwrap(),
    )))
    .await;

    let broker = Broker::new(
        codec,
        outbound,
        Arc::clone(&sessions),
        Arc::clone(&queue),
        gate,
        BrokerConfig::default(),
    );

    let client = EnvelopeCodec::new(TransportKeypair::generate().unwrap());
    let client_pubkey = ClientPubkey::parse(client.transport_pubkey()).unwrap();

    Harness {
        broker,
        sessions,
        queue,
        outbound_rx,
        client,
        client_pubkey,
        broker_pubkey,
    }
}

impl Harness {
    async fn send_rpc(&self, payload: serde_json::Value) {
        let event = self
            .client
            .seal(&self.broker_pubkey, &payload.to_string())
            .unwrap();
        self.broker
            .handle_incoming(igloo_transport::IncomingEvent {
                relay: "wss://r1.example".into(),
                event,
            })
            .await;
    }

    async fn next_response(&mut self) -> RpcResponse {
        let event = timeout(Duration::from_secs(5), self.outbound_rx.recv())
            .await
            .expect("timed out waiting for a response")
            .expect("outbound channel closed");
        let (_, plaintext) = self.client.open(&event).unwrap();
        match RpcMessage::parse(&plaintext).unwrap() {
            RpcMessage::Response(response) => response,
            other => panic!("expected response, got {:?}", other),
        }
    }

    fn connect_uri(&self, secret: &str) -> ConnectUri {
        ConnectUri::parse(&format!(
            "nostrconnect://{}?relay=wss://r1.example&secret={}&name=App",
            self.client_pubkey, secret
        ))
        .unwrap()
    }
}

#[tokio::test]
async fn operator_handshake_then_client_connect_activates_session() {
    let mut h = harness().await;

    // Operator pastes the URI: secret is echoed, session shows up pending.
    h.broker.connect_to_client(h.connect_uri("deadbeef")).await;

    let echo = h.next_response().await;
    assert_eq!(echo.id, "deadbeef");
    assert_eq!(echo.result.as_deref(), Some("deadbeef"));

    let session = h.sessions.get(&h.client_pubkey).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert_eq!(session.profile.name.as_deref(), Some("App"));

    // Client follows with `connect` carrying the secret.
    h.send_rpc(json!({
        "id": "c-1",
        "method": "connect",
        "params": ["remote-signer-pubkey", "deadbeef"],
    }))
    .await;

    let ack = h.next_response().await;
    assert_eq!(ack.id, "c-1");
    assert_eq!(ack.result.as_deref(), Some("deadbeef"));

    let session = h.sessions.get(&h.client_pubkey).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
    assert_eq!(session.profile.name.as_deref(), Some("App"));
}

#[tokio::test]
async fn allowed_kind_signs_without_prompting() {
    let mut h = harness().await;
    h.broker.connect_to_client(h.connect_uri("s")).await;
    let _echo = h.next_response().await;

    let mut policy = h.sessions.get(&h.client_pubkey).await.unwrap().policy;
    policy.kinds.insert("1".into(), true);
    h.sessions.update_policy(&h.client_pubkey, policy).await;

    h.send_rpc(json!({
        "id": "r-1",
        "method": "sign_event",
        "params": [json!({"kind": 1, "content": "hi", "tags": []}).to_string()],
    }))
    .await;

    let response = h.next_response().await;
    assert_eq!(response.id, "r-1");
    let signed: NostrEvent = serde_json::from_str(response.result.as_deref().unwrap()).unwrap();
    assert_eq!(signed.kind, 1);
    assert_eq!(signed.content, "hi");
    assert_eq!(signed.sig.len(), 128);

    let session = h.sessions.get(&h.client_pubkey).await.unwrap();
    assert!(session.recent_kinds.contains(&"1".to_string()));
    assert!(session.recent_methods.contains(&"sign_event".to_string()));
}

#[tokio::test]
async fn unknown_kind_prompts_and_auto_grant_extends_policy() {
    let mut h = harness().await;
    h.broker.connect_to_client(h.connect_uri("s")).await;
    let _echo = h.next_response().await;

    let mut policy = h.sessions.get(&h.client_pubkey).await.unwrap().policy;
    policy.kinds.insert("1".into(), true);
    h.sessions.update_policy(&h.client_pubkey, policy).await;

    h.send_rpc(json!({
        "id": "r-4",
        "method": "sign_event",
        "params": [json!({"kind": 4, "content": "dm"}).to_string()],
    }))
    .await;

    // Parked, not answered.
    let queued = h.queue.get("r-4").await.unwrap();
    assert!(queued.denied_reason.is_none());

    h.broker.approve("r-4", true).await.unwrap();

    let response = h.next_response().await;
    assert_eq!(response.id, "r-4");
    assert!(response.result.is_some());

    // Exactly the one kind was granted: no wildcard, no method entry.
    let policy = h.sessions.get(&h.client_pubkey).await.unwrap().policy;
    assert_eq!(policy.kinds.get("1"), Some(&true));
    assert_eq!(policy.kinds.get("4"), Some(&true));
    assert!(policy.kinds.get("*").is_none());
    assert!(policy.methods.get("sign_event").is_none());

    // Approving again is refused: single-serve.
    assert!(h.broker.approve("r-4", false).await.is_err());
}

#[tokio::test]
async fn policy_denied_requests_carry_a_reason_and_deny_answers_the_client() {
    let mut h = harness().await;
    h.broker.connect_to_client(h.connect_uri("s")).await;
    let _echo = h.next_response().await;

    let mut policy = h.sessions.get(&h.client_pubkey).await.unwrap().policy;
    policy.methods.insert("nip04_encrypt".into(), false);
    h.sessions.update_policy(&h.client_pubkey, policy).await;

    h.send_rpc(json!({
        "id": "r-9",
        "method": "nip04_encrypt",
        "params": ["ab".repeat(32), "plaintext"],
    }))
    .await;

    let queued = h.queue.get("r-9").await.unwrap();
    let reason = queued.denied_reason.unwrap();
    assert!(reason.contains("nip04_encrypt not allowed by policy"));

    h.broker.deny("r-9", None).await.unwrap();
    let response = h.next_response().await;
    assert_eq!(response.id, "r-9");
    assert_eq!(response.error.as_deref(), Some("Denied"));
}

#[tokio::test]
async fn concurrent_promotion_triggers_yield_one_active_event() {
    let h = harness().await;
    let mut events = h.broker.subscribe_events();

    h.broker.connect_to_client(h.connect_uri("deadbeef")).await;

    // Client `connect` and the handshake reply race each other.
    let connect = h.send_rpc(json!({
        "id": "c-1",
        "method": "connect",
        "params": ["signer", "deadbeef"],
    }));
    let reply = h.send_rpc(json!({
        "id": "deadbeef",
        "result": "deadbeef",
    }));
    tokio::join!(connect, reply);

    let mut active_events = 0;
    while let Ok(Ok(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        if matches!(event, BrokerEvent::SessionActive { .. }) {
            active_events += 1;
        }
    }
    assert_eq!(active_events, 1);

    let session = h.sessions.get(&h.client_pubkey).await.unwrap();
    assert_eq!(session.status, SessionStatus::Active);
}

#[tokio::test]
async fn ping_is_answered_from_the_baseline_policy() {
    let mut h = harness().await;

    h.send_rpc(json!({"id": "p-1", "method": "ping", "params": []}))
        .await;

    let response = h.next_response().await;
    assert_eq!(response.id, "p-1");
    assert_eq!(response.result.as_deref(), Some("pong"));

    // First contact also created a pending session.
    let session = h.sessions.get(&h.client_pubkey).await.unwrap();
    assert_eq!(session.status, SessionStatus::Pending);
    assert!(session.relays.contains("wss://r1.example"));
}

#[tokio::test]
async fn unknown_methods_are_answered_with_an_error() {
    let mut h = harness().await;

    h.send_rpc(json!({
        "id": "u-1",
        "method": "delete_account",
        "params": [],
    }))
    .await;

    let response = h.next_response().await;
    assert_eq!(response.id, "u-1");
    assert_eq!(response.error.as_deref(), Some("unknown method: delete_account"));
}

#[tokio::test]
async fn revocation_removes_the_session_outright() {
    let mut h = harness().await;
    h.broker.connect_to_client(h.connect_uri("s")).await;
    let _echo = h.next_response().await;

    h.broker.revoke_session(&h.client_pubkey).await.unwrap();
    assert!(h.sessions.get(&h.client_pubkey).await.is_none());

    // Revoking twice is an error the operator API can surface.
    assert!(h.broker.revoke_session(&h.client_pubkey).await.is_err());
}
