//! Shared application state and startup wiring.

use std::sync::Arc;

use tracing::info;

use igloo_auth::AuthGateway;
use igloo_broker::{Broker, BrokerConfig};
use igloo_codec::{EnvelopeCodec, TransportKeypair};
use igloo_identity::SignerGate;
use igloo_queue::RequestQueue;
use igloo_sessions::SessionStore;
use igloo_store::{BlobStore, Table};
use igloo_transport::RelayPool;

use crate::config::ServerConfig;

/// Row key for the deployment's transport key until a user exists; once the
/// first admin is onboarded the key is scoped to their user id.
const DEFAULT_TRANSPORT_KEY_ROW: &str = "default";

/// Everything the HTTP layer needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: BlobStore,
    pub gateway: Arc<AuthGateway>,
    pub sessions: Arc<SessionStore>,
    pub queue: Arc<RequestQueue>,
    pub broker: Arc<Broker>,
    pub pool: Arc<RelayPool>,
    pub gate: SignerGate,
}

/// Errors that abort startup (exit code 1).
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("persistence unavailable: {0}")]
    Store(#[from] igloo_store::StoreError),

    #[error("transport key unusable: {0}")]
    TransportKey(String),

    #[error("fresh install needs ADMIN_SECRET set for onboarding")]
    MissingAdminSecret,
}

/// Open the store, restore state, and wire every subsystem together.
pub async fn build(config: ServerConfig) -> Result<AppState, StartupError> {
    let store = BlobStore::open(config.db_path())?;

    let gateway = Arc::new(AuthGateway::new(config.auth_config(), store.clone()));
    gateway.load().await;

    // A fresh install with no way to ever create an admin is unusable;
    // refuse to start rather than run an unreachable service.
    if gateway.needs_onboarding().await && config.admin_secret.is_none() {
        return Err(StartupError::MissingAdminSecret);
    }

    let keys = load_or_create_transport_key(&store).await?;
    let codec = EnvelopeCodec::new(keys);
    info!(transport_pubkey = codec.transport_pubkey(), "transport identity ready");

    let sessions = Arc::new(SessionStore::new(Some(store.clone())));
    let session_relays = sessions.load().await;

    let (pool, incoming_rx) = RelayPool::new(
        codec.transport_pubkey().to_string(),
        config.transport_config(),
    );
    pool.add_relays(config.relays.iter().map(String::as_str)).await;
    pool.add_relays(session_relays.iter().map(String::as_str)).await;

    let queue = Arc::new(RequestQueue::new(
        config.queue_config(),
        Some(store.clone()),
    ));
    let (expired_tx, expired_rx) = tokio::sync::mpsc::channel(64);
    queue.spawn_sweeper(expired_tx);

    let gate = SignerGate::new();
    let broker = Broker::new(
        codec,
        Arc::new(Arc::clone(&pool)),
        Arc::clone(&sessions),
        Arc::clone(&queue),
        gate.clone(),
        BrokerConfig::default(),
    );
    broker.spawn(incoming_rx, expired_rx);

    gateway.spawn_reaper(std::time::Duration::from_secs(60));

    Ok(AppState {
        config: Arc::new(config),
        store,
        gateway,
        sessions,
        queue,
        broker,
        pool,
        gate,
    })
}

/// The per-user transport keypair, persisted so client sessions survive
/// restarts. Created on first boot, regenerated only by deleting the row.
async fn load_or_create_transport_key(store: &BlobStore) -> Result<TransportKeypair, StartupError> {
    let existing = store
        .get(Table::TransportKeys, DEFAULT_TRANSPORT_KEY_ROW.to_string())
        .await?;

    if let Some(bytes) = existing {
        return TransportKeypair::from_secret_bytes(&bytes)
            .map_err(|e| StartupError::TransportKey(e.to_string()));
    }

    let keys =
        TransportKeypair::generate().map_err(|e| StartupError::TransportKey(e.to_string()))?;
    store
        .put(
            Table::TransportKeys,
            DEFAULT_TRANSPORT_KEY_ROW.to_string(),
            keys.secret_bytes().to_vec(),
        )
        .await?;
    info!("generated a new transport keypair");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path, admin_secret: Option<&str>) -> ServerConfig {
        ServerConfig {
            host_port: 0,
            data_dir: dir.to_path_buf(),
            relays: vec![],
            headless: true,
            static_dir: dir.join("static"),
            admin_secret: admin_secret.map(String::from),
            api_key: None,
            rate_limit_window: Duration::from_secs(900),
            rate_limit_max: 5,
            session_idle_timeout: Duration::from_secs(1800),
            session_absolute_timeout: Duration::from_secs(43_200),
            request_ttl: Duration::from_secs(600),
            max_relays: 12,
        }
    }

    #[tokio::test]
    async fn fresh_install_without_admin_secret_refuses_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let result = build(test_config(dir.path(), None)).await;
        assert!(matches!(result, Err(StartupError::MissingAdminSecret)));
    }

    #[tokio::test]
    async fn transport_key_is_created_once_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::open(dir.path().join("igloo.redb")).unwrap();

        let first = load_or_create_transport_key(&store).await.unwrap();
        let second = load_or_create_transport_key(&store).await.unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }
}
