//! The identity adapter.
//!
//! Every use of the user's signing identity flows through the
//! [`IdentitySigner`] trait and nothing else. The broker never sees key
//! material: a signer is installed behind the [`SignerGate`] when a login
//! unwraps the user's credential, and removed when that session ends.
//!
//! [`DeadlineSigner`] bounds each operation with a deadline. On expiry the
//! caller gets [`IdentityError::Timeout`] while the underlying operation
//! keeps running on its own task: a threshold round that involves remote
//! quorum members must not be yanked mid-protocol.

pub mod gate;
pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;

use igloo_core::{ClientPubkey, EventTemplate, NostrEvent};

pub use gate::SignerGate;
pub use local::LocalSigner;

/// Default deadline for one identity operation.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Result type for identity operations
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Errors surfaced by the identity signer.
///
/// Display strings are client-visible: they travel back verbatim in the
/// `error` field of the NIP-46 response.
#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    /// The operation exceeded its deadline
    #[error("timeout")]
    Timeout,

    /// No unwrapped credential is available for the calling user
    #[error("unauthorized")]
    Unauthorized,

    /// The signer does not implement this operation
    #[error("not supported")]
    NotSupported,

    /// The signer refused or failed the operation
    #[error("{0}")]
    Rejected(String),
}

/// The signing identity, seen through the narrowest possible interface.
#[async_trait]
pub trait IdentitySigner: Send + Sync {
    /// The identity pubkey — never the transport key.
    async fn get_public_key(&self) -> Result<String>;

    /// Sign an event template, returning the finished event.
    async fn sign_event(&self, template: EventTemplate) -> Result<NostrEvent>;

    async fn nip44_encrypt(&self, peer: ClientPubkey, plaintext: String) -> Result<String>;
    async fn nip44_decrypt(&self, peer: ClientPubkey, ciphertext: String) -> Result<String>;

    /// NIP-04 is an optional capability; signers without it return
    /// [`IdentityError::NotSupported`] and the broker passes that verdict on.
    async fn nip04_encrypt(&self, _peer: ClientPubkey, _plaintext: String) -> Result<String> {
        Err(IdentityError::NotSupported)
    }

    async fn nip04_decrypt(&self, _peer: ClientPubkey, _ciphertext: String) -> Result<String> {
        Err(IdentityError::NotSupported)
    }
}

/// Wraps a signer with a per-operation deadline.
///
/// The inner operation is spawned on its own task, so a deadline expiry
/// abandons the wait without cancelling the work.
#[derive(Clone)]
pub struct DeadlineSigner {
    inner: Arc<dyn IdentitySigner>,
    deadline: Duration,
}

impl std::fmt::Debug for DeadlineSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineSigner")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl DeadlineSigner {
    pub fn new(inner: Arc<dyn IdentitySigner>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn with_default_deadline(inner: Arc<dyn IdentitySigner>) -> Self {
        Self::new(inner, DEFAULT_DEADLINE)
    }

    async fn bounded<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let mut handle = tokio::spawn(work);
        match timeout(self.deadline, &mut handle).await {
            Ok(joined) => joined.unwrap_or(Err(IdentityError::Rejected(
                "signer task failed".to_string(),
            ))),
            Err(_) => {
                // The task keeps running; only the wait is abandoned.
                tracing::warn!(deadline_secs = self.deadline.as_secs(), "identity operation timed out");
                Err(IdentityError::Timeout)
            }
        }
    }

    pub async fn get_public_key(&self) -> Result<String> {
        let signer = Arc::clone(&self.inner);
        self.bounded(async move { signer.get_public_key().await }).await
    }

    pub async fn sign_event(&self, template: EventTemplate) -> Result<NostrEvent> {
        let signer = Arc::clone(&self.inner);
        self.bounded(async move { signer.sign_event(template).await })
            .await
    }

    pub async fn nip44_encrypt(&self, peer: ClientPubkey, plaintext: String) -> Result<String> {
        let signer = Arc::clone(&self.inner);
        self.bounded(async move { signer.nip44_encrypt(peer, plaintext).await })
            .await
    }

    pub async fn nip44_decrypt(&self, peer: ClientPubkey, ciphertext: String) -> Result<String> {
        let signer = Arc::clone(&self.inner);
        self.bounded(async move { signer.nip44_decrypt(peer, ciphertext).await })
            .await
    }

    pub async fn nip04_encrypt(&self, peer: ClientPubkey, plaintext: String) -> Result<String> {
        let signer = Arc::clone(&self.inner);
        self.bounded(async move { signer.nip04_encrypt(peer, plaintext).await })
            .await
    }

    pub async fn nip04_decrypt(&self, peer: ClientPubkey, ciphertext: String) -> Result<String> {
        let signer = Arc::clone(&self.inner);
        self.bounded(async move { signer.nip04_decrypt(peer, ciphertext).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowSigner;

    #[async_trait]
    impl IdentitySigner for SlowSigner {
        async fn get_public_key(&self) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("never".into())
        }

        async fn sign_event(&self, _template: EventTemplate) -> Result<NostrEvent> {
            Err(IdentityError::Rejected("unused".into()))
        }

        async fn nip44_encrypt(&self, _peer: ClientPubkey, _plaintext: String) -> Result<String> {
            Err(IdentityError::Rejected("unused".into()))
        }

        async fn nip44_decrypt(&self, _peer: ClientPubkey, _ciphertext: String) -> Result<String> {
            Err(IdentityError::Rejected("unused".into()))
        }
    }

    #[tokio::test]
    async fn deadline_expiry_returns_timeout() {
        let signer = DeadlineSigner::new(Arc::new(SlowSigner), Duration::from_millis(20));
        let err = signer.get_public_key().await.unwrap_err();
        assert!(matches!(err, IdentityError::Timeout));
        assert_eq!(err.to_string(), "timeout");
    }

    #[tokio::test]
    async fn nip04_defaults_to_not_supported() {
        let signer = DeadlineSigner::with_default_deadline(Arc::new(SlowSigner));
        let err = signer
            .nip04_encrypt(
                ClientPubkey::parse(&"ab".repeat(32)).unwrap(),
                "x".into(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "not supported");
    }
}
